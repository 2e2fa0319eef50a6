//! This module is an integration test that checks the ways of steering the
//! executor with known inputs: seeds, replayed inputs, and stopping it from
//! the outside. It also covers merging states at join points.
#![cfg(test)]

use std::sync::{atomic::AtomicBool, Arc};

use symbolic_executor::{
    error::execution::{self, ErrorKind},
    program::{IntPredicate, Intrinsic, Program, ProgramBuilder},
    sink::{TestInput, Termination},
    vm::Config,
    watchdog::FlagWatchdog,
};

mod common;

/// Builds `if x < 10 { return } else { return }` over a symbolic byte `x`.
fn less_than_ten() -> Program {
    common::program_with_input(|body, input| {
        common::symbolic_global(body, input, "x");
        let x = body.load(input, 8);
        let ten = body.int(10, 8);
        let small = body.icmp(IntPredicate::Ult, x, ten);
        let (if_small, if_large) = (body.block(), body.block());
        body.cond_br(small, if_small, if_large);
        body.switch_to(if_small);
        body.ret(None);
        body.switch_to(if_large);
        body.ret(None);
    })
}

fn input(value: u8) -> TestInput {
    TestInput {
        name:  "x".into(),
        bytes: vec![value],
    }
}

#[test]
fn replayed_seeds_follow_only_their_own_path() -> anyhow::Result<()> {
    let config = Config::default().with_only_replay_seeds(true);
    let mut executor =
        common::new_executor(less_than_ten(), config)?.with_seeds(vec![vec![input(42)]]);
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 1);
    assert_eq!(test_cases[0].termination, Termination::Exit);
    assert_eq!(test_cases[0].path, vec![false]);
    assert_eq!(executor.statistics().forks, 0);

    Ok(())
}

#[test]
fn only_seeding_stops_the_unseeded_states() -> anyhow::Result<()> {
    let config = Config::default().with_only_seed(true);
    let mut executor =
        common::new_executor(less_than_ten(), config)?.with_seeds(vec![vec![input(3)]]);
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 2);
    let seeded = test_cases
        .iter()
        .find(|t| t.termination == Termination::Exit)
        .ok_or_else(|| anyhow::anyhow!("the seeded state did not exit"))?;
    assert_eq!(seeded.path, vec![true]);
    assert_eq!(
        common::count(&test_cases, |t| *t
            == Termination::Early {
                reason: "only seeding".into(),
            }),
        1
    );

    Ok(())
}

#[test]
fn seeds_with_the_wrong_size_fail_the_state() -> anyhow::Result<()> {
    let seed = TestInput {
        name:  "x".into(),
        bytes: vec![1, 2],
    };
    let mut executor =
        common::new_executor(less_than_ten(), Config::default())?.with_seeds(vec![vec![seed]]);
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 1);
    assert_eq!(
        test_cases[0].termination,
        Termination::Error {
            kind:    ErrorKind::User,
            message: "seed input x has 2 bytes but the object has 1".into(),
        }
    );
    assert_eq!(
        executor.errors().payloads()[0].payload,
        execution::Error::SeedInputSize {
            name:     "x".into(),
            expected: 1,
            actual:   2,
        }
    );

    Ok(())
}

#[test]
fn replayed_inputs_make_execution_concrete() -> anyhow::Result<()> {
    let mut executor =
        common::new_executor(less_than_ten(), Config::default())?.with_replay_inputs(vec![input(3)]);
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 1);
    assert_eq!(test_cases[0].termination, Termination::Exit);
    assert_eq!(test_cases[0].path, vec![true]);
    assert!(test_cases[0].constraints.is_empty());
    assert_eq!(executor.statistics().forks, 0);

    Ok(())
}

#[test]
fn replayed_inputs_must_match_the_object_size() -> anyhow::Result<()> {
    let mut executor = common::new_executor(less_than_ten(), Config::default())?
        .with_replay_inputs(vec![TestInput {
            name:  "x".into(),
            bytes: vec![],
        }]);
    let errors = executor.run().err().ok_or_else(|| anyhow::anyhow!("run did not fail"))?;

    assert_eq!(errors.len(), 1);
    assert_eq!(
        errors.payloads()[0].payload,
        execution::Error::ReplayInputSize {
            name:     "x".into(),
            expected: 1,
            actual:   0,
        }
    );
    assert_eq!(executor.states().count(), 0);

    Ok(())
}

#[test]
fn watchdog_stops_the_run_and_flushes_live_states() -> anyhow::Result<()> {
    let watchdog = FlagWatchdog::new(Arc::new(AtomicBool::new(true))).polling_every(1);
    let mut executor =
        common::new_executor_with_watchdog(less_than_ten(), Config::default(), watchdog.in_rc())?;
    let errors = executor.run().err().ok_or_else(|| anyhow::anyhow!("run did not fail"))?;

    assert!(errors
        .payloads()
        .iter()
        .any(|e| e.payload == execution::Error::StoppedByWatchdog));
    assert_eq!(executor.states().count(), 0);

    let test_cases = common::test_cases(&executor)?;
    assert_eq!(test_cases.len(), 1);
    assert_eq!(
        test_cases[0].termination,
        Termination::Early {
            reason: "execution halting".into(),
        }
    );

    Ok(())
}

/// Builds a program where one side of a symbolic branch jumps straight to the
/// join block and the other sets a flag on its way there. The join block
/// checks that the flag was set exactly on the paths that took the detour.
fn diamond() -> Program {
    let mut builder = ProgramBuilder::new();
    let input = builder.add_global("input", 1, None, false);
    let flag = builder.add_global("flag", 1, Some(vec![0]), false);
    let main = builder.declare_function("main", 0, false);

    let mut body = builder.define(main);
    let (input, flag) = (body.global(input), body.global(flag));
    common::symbolic_global(&mut body, input, "x");
    let x = body.load(input, 8);
    let ten = body.int(10, 8);
    let small = body.icmp(IntPredicate::Ult, x, ten);
    let (join, detour) = (body.block(), body.block());
    body.cond_br(small, join, detour);

    body.switch_to(detour);
    let one = body.int(1, 8);
    body.store(flag, one);
    body.br(join);

    body.switch_to(join);
    let value = body.load(flag, 8);
    let zero = body.int(0, 8);
    let set = body.icmp(IntPredicate::Ne, value, zero);
    let large = body.icmp(IntPredicate::Uge, x, ten);
    let consistent = body.icmp(IntPredicate::Eq, set, large);
    body.intrinsic_void(Intrinsic::Assert { message: "flag follows x".into() }, vec![consistent]);
    body.ret(None);
    body.finish();

    builder.build(main)
}

#[test]
fn states_meeting_at_a_join_point_are_merged() -> anyhow::Result<()> {
    let mut executor = common::new_executor(diamond(), Config::default())?;
    let test_cases = common::run(&mut executor)?;
    assert!(executor.errors().is_empty(), "{}", executor.errors());
    assert_eq!(test_cases.len(), 2);
    assert_eq!(common::count(&test_cases, |t| *t == Termination::Exit), 2);

    // The merged state has to keep the flag written by the detour on that
    // side only, or the assertion at the join fails.
    let config = Config::default().with_merge_at_join_points(true);
    let mut executor = common::new_executor(diamond(), config)?;
    let test_cases = common::run(&mut executor)?;

    assert!(executor.errors().is_empty(), "{}", executor.errors());
    assert_eq!(test_cases.len(), 1);
    assert_eq!(test_cases[0].termination, Termination::Exit);
    assert_eq!(executor.statistics().forks, 1);

    Ok(())
}
