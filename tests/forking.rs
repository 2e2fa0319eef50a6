//! This module is an integration test that checks how the executor forks
//! states on symbolic branches, and the policies that restrict forking.
#![cfg(test)]

use std::time::Duration;

use symbolic_executor::{
    error::execution,
    program::{BinaryOp, Callee, IntPredicate, Program, ProgramBuilder},
    sink::{Solution, Termination},
    vm::Config,
};

mod common;

/// Builds `if x < 10 { return } else { return }` over a symbolic byte `x`,
/// preceded by `constant_branches` branches on constant true conditions.
fn less_than_ten(constant_branches: usize) -> Program {
    common::program_with_input(|body, input| {
        for _ in 0..constant_branches {
            let yes = body.int(1, 1);
            let next = body.block();
            let dead = body.block();
            body.cond_br(yes, next, dead);
            body.switch_to(dead);
            body.unreachable();
            body.switch_to(next);
        }

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

fn input_byte(solution: &Solution) -> anyhow::Result<u8> {
    solution
        .input("x")
        .and_then(|bytes| bytes.first().copied())
        .ok_or_else(|| anyhow::anyhow!("no value for x in {solution:?}"))
}

#[test]
fn forks_on_unconstrained_comparison() -> anyhow::Result<()> {
    let mut executor = common::new_executor(less_than_ten(0), Config::default())?;
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 2);
    assert_eq!(executor.statistics().forks, 1);
    assert!(executor.errors().is_empty());

    let small = test_cases
        .iter()
        .find(|t| t.path == vec![true])
        .ok_or_else(|| anyhow::anyhow!("no state took the true side"))?;
    let large = test_cases
        .iter()
        .find(|t| t.path == vec![false])
        .ok_or_else(|| anyhow::anyhow!("no state took the false side"))?;

    assert_eq!(small.termination, Termination::Exit);
    assert_eq!(large.termination, Termination::Exit);
    assert!(input_byte(&small.solution)? < 10);
    assert!(input_byte(&large.solution)? >= 10);
    assert_eq!(small.constraints.len(), 1);
    assert_eq!(large.constraints.len(), 1);

    Ok(())
}

#[test]
fn constant_conditions_do_not_fork_or_query() -> anyhow::Result<()> {
    let program = common::program_with_input(|body, _| {
        let three = body.int(3, 32);
        let ten = body.int(10, 32);
        let small = body.icmp(IntPredicate::Ult, three, ten);
        let (if_small, if_large) = (body.block(), body.block());
        body.cond_br(small, if_small, if_large);
        body.switch_to(if_small);
        body.ret(None);
        body.switch_to(if_large);
        body.unreachable();
    });
    let mut executor = common::new_executor(program, Config::default())?;
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 1);
    assert_eq!(test_cases[0].termination, Termination::Exit);
    assert_eq!(test_cases[0].path, vec![true]);
    assert_eq!(executor.statistics().forks, 0);
    assert_eq!(executor.solver().queries(), 0);

    Ok(())
}

#[test]
fn fork_cap_continues_with_a_single_state() -> anyhow::Result<()> {
    let config = Config::default().with_max_forks(Some(0));
    let mut executor = common::new_executor(less_than_ten(0), config)?;
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 1);
    assert_eq!(test_cases[0].termination, Termination::Exit);
    assert_eq!(test_cases[0].path.len(), 1);
    assert_eq!(executor.statistics().forks, 0);

    // The side that was picked still carries its constraint.
    let x = input_byte(&test_cases[0].solution)?;
    assert_eq!(test_cases[0].path[0], x < 10);

    Ok(())
}

#[test]
fn replay_follows_a_recorded_path() -> anyhow::Result<()> {
    let mut executor =
        common::new_executor(less_than_ten(1), Config::default())?.with_replay_path(vec![true, false]);
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 1);
    assert_eq!(test_cases[0].path, vec![true, false]);
    assert!(input_byte(&test_cases[0].solution)? >= 10);

    Ok(())
}

#[test]
fn replay_contradicting_a_proved_branch_is_fatal() -> anyhow::Result<()> {
    // The first branch is on a constant true condition, so replaying `false`
    // for it cannot be honored.
    let mut executor =
        common::new_executor(less_than_ten(1), Config::default())?.with_replay_path(vec![false, true]);
    let errors = executor.run().err().ok_or_else(|| anyhow::anyhow!("run did not fail"))?;

    assert_eq!(errors.len(), 1);
    assert_eq!(errors.payloads()[0].payload, execution::Error::ReplayInvalidBranch);
    assert_eq!(executor.states().count(), 0);

    Ok(())
}

#[test]
fn running_out_of_replay_directions_is_fatal() -> anyhow::Result<()> {
    let mut executor =
        common::new_executor(less_than_ten(1), Config::default())?.with_replay_path(vec![true]);
    let errors = executor.run().err().ok_or_else(|| anyhow::anyhow!("run did not fail"))?;

    assert!(errors
        .payloads()
        .iter()
        .any(|e| e.payload == execution::Error::ReplayPathExhausted));

    Ok(())
}

#[test]
fn live_state_count_follows_step_reports() -> anyhow::Result<()> {
    let program = common::program_with_input(|body, input| {
        common::symbolic_global(body, input, "x");
        let x = body.load(input, 8);
        let cases: Vec<(u64, _)> = (0..3).map(|v| (v, body.block())).collect();
        let default = body.block();
        body.switch(x, default, cases.clone());
        for (_, block) in cases {
            body.switch_to(block);
            body.ret(None);
        }
        body.switch_to(default);
        body.ret(None);
    });
    let mut executor = common::new_executor(program, Config::default())?;

    let mut live = executor.states().count();
    while let Some(report) = executor.step().map_err(|e| anyhow::anyhow!("{e}"))? {
        for id in &report.removed {
            assert!(executor.state(*id).is_none());
            assert!(!report.added.contains(id));
        }
        live = live + report.added.len() - report.removed.len();
        assert_eq!(executor.states().count(), live);
    }

    assert_eq!(live, 0);
    let test_cases = common::test_cases(&executor)?;
    assert_eq!(test_cases.len(), 4);
    assert_eq!(common::count(&test_cases, |t| *t == Termination::Exit), 4);

    Ok(())
}

#[test]
fn depth_limit_terminates_both_sides() -> anyhow::Result<()> {
    let program = common::program_with_input(|body, input| {
        common::symbolic_global(body, input, "x");
        let x = body.load(input, 8);
        let mut bit = 1;
        for _ in 0..3 {
            let mask = body.int(bit, 8);
            let set = body.binary(BinaryOp::And, x, mask);
            let zero = body.int(0, 8);
            let is_set = body.icmp(IntPredicate::Ne, set, zero);
            let next = body.block();
            body.cond_br(is_set, next, next);
            body.switch_to(next);
            bit <<= 1;
        }
        body.ret(None);
    });
    let config = Config::default().with_max_depth(1);
    let mut executor = common::new_executor(program, config)?;
    let test_cases = common::run(&mut executor)?;

    // The very first fork already reaches the limit, so both of its sides
    // stop there.
    assert_eq!(test_cases.len(), 2);
    assert_eq!(executor.statistics().forks, 1);
    assert!(test_cases
        .iter()
        .all(|t| t.termination == Termination::Early { reason: "max-depth exceeded".into() }));
    assert!(test_cases.iter().all(|t| t.path.len() == 1));

    Ok(())
}

#[test]
fn solver_timeouts_end_the_state_early() -> anyhow::Result<()> {
    let config = Config::default().with_solver_timeout(Some(Duration::ZERO));
    let mut executor = common::new_executor(less_than_ten(0), config)?;
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 1);
    assert_eq!(
        test_cases[0].termination,
        Termination::Early {
            reason: "query timed out".into(),
        }
    );
    assert_eq!(test_cases[0].solution, Solution::SolverFailure);
    assert!(executor.errors().is_empty(), "{}", executor.errors());

    Ok(())
}

/// Builds a program that calls through a pointer to one of two functions,
/// picked by a symbolic byte.
fn indirect_call() -> Program {
    let mut builder = ProgramBuilder::new();
    let input = builder.add_global("input", 1, None, false);
    let main = builder.declare_function("main", 0, false);
    let first = builder.declare_function("first", 0, false);
    let second = builder.declare_function("second", 0, false);
    for function in [first, second] {
        let mut body = builder.define(function);
        body.ret(None);
        body.finish();
    }

    let mut body = builder.define(main);
    let input = body.global(input);
    common::symbolic_global(&mut body, input, "x");
    let x = body.load(input, 8);
    let zero = body.int(0, 8);
    let pick_first = body.icmp(IntPredicate::Eq, x, zero);
    let (first, second) = (body.function_pointer(first), body.function_pointer(second));
    let target = body.select(pick_first, first, second);
    body.call_void(Callee::Pointer(target), vec![]);
    body.ret(None);
    body.finish();

    builder.build(main)
}

#[test]
fn symbolic_function_pointers_call_every_target() -> anyhow::Result<()> {
    let mut executor = common::new_executor(indirect_call(), Config::default())?;
    let test_cases = common::run(&mut executor)?;

    assert!(executor.errors().is_empty(), "{}", executor.errors());
    assert_eq!(test_cases.len(), 2);
    assert_eq!(common::count(&test_cases, |t| *t == Termination::Exit), 2);

    let config = Config::default().with_max_resolutions(1);
    let mut executor = common::new_executor(indirect_call(), config)?;
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 2);
    assert_eq!(common::count(&test_cases, |t| *t == Termination::Exit), 1);
    assert_eq!(
        common::count(&test_cases, |t| *t
            == Termination::Early {
                reason: "query timed out (resolve)".into(),
            }),
        1
    );

    Ok(())
}
