//! This module is an integration test that checks the cooperative threads of
//! the program under test, and how the executor schedules them.
#![cfg(test)]

use symbolic_executor::{
    error::execution::ErrorKind,
    program::{IntPredicate, Intrinsic, Program, ProgramBuilder},
    sink::Termination,
    vm::Config,
};

mod common;

/// Builds a program whose main thread starts a worker and sleeps until the
/// worker has stored its answer into a global and woken it up.
fn handshake() -> Program {
    let mut builder = ProgramBuilder::new();
    let shared = builder.add_global("shared", 4, None, false);
    let main = builder.declare_function("main", 0, false);
    let worker = builder.declare_function("worker", 1, false);

    let mut body = builder.define(worker);
    let list = body.param(0);
    let target = body.global(shared);
    let answer = body.int(42, 32);
    body.store(target, answer);
    body.intrinsic_void(Intrinsic::ThreadNotify { all: false }, vec![list]);
    body.intrinsic_void(Intrinsic::ThreadExit, vec![]);
    body.ret(None);
    body.finish();

    let mut body = builder.define(main);
    let list = body.intrinsic(Intrinsic::GetWaitList, vec![]);
    let start = body.function_pointer(worker);
    body.intrinsic(Intrinsic::ThreadCreate, vec![start, list]);
    body.intrinsic_void(Intrinsic::ThreadSleep, vec![list]);
    let source = body.global(shared);
    let value = body.load(source, 32);
    let answer = body.int(42, 32);
    let same = body.icmp(IntPredicate::Eq, value, answer);
    body.intrinsic_void(Intrinsic::Assert { message: "worker ran".into() }, vec![same]);
    body.ret(None);
    body.finish();

    builder.build(main)
}

#[test]
fn sleeping_thread_is_woken_by_notify() -> anyhow::Result<()> {
    let mut executor = common::new_executor(handshake(), Config::default())?;
    let test_cases = common::run(&mut executor)?;

    assert!(executor.errors().is_empty(), "{}", executor.errors());
    assert_eq!(test_cases.len(), 1);
    assert_eq!(test_cases[0].termination, Termination::Exit);

    Ok(())
}

#[test]
fn sleeping_without_a_waker_is_a_deadlock() -> anyhow::Result<()> {
    let program = common::program_with_input(|body, _| {
        let list = body.intrinsic(Intrinsic::GetWaitList, vec![]);
        body.intrinsic_void(Intrinsic::ThreadSleep, vec![list]);
        body.ret(None);
    });
    let mut executor = common::new_executor(program, Config::default())?;
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 1);
    match &test_cases[0].termination {
        Termination::Error { kind, message } => {
            assert_eq!(*kind, ErrorKind::Deadlock);
            assert_eq!(message, "hang (possible deadlock?)");
        }
        other => anyhow::bail!("unexpected termination {other:?}"),
    }

    Ok(())
}

/// Builds a program whose main thread starts a worker that returns at once,
/// and then yields.
fn yielding_main() -> Program {
    let mut builder = ProgramBuilder::new();
    let main = builder.declare_function("main", 0, false);
    let worker = builder.declare_function("worker", 1, false);

    let mut body = builder.define(worker);
    body.ret(None);
    body.finish();

    let mut body = builder.define(main);
    let start = body.function_pointer(worker);
    let argument = body.int(0, 64);
    body.intrinsic(Intrinsic::ThreadCreate, vec![start, argument]);
    body.intrinsic_void(Intrinsic::ThreadYield, vec![]);
    body.ret(None);
    body.finish();

    builder.build(main)
}

#[test]
fn yield_runs_the_next_thread() -> anyhow::Result<()> {
    let mut executor = common::new_executor(yielding_main(), Config::default())?;
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 1);
    assert_eq!(test_cases[0].termination, Termination::Exit);
    assert_eq!(executor.statistics().forks, 0);

    Ok(())
}

#[test]
fn schedules_fork_once_per_runnable_thread() -> anyhow::Result<()> {
    let config = Config::default().with_fork_on_schedule(true);
    let mut executor = common::new_executor(yielding_main(), config)?;
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 2);
    assert_eq!(common::count(&test_cases, |t| *t == Termination::Exit), 2);
    assert_eq!(executor.statistics().forks, 1);

    Ok(())
}

#[test]
fn thread_functions_must_be_defined() -> anyhow::Result<()> {
    let mut builder = ProgramBuilder::new();
    let main = builder.declare_function("main", 0, false);
    let host = builder.declare_external("host", 1, false, None);
    let mut body = builder.define(main);
    let start = body.function_pointer(host);
    let argument = body.int(0, 64);
    body.intrinsic(Intrinsic::ThreadCreate, vec![start, argument]);
    body.ret(None);
    body.finish();

    let mut executor = common::new_executor(builder.build(main), Config::default())?;
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 1);
    assert_eq!(
        test_cases[0].termination,
        Termination::Error {
            kind:    ErrorKind::User,
            message: "invalid thread start function".into(),
        }
    );

    Ok(())
}
