//! This module is an integration test that checks calls from the program
//! under test to functions implemented by the host.
#![cfg(test)]

use symbolic_executor::{
    error::execution::ErrorKind,
    external::FunctionTableDispatcher,
    program::{Callee, IntPredicate, Intrinsic, Program, ProgramBuilder},
    sink::Termination,
    vm::Config,
};

mod common;

/// Builds a program that passes `argument` through the host function
/// `add_one` and asserts on the result. When `symbolic` is set, the argument
/// is a symbolic byte instead.
fn add_one(symbolic: bool) -> Program {
    let mut builder = ProgramBuilder::new();
    let input = builder.add_global("input", 1, None, false);
    let main = builder.declare_function("main", 0, false);
    let host = builder.declare_external("add_one", 1, false, Some(32));

    let mut body = builder.define(main);
    let argument = if symbolic {
        let input = body.global(input);
        common::symbolic_global(&mut body, input, "x");
        body.load(input, 8)
    } else {
        body.int(41, 32)
    };
    let result = body.call(Callee::Function(host), vec![argument]);
    let expected = body.int(42, 32);
    let same = body.icmp(IntPredicate::Eq, result, expected);
    body.intrinsic_void(Intrinsic::Assert { message: "host result".into() }, vec![same]);
    body.ret(None);
    body.finish();

    builder.build(main)
}

fn dispatcher() -> Box<FunctionTableDispatcher> {
    Box::new(
        FunctionTableDispatcher::new()
            .with_function("add_one", |args, _| Ok(Some(args[0].wrapping_add(1)))),
    )
}

#[test]
fn host_functions_receive_concrete_arguments() -> anyhow::Result<()> {
    let mut executor =
        common::new_executor(add_one(false), Config::default())?.with_dispatcher(dispatcher());
    let test_cases = common::run(&mut executor)?;

    assert!(executor.errors().is_empty(), "{}", executor.errors());
    assert_eq!(test_cases.len(), 1);
    assert_eq!(test_cases[0].termination, Termination::Exit);

    Ok(())
}

#[test]
fn external_calls_can_be_disallowed() -> anyhow::Result<()> {
    let config = Config::default().with_allow_external_calls(false);
    let mut executor = common::new_executor(add_one(false), config)?.with_dispatcher(dispatcher());
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 1);
    assert_eq!(
        test_cases[0].termination,
        Termination::Error {
            kind:    ErrorKind::External,
            message: "external calls disallowed: add_one".into(),
        }
    );

    Ok(())
}

#[test]
fn symbolic_arguments_are_rejected_unless_allowed() -> anyhow::Result<()> {
    let mut executor =
        common::new_executor(add_one(true), Config::default())?.with_dispatcher(dispatcher());
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 1);
    assert_eq!(
        test_cases[0].termination.tag(),
        "error:external",
        "{:?}",
        test_cases[0].termination
    );

    // Concretizing the argument picks one value, so the call goes through
    // but the assertion on its result may fail.
    let config = Config::default().with_allow_symbolic_external_arguments(true);
    let mut executor = common::new_executor(add_one(true), config)?.with_dispatcher(dispatcher());
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 1);
    let termination = &test_cases[0].termination;
    assert!(
        *termination == Termination::Exit || termination.tag() == "error:assert",
        "{termination:?}"
    );
    assert_eq!(test_cases[0].constraints.len(), 1);

    Ok(())
}

#[test]
fn unknown_host_functions_fail_the_state() -> anyhow::Result<()> {
    let mut executor = common::new_executor(add_one(false), Config::default())?;
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 1);
    assert_eq!(
        test_cases[0].termination,
        Termination::Error {
            kind:    ErrorKind::External,
            message: "failed external call: add_one".into(),
        }
    );

    Ok(())
}

#[test]
fn host_writes_to_memory_are_copied_back() -> anyhow::Result<()> {
    let mut builder = ProgramBuilder::new();
    let main = builder.declare_function("main", 0, false);
    let poke = builder.declare_external("poke", 1, false, None);

    let mut body = builder.define(main);
    let one = body.int(1, 64);
    let object = body.intrinsic(Intrinsic::Malloc, vec![one]);
    body.call_void(Callee::Function(poke), vec![object]);
    let value = body.load(object, 8);
    let seven = body.int(7, 8);
    let same = body.icmp(IntPredicate::Eq, value, seven);
    body.intrinsic_void(Intrinsic::Assert { message: "host wrote".into() }, vec![same]);
    body.ret(None);
    body.finish();

    let dispatcher = FunctionTableDispatcher::new().with_function("poke", |args, memory| {
        memory.write(args[0], &[7])?;
        Ok(None)
    });
    let mut executor = common::new_executor(builder.build(main), Config::default())?
        .with_dispatcher(Box::new(dispatcher));
    let test_cases = common::run(&mut executor)?;

    assert!(executor.errors().is_empty(), "{}", executor.errors());
    assert_eq!(test_cases.len(), 1);
    assert_eq!(test_cases[0].termination, Termination::Exit);

    Ok(())
}
