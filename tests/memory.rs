//! This module is an integration test that checks the memory model of the
//! executor: copy-on-write sharing between forked states, pointer resolution
//! and the errors raised for invalid accesses.
#![cfg(test)]

use symbolic_executor::{
    error::execution::ErrorKind,
    program::{BinaryOp, CastOp, IntPredicate, Intrinsic, Program, ProgramBuilder},
    sink::Termination,
    vm::Config,
};

mod common;

fn error_kind(termination: &Termination) -> Option<ErrorKind> {
    match termination {
        Termination::Error { kind, .. } => Some(*kind),
        _ => None,
    }
}

#[test]
fn forked_states_do_not_see_each_others_writes() -> anyhow::Result<()> {
    let program = common::program_with_input(|body, input| {
        let eight = body.int(8, 64);
        let object = body.intrinsic(Intrinsic::Malloc, vec![eight]);
        let original = body.int(0x1122_3344, 32);
        body.store(object, original);

        common::symbolic_global(body, input, "x");
        let x = body.load(input, 8);
        let ten = body.int(10, 8);
        let small = body.icmp(IntPredicate::Ult, x, ten);
        let (writer, reader) = (body.block(), body.block());
        body.cond_br(small, writer, reader);

        body.switch_to(writer);
        let changed = body.int(0x55, 32);
        body.store(object, changed);
        let value = body.load(object, 32);
        let same = body.icmp(IntPredicate::Eq, value, changed);
        body.intrinsic_void(
            Intrinsic::Assert { message: "writer sees its write".into() },
            vec![same],
        );
        body.ret(None);

        body.switch_to(reader);
        let value = body.load(object, 32);
        let same = body.icmp(IntPredicate::Eq, value, original);
        body.intrinsic_void(
            Intrinsic::Assert { message: "reader sees the original".into() },
            vec![same],
        );
        body.ret(None);
    });
    let mut executor = common::new_executor(program, Config::default())?;
    let test_cases = common::run(&mut executor)?;

    assert!(executor.errors().is_empty(), "{}", executor.errors());
    assert_eq!(test_cases.len(), 2);
    assert_eq!(common::count(&test_cases, |t| *t == Termination::Exit), 2);

    Ok(())
}

#[test]
fn symbolic_offsets_past_the_end_are_reported() -> anyhow::Result<()> {
    let program = common::program_with_input(|body, input| {
        let four = body.int(4, 64);
        let object = body.intrinsic(Intrinsic::Malloc, vec![four]);

        common::symbolic_global(body, input, "x");
        let x = body.load(input, 8);
        let index = body.cast(CastOp::ZExt, x, 64);
        let address = body.gep(object, vec![(index, 1)], 0);
        body.load(address, 8);
        body.ret(None);
    });
    let mut executor = common::new_executor(program, Config::default())?;
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 2);
    assert_eq!(common::count(&test_cases, |t| *t == Termination::Exit), 1);

    let error = test_cases
        .iter()
        .find(|t| t.termination.is_error())
        .ok_or_else(|| anyhow::anyhow!("no error was reported"))?;
    assert_eq!(error_kind(&error.termination), Some(ErrorKind::Pointer));
    assert_eq!(error.termination.tag(), "error:ptr");
    let x = error
        .solution
        .input("x")
        .and_then(|b| b.first().copied())
        .ok_or_else(|| anyhow::anyhow!("no value for x"))?;
    assert!(x >= 4);
    assert!(error.details.as_deref().map_or(false, |d| d.contains("address:")));

    assert_eq!(executor.errors().len(), 1);

    Ok(())
}

/// Builds a program that loads through a pointer to one of two objects, picked
/// by a symbolic byte, and checks that the right object was read.
fn two_candidate_load() -> Program {
    common::program_with_input(|body, input| {
        let eight = body.int(8, 64);
        let first = body.intrinsic(Intrinsic::Malloc, vec![eight]);
        let second = body.intrinsic(Intrinsic::Malloc, vec![eight]);
        let one = body.int(1, 8);
        let two = body.int(2, 8);
        body.store(first, one);
        body.store(second, two);

        common::symbolic_global(body, input, "x");
        let x = body.load(input, 8);
        let zero = body.int(0, 8);
        let pick_first = body.icmp(IntPredicate::Eq, x, zero);
        let pointer = body.select(pick_first, first, second);
        let value = body.load(pointer, 8);
        let expected = body.select(pick_first, one, two);
        let same = body.icmp(IntPredicate::Eq, value, expected);
        body.intrinsic_void(Intrinsic::Assert { message: "right object".into() }, vec![same]);
        body.ret(None);
    })
}

#[test]
fn symbolic_pointers_resolve_to_every_object_they_may_point_to() -> anyhow::Result<()> {
    let mut executor = common::new_executor(two_candidate_load(), Config::default())?;
    let test_cases = common::run(&mut executor)?;

    assert!(executor.errors().is_empty(), "{}", executor.errors());
    assert_eq!(test_cases.len(), 2);
    assert_eq!(common::count(&test_cases, |t| *t == Termination::Exit), 2);

    Ok(())
}

#[test]
fn resolution_cap_stops_at_the_first_object() -> anyhow::Result<()> {
    let config = Config::default().with_max_resolutions(1);
    let mut executor = common::new_executor(two_candidate_load(), config)?;
    let test_cases = common::run(&mut executor)?;

    assert!(executor.errors().is_empty(), "{}", executor.errors());
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

#[test]
fn writes_to_read_only_globals_fail() -> anyhow::Result<()> {
    let mut builder = ProgramBuilder::new();
    let table = builder.add_global("table", 4, Some(vec![1, 2, 3, 4]), true);
    let main = builder.declare_function("main", 0, false);
    let mut body = builder.define(main);
    let table = body.global(table);
    let value = body.load(table, 8);
    let one = body.int(1, 8);
    let same = body.icmp(IntPredicate::Eq, value, one);
    body.intrinsic_void(Intrinsic::Assert { message: "initializer".into() }, vec![same]);
    let zero = body.int(0, 8);
    body.store(table, zero);
    body.ret(None);
    body.finish();

    let mut executor = common::new_executor(builder.build(main), Config::default())?;
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 1);
    assert_eq!(error_kind(&test_cases[0].termination), Some(ErrorKind::ReadOnly));

    Ok(())
}

#[test]
fn division_by_a_possible_zero_forks_an_error() -> anyhow::Result<()> {
    let program = common::program_with_input(|body, input| {
        common::symbolic_global(body, input, "x");
        let x = body.load(input, 8);
        let hundred = body.int(100, 8);
        body.binary(BinaryOp::UDiv, hundred, x);
        body.ret(None);
    });
    let mut executor = common::new_executor(program, Config::default())?;
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 2);
    let error = test_cases
        .iter()
        .find(|t| t.termination.is_error())
        .ok_or_else(|| anyhow::anyhow!("no error was reported"))?;
    assert_eq!(error_kind(&error.termination), Some(ErrorKind::Division));
    assert_eq!(error.solution.input("x"), Some(&[0u8][..]));

    // Internal checks leave no trace in the recorded path.
    assert!(test_cases.iter().all(|t| t.path.is_empty()));

    let config = Config::default().with_check_division_by_zero(false);
    let program = common::program_with_input(|body, input| {
        common::symbolic_global(body, input, "x");
        let x = body.load(input, 8);
        let hundred = body.int(100, 8);
        body.binary(BinaryOp::UDiv, hundred, x);
        body.ret(None);
    });
    let mut executor = common::new_executor(program, config)?;
    let test_cases = common::run(&mut executor)?;
    assert_eq!(test_cases.len(), 1);
    assert_eq!(test_cases[0].termination, Termination::Exit);

    Ok(())
}

#[test]
fn freeing_stack_memory_is_an_error() -> anyhow::Result<()> {
    let program = common::program_with_input(|body, _| {
        let one = body.int(1, 64);
        let local = body.alloca(4, one);
        body.intrinsic_void(Intrinsic::Free, vec![local]);
        body.ret(None);
    });
    let mut executor = common::new_executor(program, Config::default())?;
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 1);
    assert_eq!(error_kind(&test_cases[0].termination), Some(ErrorKind::Free));

    Ok(())
}

#[test]
fn realloc_keeps_the_contents() -> anyhow::Result<()> {
    let program = common::program_with_input(|body, _| {
        let two = body.int(2, 64);
        let object = body.intrinsic(Intrinsic::Malloc, vec![two]);
        let value = body.int(0xbeef, 16);
        body.store(object, value);
        let sixteen = body.int(16, 64);
        let moved = body.intrinsic(Intrinsic::Realloc, vec![object, sixteen]);
        let loaded = body.load(moved, 16);
        let same = body.icmp(IntPredicate::Eq, loaded, value);
        body.intrinsic_void(Intrinsic::Assert { message: "contents moved".into() }, vec![same]);
        let tail = body.gep(moved, vec![], 15);
        let last = body.int(7, 8);
        body.store(tail, last);
        body.intrinsic_void(Intrinsic::Free, vec![moved]);
        body.ret(None);
    });
    let mut executor = common::new_executor(program, Config::default())?;
    let test_cases = common::run(&mut executor)?;

    assert!(executor.errors().is_empty(), "{}", executor.errors());
    assert_eq!(test_cases.len(), 1);
    assert_eq!(test_cases[0].termination, Termination::Exit);

    Ok(())
}

#[test]
fn use_after_free_is_an_invalid_pointer() -> anyhow::Result<()> {
    let program = common::program_with_input(|body, _| {
        let two = body.int(2, 64);
        let object = body.intrinsic(Intrinsic::Malloc, vec![two]);
        body.intrinsic_void(Intrinsic::Free, vec![object]);
        body.intrinsic_void(Intrinsic::Free, vec![object]);
        body.ret(None);
    });
    let mut executor = common::new_executor(program, Config::default())?;
    let test_cases = common::run(&mut executor)?;

    assert_eq!(test_cases.len(), 1);
    match &test_cases[0].termination {
        Termination::Error { kind, message } => {
            assert_eq!(*kind, ErrorKind::Pointer);
            assert_eq!(message, "memory error: invalid pointer: free");
        }
        other => anyhow::bail!("unexpected termination {other:?}"),
    }

    Ok(())
}
