//! This module contains common utilities for simplifying the writing of
//! integration tests for this library.

#![cfg(test)]

use anyhow::anyhow;
use symbolic_executor::{
    program::{FunctionBuilder, Intrinsic, Operand, Program, ProgramBuilder},
    sink::{MemorySink, TestCase, Termination},
    solver::{EnumerationConfig, EnumerationSolver},
    vm::{Config, Executor},
    watchdog::{DynWatchdog, LazyWatchdog},
};

/// Constructs a new executor for `program` using the enumeration solver and a
/// watchdog that never stops it.
#[allow(unused)] // It is actually
pub fn new_executor(program: Program, config: Config) -> anyhow::Result<Executor> {
    new_executor_with_watchdog(program, config, LazyWatchdog.in_rc())
}

/// Constructs a new executor for `program` that is monitored by `watchdog`.
#[allow(unused)] // It is actually
pub fn new_executor_with_watchdog(
    program: Program,
    config: Config,
    watchdog: DynWatchdog,
) -> anyhow::Result<Executor> {
    let solver = Box::new(EnumerationSolver::new(EnumerationConfig::default()));
    Executor::new(program, config, solver, watchdog).map_err(|e| anyhow!("{e}"))
}

/// Runs `executor` to completion and gets the test cases it produced.
#[allow(unused)] // It is actually
pub fn run(executor: &mut Executor) -> anyhow::Result<Vec<TestCase>> {
    executor.run().map_err(|e| anyhow!("{e}"))?;
    test_cases(executor)
}

/// Gets the test cases collected by the default sink of `executor`.
#[allow(unused)] // It is actually
pub fn test_cases(executor: &Executor) -> anyhow::Result<Vec<TestCase>> {
    let sink = executor
        .sink_as::<MemorySink>()
        .ok_or_else(|| anyhow!("executor does not use a memory sink"))?;
    Ok(sink.test_cases().to_vec())
}

/// Makes the one-byte global at `global` a symbolic input called `name`.
///
/// Globals live away from the heap, so the input never aliases the objects
/// that a test allocates.
#[allow(unused)] // It is actually
pub fn symbolic_global(body: &mut FunctionBuilder<'_>, global: Operand, name: &str) {
    let one = body.int(1, 64);
    body.intrinsic_void(
        Intrinsic::MakeSymbolic { name: name.into() },
        vec![global, one],
    );
}

/// Builds a program whose entry function `main` takes no arguments, and whose
/// body is produced by `build`, which receives a one-byte global to use as a
/// symbolic input.
#[allow(unused)] // It is actually
pub fn program_with_input(
    build: impl FnOnce(&mut FunctionBuilder<'_>, Operand),
) -> Program {
    let mut builder = ProgramBuilder::new();
    let input = builder.add_global("input", 1, None, false);
    let main = builder.declare_function("main", 0, false);
    let mut body = builder.define(main);
    let input = body.global(input);
    build(&mut body, input);
    body.finish();
    builder.build(main)
}

/// Counts the test cases that ended with `termination`.
#[allow(unused)] // It is actually
pub fn count(test_cases: &[TestCase], predicate: impl Fn(&Termination) -> bool) -> usize {
    test_cases.iter().filter(|t| predicate(&t.termination)).count()
}
