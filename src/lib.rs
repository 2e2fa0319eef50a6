//! This library implements the core of a state-forking symbolic executor for
//! a small, typed, register-based intermediate representation.
//!
//! Program inputs are modelled as symbolic byte arrays. Whenever execution
//! reaches a branch whose condition can go either way, the execution state is
//! cloned cheaply (memory is copy-on-write) and each copy continues under the
//! corresponding path constraint. Every terminated state produces a test case
//! of concrete inputs that drives the program down the same path.
//!
//! # How it Works
//!
//! From a very high level, exploration is performed as follows:
//!
//! 1. A [`program::Program`] is built (usually through a
//!    [`program::ProgramBuilder`]) and validated.
//! 2. The [`vm::Executor`] creates the initial [`vm::state::ExecutionState`],
//!    binding the program's globals into its
//!    [`memory::AddressSpace`].
//! 3. The [`searcher::Searcher`] repeatedly picks a live state, and the
//!    executor runs one instruction of it. Branches consult the
//!    [`solver::TimingSolver`] and fork the state where both directions are
//!    feasible.
//! 4. Terminated states are handed to a [`sink::TestCaseSink`] as
//!    [`sink::TestCase`]s, together with inputs solved from their path
//!    constraints.
//!
//! # Basic Usage
//!
//! ```
//! use symbolic_executor::{
//!     program::{IntPredicate, Intrinsic, ProgramBuilder},
//!     solver::{EnumerationConfig, EnumerationSolver},
//!     vm::{Config, Executor},
//!     watchdog::LazyWatchdog,
//! };
//!
//! let mut builder = ProgramBuilder::new();
//! let main = builder.declare_function("main", 0, false);
//! let mut body = builder.define(main);
//! let one = body.int(1, 64);
//! let buffer = body.intrinsic(Intrinsic::Malloc, vec![one]);
//! body.intrinsic_void(Intrinsic::MakeSymbolic { name: "x".into() }, vec![buffer, one]);
//! let x = body.load(buffer, 8);
//! let ten = body.int(10, 8);
//! let small = body.icmp(IntPredicate::Ult, x, ten);
//! let (if_small, if_large) = (body.block(), body.block());
//! body.cond_br(small, if_small, if_large);
//! body.switch_to(if_small);
//! body.ret(None);
//! body.switch_to(if_large);
//! body.ret(None);
//! body.finish();
//!
//! let solver = Box::new(EnumerationSolver::new(EnumerationConfig::default()));
//! let mut executor =
//!     Executor::new(builder.build(main), Config::default(), solver, LazyWatchdog.in_rc())
//!         .unwrap();
//! executor.run().unwrap();
//!
//! assert_eq!(executor.statistics().test_cases, 2);
//! ```

#![warn(clippy::all, clippy::cargo, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)] // Allows for better API naming

pub mod constant;
pub mod data;
pub mod error;
pub mod expr;
pub mod external;
pub mod memory;
pub mod process_tree;
pub mod program;
pub mod searcher;
pub mod sink;
pub mod solver;
pub mod vm;
pub mod watchdog;

// Re-exports to provide the library interface.
pub use vm::{Config, Executor};
