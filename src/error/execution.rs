//! This module contains errors pertaining to the symbolic execution of a
//! program.
//!
//! Most of these errors are local to a single execution state: they terminate
//! that state and are reported as a test case, while exploration of every
//! other state continues. The remainder are fatal and abort the whole run.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    error::container,
    program::{InstructionRef, Register},
};

/// The class of an execution error, used to tag the test cases produced for
/// states that terminate with an error.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid memory accesses.
    Pointer,

    /// Writes to read-only memory.
    ReadOnly,

    /// Invalid deallocations.
    Free,

    /// Division by zero.
    Division,

    /// Instructions that cannot be executed.
    Execution,

    /// Limitations of the model of the program or its environment.
    Model,

    /// Failures of calls to functions implemented by the host.
    External,

    /// Misuse of the intrinsics by the program under test.
    User,

    /// Explicit calls to abort.
    Abort,

    /// Failed assertions.
    Assert,

    /// Scheduling of the program's threads reached a dead end.
    Deadlock,

    /// Not a state error at all: the state stops being explored without the
    /// program having done anything wrong.
    Early,

    /// The whole run has to stop.
    Fatal,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Pointer => "ptr",
            Self::ReadOnly => "readonly",
            Self::Free => "free",
            Self::Division => "div",
            Self::Execution => "exec",
            Self::Model => "model",
            Self::External => "external",
            Self::User => "user",
            Self::Abort => "abort",
            Self::Assert => "assert",
            Self::Deadlock => "deadlock",
            Self::Early => "early",
            Self::Fatal => "fatal",
        };
        write!(f, "{name}")
    }
}

/// Errors that occur during the symbolic execution of a program by the
/// [`crate::vm::Executor`].
///
/// The message of each error is what deduplication of errors keys on, so it
/// deliberately excludes details that differ between states reaching the same
/// fault.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("memory error: out of bound pointer")]
    OutOfBoundPointer,

    #[error("memory error: object read only")]
    ReadOnly,

    #[error("memory error: invalid pointer: {operation}")]
    InvalidPointer { operation: String },

    #[error("free of alloca")]
    FreeOfAlloca,

    #[error("free of global")]
    FreeOfGlobal,

    #[error("division by zero")]
    DivisionByZero,

    #[error("reached \"unreachable\" instruction")]
    Unreachable,

    #[error("illegal instruction: {name}")]
    UnsupportedInstruction { name: String },

    #[error("unsupported floating point width: {width}")]
    UnsupportedFloatWidth { width: u32 },

    #[error("operand widths do not match: {lhs} and {rhs}")]
    WidthMismatch { lhs: u32, rhs: u32 },

    #[error("use of undefined register {register}")]
    UndefinedRegister { register: Register },

    #[error("calling function with too few arguments")]
    TooFewArguments,

    #[error("return void when caller expected a result")]
    MissingReturnValue,

    #[error("invalid function pointer")]
    InvalidFunctionPointer,

    #[error("out of memory (varargs)")]
    VarargsAllocationFailed,

    #[error("concretized symbolic size")]
    ConcretizedSymbolicSize,

    #[error("external calls disallowed: {name}")]
    ExternalCallsDisallowed { name: String },

    #[error("external call with symbolic argument: {name}")]
    SymbolicExternalArgument { name: String },

    #[error("failed external call: {name}")]
    ExternalCallFailed { name: String },

    #[error("external modified read-only object")]
    ExternalModifiedReadOnly,

    #[error("wrong size given to make_symbolic")]
    MakeSymbolicSize,

    #[error("{name} requires a constant argument")]
    SymbolicIntrinsicArgument { name: String },

    #[error("invalid assume call (provably false)")]
    InvalidAssume,

    #[error("invalid thread start function")]
    InvalidThreadFunction,

    #[error("abort failure")]
    Abort,

    #[error("ASSERTION FAIL: {message}")]
    AssertionFailed { message: String },

    #[error("hang (possible deadlock?)")]
    Deadlock,

    #[error("ran out of inputs during seeding")]
    SeedInputsExhausted,

    #[error("seed input {name} has {actual} bytes but the object has {expected}")]
    SeedInputSize {
        name:     String,
        expected: u64,
        actual:   u64,
    },

    #[error("query timed out")]
    QueryTimedOut,

    #[error("ran out of branches in replay path mode")]
    ReplayPathExhausted,

    #[error("hit invalid branch in replay path mode")]
    ReplayInvalidBranch,

    #[error("ran out of inputs in replay mode")]
    ReplayInputsExhausted,

    #[error("replay input {name} has {actual} bytes but the object has {expected}")]
    ReplayInputSize {
        name:     String,
        expected: u64,
        actual:   u64,
    },

    #[error("Execution was stopped by the watchdog")]
    StoppedByWatchdog,
}

impl Error {
    /// Gets the class of the error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::OutOfBoundPointer | Self::InvalidPointer { .. } => ErrorKind::Pointer,
            Self::ReadOnly => ErrorKind::ReadOnly,
            Self::FreeOfAlloca | Self::FreeOfGlobal => ErrorKind::Free,
            Self::DivisionByZero => ErrorKind::Division,
            Self::Unreachable
            | Self::UnsupportedInstruction { .. }
            | Self::UnsupportedFloatWidth { .. }
            | Self::WidthMismatch { .. }
            | Self::UndefinedRegister { .. }
            | Self::TooFewArguments
            | Self::MissingReturnValue
            | Self::InvalidFunctionPointer => ErrorKind::Execution,
            Self::VarargsAllocationFailed | Self::ConcretizedSymbolicSize => ErrorKind::Model,
            Self::ExternalCallsDisallowed { .. }
            | Self::SymbolicExternalArgument { .. }
            | Self::ExternalCallFailed { .. }
            | Self::ExternalModifiedReadOnly => ErrorKind::External,
            Self::MakeSymbolicSize
            | Self::SymbolicIntrinsicArgument { .. }
            | Self::InvalidAssume
            | Self::InvalidThreadFunction
            | Self::SeedInputsExhausted
            | Self::SeedInputSize { .. } => ErrorKind::User,
            Self::Abort => ErrorKind::Abort,
            Self::AssertionFailed { .. } => ErrorKind::Assert,
            Self::Deadlock => ErrorKind::Deadlock,
            Self::QueryTimedOut => ErrorKind::Early,
            Self::ReplayPathExhausted
            | Self::ReplayInvalidBranch
            | Self::ReplayInputsExhausted
            | Self::ReplayInputSize { .. }
            | Self::StoppedByWatchdog => ErrorKind::Fatal,
        }
    }

    /// Checks if the error must abort the whole run rather than a single
    /// state.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

/// An execution error with an associated location in the program.
pub type LocatedError = container::Located<Error>;

/// A container of execution errors used for aggregation of errors during
/// execution.
pub type Errors = container::Errors<LocatedError>;

/// The result type for methods that may have execution errors.
pub type Result<T> = std::result::Result<T, LocatedError>;

/// Make it possible to attach locations to these errors.
impl container::Locatable for Error {
    type Located = LocatedError;

    fn locate(self, instruction: InstructionRef) -> Self::Located {
        container::Located {
            location: instruction,
            payload:  self,
        }
    }
}

#[cfg(test)]
mod test {
    use crate::error::execution::{Error, ErrorKind};

    #[test]
    fn kinds_render_as_tags() {
        assert_eq!(Error::OutOfBoundPointer.kind().to_string(), "ptr");
        assert_eq!(Error::DivisionByZero.kind().to_string(), "div");
        assert_eq!(ErrorKind::ReadOnly.to_string(), "readonly");
    }

    #[test]
    fn replay_errors_are_fatal() {
        assert!(Error::ReplayInvalidBranch.is_fatal());
        assert!(Error::ReplayPathExhausted.is_fatal());
        assert!(!Error::QueryTimedOut.is_fatal());
        assert!(!Error::Deadlock.is_fatal());
    }
}
