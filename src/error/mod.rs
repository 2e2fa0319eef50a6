//! This module contains the primary error type for the executor's interface.
//! It also re-exports the more specific error types that are
//! subsystem-specific.

pub mod container;
pub mod execution;
pub mod external;
pub mod program;
pub mod solver;

use thiserror::Error;

use crate::program::InstructionRef;

/// The interface result type for the library.
///
/// # Usage
///
/// Any function considered to be part of the public interface of the library
/// should return this result type. Subsystems should return the more-specific
/// child error types as appropriate.
pub type Result<T> = std::result::Result<T, Errors>;

/// The interface error type for the library.
///
/// All errors returned from the library interface (and hence encountered by the
/// clients of the library) should be members of this enum.
#[derive(Clone, Debug, Error)]
pub enum Error {
    /// Errors from the symbolic execution of the program.
    #[error(transparent)]
    Execution(#[from] execution::Error),

    /// Errors in the structure of the program being executed.
    #[error(transparent)]
    Program(#[from] program::Error),

    /// Errors from the constraint solver.
    #[error(transparent)]
    Solver(#[from] solver::Error),

    /// An unknown error, represented as a string.
    #[error("Unknown Error: {_0:?}")]
    Other(String),
}

impl Error {
    /// Constructs an unknown error with the provided `message`.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }
}

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

/// A library error with an associated program location.
pub type LocatedError = container::Located<Error>;

/// A container of errors that may occur in the executor.
pub type Errors = container::Errors<LocatedError>;

/// Allow simple conversions from located execution errors by re-wrapping the
/// located error around the more general payload.
impl From<execution::LocatedError> for LocatedError {
    fn from(value: execution::LocatedError) -> Self {
        let location = value.location;
        let payload = Error::from(value.payload);
        Self { location, payload }
    }
}

/// Allow simple conversions from located execution errors by re-wrapping the
/// located error around the more general payload in the Errors container.
impl From<execution::LocatedError> for Errors {
    fn from(value: execution::LocatedError) -> Self {
        let re_wrapped: LocatedError = value.into();
        re_wrapped.into()
    }
}

/// Allow simple conversions from located program errors by re-wrapping the
/// located error around the more general payload.
impl From<program::LocatedError> for LocatedError {
    fn from(value: program::LocatedError) -> Self {
        let location = value.location;
        let payload = Error::from(value.payload);
        Self { location, payload }
    }
}

/// Allow conversion from the execution errors container to the general errors
/// container.
impl From<execution::Errors> for Errors {
    fn from(value: execution::Errors) -> Self {
        let errs: Vec<execution::LocatedError> = value.into();
        let new_errs: Vec<LocatedError> = errs.into_iter().map(std::convert::Into::into).collect();

        new_errs.into()
    }
}

/// Allow conversion from the program errors container to the general errors
/// container.
impl From<program::Errors> for Errors {
    fn from(value: program::Errors) -> Self {
        let errs: Vec<program::LocatedError> = value.into();
        let new_errs: Vec<LocatedError> = errs.into_iter().map(std::convert::Into::into).collect();

        new_errs.into()
    }
}
