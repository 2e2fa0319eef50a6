//! This module contains errors that can be produced by constraint solvers.

use std::time::Duration;

use thiserror::Error;

/// Failures of a solver to answer a query.
///
/// None of these say anything about the query itself. They mean that the
/// solver could not produce an answer, and callers must treat the query as
/// undecided.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Query timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },

    #[error("Query is beyond the capabilities of the {solver} solver: {reason}")]
    Unsupported { solver: String, reason: String },

    #[error("Constraints have no solution")]
    Unsatisfiable,

    #[error("Solver process failed: {message}")]
    Process { message: String },

    #[error("Could not parse solver response {response:?}: {reason}")]
    Response { response: String, reason: String },
}

impl Error {
    /// Checks if the error was caused by the query running out of time.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// The result type for methods that query a solver.
pub type Result<T> = std::result::Result<T, Error>;
