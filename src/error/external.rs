//! This module contains errors produced while dispatching calls to functions
//! implemented by the host.

use thiserror::Error;

/// Errors raised by an [`crate::external::ExternalDispatcher`].
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("No host implementation is available for {name}")]
    Unsupported { name: String },

    #[error("{name} failed: {reason}")]
    Failed { name: String, reason: String },

    #[error("Access to {len} bytes at {address:#x} is outside the concrete memory image")]
    InvalidMemoryAccess { address: u64, len: u64 },
}

/// The result type for host calls.
pub type Result<T> = std::result::Result<T, Error>;
