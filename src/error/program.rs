//! This module contains errors pertaining to the structure of the programs
//! given to the executor.

use thiserror::Error;

use crate::{
    error::container,
    expr::Width,
    program::{BlockId, ConstantId, FunctionId, GlobalId, InstructionRef, Register},
};

/// Errors found while validating a [`crate::program::Program`].
#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum Error {
    #[error("Function {function} does not exist")]
    UnknownFunction { function: FunctionId },

    #[error("Block {block} does not exist in the enclosing function")]
    UnknownBlock { block: BlockId },

    #[error("Constant {constant} does not exist")]
    UnknownConstant { constant: ConstantId },

    #[error("Global {global} does not exist")]
    UnknownGlobal { global: GlobalId },

    #[error("Register {register} is out of range for a frame of {available} registers")]
    RegisterOutOfRange { register: Register, available: u32 },

    #[error("Width {width} is not between 1 and 64 bits")]
    InvalidWidth { width: Width },

    #[error("Basic block does not end with a terminator")]
    MissingTerminator,

    #[error("Terminator appears before the end of its basic block")]
    TerminatorNotLast,

    #[error("Defined function {name} has no basic blocks")]
    EmptyFunction { name: String },

    #[error("The entry function {name} is external")]
    ExternalEntry { name: String },

    #[error("Intrinsic {name} expects {expected} arguments but was given {actual}")]
    IntrinsicArity {
        name:     String,
        expected: usize,
        actual:   usize,
    },
}

/// A program error with an associated instruction location.
pub type LocatedError = container::Located<Error>;

/// A container of program errors.
pub type Errors = container::Errors<LocatedError>;

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
