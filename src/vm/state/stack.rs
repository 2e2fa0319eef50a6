//! This module contains the call stack of a thread of the program under test.

use crate::{
    error::{
        container::Locatable,
        execution::{Error, Result},
    },
    expr::ExprRef,
    memory::MemoryObjectRef,
    program::{FunctionId, InstructionRef, Register},
};

/// Where a call returns to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CallSite {
    /// The call instruction itself.
    pub call: InstructionRef,

    /// The register that receives the result of the call, if any.
    pub destination: Option<Register>,
}

/// A single frame on the call stack.
#[derive(Clone, Debug)]
pub struct StackFrame {
    pub function: FunctionId,

    /// The call that created the frame, or `None` for the bottom frame of a
    /// thread.
    pub caller: Option<CallSite>,

    /// The values of the registers of the function, indexed by register.
    locals: Vec<Option<ExprRef>>,

    /// The stack allocations of the frame, which are freed when it returns.
    pub allocas: Vec<MemoryObjectRef>,

    /// The storage for the variadic arguments the frame was called with.
    pub varargs: Option<MemoryObjectRef>,
}

impl StackFrame {
    /// Creates a frame for `function` with `registers` undefined registers.
    #[must_use]
    pub fn new(function: FunctionId, caller: Option<CallSite>, registers: u32) -> Self {
        let locals = vec![None; registers as usize];
        let allocas = Vec::new();
        let varargs = None;
        Self {
            function,
            caller,
            locals,
            allocas,
            varargs,
        }
    }

    /// Gets the value of `register`.
    ///
    /// # Errors
    ///
    /// Returns [`Err`] if the register has not been written, or does not exist.
    pub fn read(&self, register: Register, location: InstructionRef) -> Result<ExprRef> {
        self.locals
            .get(register.index())
            .cloned()
            .flatten()
            .ok_or(Error::UndefinedRegister { register })
            .locate(location)
    }

    /// Sets the value of `register`.
    ///
    /// # Panics
    ///
    /// If the register does not exist in the function, which validation of the
    /// program rules out.
    pub fn write(&mut self, register: Register, value: ExprRef) {
        self.locals[register.index()] = Some(value);
    }

    /// Gets the values of all registers.
    #[must_use]
    pub fn locals(&self) -> &[Option<ExprRef>] {
        &self.locals
    }

    /// Gets the values of all registers for modification.
    pub fn locals_mut(&mut self) -> &mut [Option<ExprRef>] {
        &mut self.locals
    }

    /// Checks if `other` is a frame of the same call, so that the two can be
    /// merged.
    #[must_use]
    pub fn same_shape(&self, other: &Self) -> bool {
        self.function == other.function
            && self.caller == other.caller
            && self.locals.len() == other.locals.len()
            && self.allocas.len() == other.allocas.len()
            && self
                .allocas
                .iter()
                .zip(&other.allocas)
                .all(|(a, b)| a.id() == b.id())
            && self.varargs.as_ref().map(|v| v.id()) == other.varargs.as_ref().map(|v| v.id())
    }
}

#[cfg(test)]
mod test {
    use crate::{
        error::execution::Error,
        expr::Expr,
        program::{FunctionId, InstructionRef, Register},
        vm::state::stack::StackFrame,
    };

    #[test]
    fn registers_must_be_written_before_use() {
        let mut frame = StackFrame::new(FunctionId(0), None, 2);
        let location = InstructionRef::entry(FunctionId(0));

        let error = frame.read(Register(1), location).expect_err("undefined");
        assert_eq!(error.payload, Error::UndefinedRegister { register: Register(1) });
        assert!(frame.read(Register(7), location).is_err());

        frame.write(Register(1), Expr::constant(3, 8));
        assert_eq!(frame.read(Register(1), location).ok(), Some(Expr::constant(3, 8)));
    }
}
