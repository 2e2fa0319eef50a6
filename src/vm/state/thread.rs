//! This module contains the threads of the program under test, which the
//! executor interleaves cooperatively within a single execution state.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::{
    program::{BlockId, FunctionId, InstructionRef},
    vm::state::stack::StackFrame,
};

/// The identifier of a thread within an execution state.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct ThreadId(pub u64);

impl Display for ThreadId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "thread{}", self.0)
    }
}

/// The identifier of a list of threads waiting to be notified.
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize,
)]
pub struct WaitListId(pub u64);

/// A thread of the program under test.
#[derive(Clone, Debug)]
pub struct Thread {
    id: ThreadId,

    pub stack: Vec<StackFrame>,

    /// The next instruction to execute.
    pub pc: InstructionRef,

    /// The instruction executed last.
    pub prev_pc: InstructionRef,

    /// The block that control came from when entering the current block, which
    /// selects the incoming value of `Phi` instructions.
    pub incoming_block: Option<BlockId>,

    /// Disabled threads are asleep on a wait list and cannot be scheduled.
    pub enabled: bool,

    /// The wait list the thread sleeps on, if any.
    pub waiting_on: Option<WaitListId>,
}

impl Thread {
    /// Creates a thread that starts at the entry of `function`.
    #[must_use]
    pub fn new(id: ThreadId, function: FunctionId, registers: u32) -> Self {
        let pc = InstructionRef::entry(function);
        let stack = vec![StackFrame::new(function, None, registers)];
        Self {
            id,
            stack,
            pc,
            prev_pc:        pc,
            incoming_block: None,
            enabled:        true,
            waiting_on:     None,
        }
    }

    #[must_use]
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Gets the innermost frame.
    ///
    /// # Panics
    ///
    /// If the stack is empty, which only happens after the thread returned
    /// from its bottom frame.
    #[must_use]
    pub fn frame(&self) -> &StackFrame {
        self.stack.last().expect("thread has a stack frame")
    }

    /// Gets the innermost frame for modification.
    ///
    /// # Panics
    ///
    /// If the stack is empty.
    pub fn frame_mut(&mut self) -> &mut StackFrame {
        self.stack.last_mut().expect("thread has a stack frame")
    }

    /// Moves the thread to the start of `block` in the function of the
    /// instruction being executed.
    pub fn jump_to(&mut self, block: BlockId) {
        self.incoming_block = Some(self.prev_pc.block);
        self.pc = InstructionRef::block_start(self.prev_pc.function, block);
    }
}
