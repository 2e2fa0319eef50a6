//! This module contains the instruction set that the executor interprets.
//!
//! The instruction set is a small, typed, register-based intermediate
//! representation. Values live in per-frame registers, control flow moves
//! between basic blocks, and memory is accessed through explicit `Load` and
//! `Store` instructions.

use serde::{Deserialize, Serialize};

use crate::{
    expr::Width,
    program::{BlockId, ConstantId, FunctionId, Register},
};

/// A source of a value for an instruction.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Operand {
    /// The value currently held in a register of the executing frame.
    Register(Register),

    /// An entry in the program's constant table.
    Constant(ConstantId),
}

impl From<Register> for Operand {
    fn from(value: Register) -> Self {
        Self::Register(value)
    }
}

impl From<ConstantId> for Operand {
    fn from(value: ConstantId) -> Self {
        Self::Constant(value)
    }
}

/// Integer arithmetic and bitwise operations.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    UDiv,
    SDiv,
    URem,
    SRem,
    And,
    Or,
    Xor,
    Shl,
    LShr,
    AShr,
}

impl BinaryOp {
    /// Checks if the operation faults when its right operand is zero.
    #[must_use]
    pub fn is_division(self) -> bool {
        matches!(self, Self::UDiv | Self::SDiv | Self::URem | Self::SRem)
    }
}

/// Integer comparison predicates.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum IntPredicate {
    Eq,
    Ne,
    Ugt,
    Uge,
    Ult,
    Ule,
    Sgt,
    Sge,
    Slt,
    Sle,
}

/// Integer conversions.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum CastOp {
    Trunc,
    ZExt,
    SExt,
    PtrToInt,
    IntToPtr,
    BitCast,
}

/// Floating point arithmetic operations.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum FloatOp {
    FAdd,
    FSub,
    FMul,
    FDiv,
    FRem,
}

/// Floating point comparison predicates, following the ordered/unordered
/// split of IEEE-754.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum FloatPredicate {
    False,
    Oeq,
    Ogt,
    Oge,
    Olt,
    Ole,
    One,
    Ord,
    Uno,
    Ueq,
    Ugt,
    Uge,
    Ult,
    Ule,
    Une,
    True,
}

/// Floating point conversions.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum FloatCastOp {
    FpTrunc,
    FpExt,
    FpToUi,
    FpToSi,
    UiToFp,
    SiToFp,
}

/// Operations that the executor implements itself rather than by running
/// program code.
///
/// The argument conventions are:
///
/// - `Malloc(size)`, `Calloc(count, size)` and `Realloc(pointer, size)` return
///   a pointer.
/// - `Free(pointer)` returns nothing.
/// - `MakeSymbolic(pointer, size)` replaces the contents of the object at
///   `pointer` with fresh symbolic bytes.
/// - `Assume(condition)` and `Assert(condition)` take a boolean or integer.
/// - `Exit(code)` and `Abort()` terminate the state.
/// - `Fork()` returns `0` in one child and `1` in the other.
/// - `SetForking(enabled)` enables or disables forking for the state.
/// - `ThreadCreate(function, argument)` returns the new thread's id.
/// - `ThreadSleep(list)`, `ThreadNotify(list)` and `GetWaitList()` operate on
///   wait lists.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Intrinsic {
    Malloc,
    Calloc,
    Realloc,
    Free,
    MakeSymbolic { name: String },
    Assume,
    Assert { message: String },
    Abort,
    Exit,
    Fork,
    SetForking,
    ThreadCreate,
    ThreadExit,
    ThreadYield,
    ThreadSleep,
    ThreadNotify { all: bool },
    GetWaitList,
}

impl Intrinsic {
    /// Gets the name of the intrinsic as it appears in program listings.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Malloc => "malloc",
            Self::Calloc => "calloc",
            Self::Realloc => "realloc",
            Self::Free => "free",
            Self::MakeSymbolic { .. } => "make_symbolic",
            Self::Assume => "assume",
            Self::Assert { .. } => "assert",
            Self::Abort => "abort",
            Self::Exit => "exit",
            Self::Fork => "fork",
            Self::SetForking => "set_forking",
            Self::ThreadCreate => "thread_create",
            Self::ThreadExit => "thread_exit",
            Self::ThreadYield => "thread_yield",
            Self::ThreadSleep => "thread_sleep",
            Self::ThreadNotify { all: false } => "thread_notify_one",
            Self::ThreadNotify { all: true } => "thread_notify_all",
            Self::GetWaitList => "get_wait_list",
        }
    }

    /// Gets the number of arguments the intrinsic expects.
    #[must_use]
    pub fn arity(&self) -> usize {
        match self {
            Self::Abort | Self::Fork | Self::ThreadExit | Self::ThreadYield | Self::GetWaitList => 0,
            Self::Malloc
            | Self::Free
            | Self::Assume
            | Self::Assert { .. }
            | Self::Exit
            | Self::SetForking
            | Self::ThreadSleep
            | Self::ThreadNotify { .. } => 1,
            Self::Calloc | Self::Realloc | Self::MakeSymbolic { .. } | Self::ThreadCreate => 2,
        }
    }
}

/// The target of a call instruction.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Callee {
    /// A statically-known function.
    Function(FunctionId),

    /// A function pointer that is resolved at runtime.
    Pointer(Operand),

    /// An operation built into the executor.
    Intrinsic(Intrinsic),
}

/// A single instruction.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Instruction {
    Ret {
        value: Option<Operand>,
    },
    Br {
        target: BlockId,
    },
    CondBr {
        condition: Operand,
        if_true:   BlockId,
        if_false:  BlockId,
    },
    Switch {
        condition: Operand,
        default:   BlockId,
        cases:     Vec<(u64, BlockId)>,
    },
    Unreachable,
    Call {
        callee:      Callee,
        arguments:   Vec<Operand>,
        destination: Option<Register>,
    },
    Binary {
        op:          BinaryOp,
        lhs:         Operand,
        rhs:         Operand,
        destination: Register,
    },
    ICmp {
        predicate:   IntPredicate,
        lhs:         Operand,
        rhs:         Operand,
        destination: Register,
    },
    Select {
        condition:   Operand,
        if_true:     Operand,
        if_false:    Operand,
        destination: Register,
    },
    Cast {
        op:          CastOp,
        value:       Operand,
        width:       Width,
        destination: Register,
    },
    FBinary {
        op:          FloatOp,
        lhs:         Operand,
        rhs:         Operand,
        destination: Register,
    },
    FCmp {
        predicate:   FloatPredicate,
        lhs:         Operand,
        rhs:         Operand,
        destination: Register,
    },
    FCast {
        op:          FloatCastOp,
        value:       Operand,
        width:       Width,
        destination: Register,
    },
    Alloca {
        element_size: u64,
        count:        Operand,
        destination:  Register,
    },
    Load {
        address:     Operand,
        width:       Width,
        destination: Register,
    },
    Store {
        address: Operand,
        value:   Operand,
    },
    GetElementPtr {
        base:        Operand,
        indices:     Vec<(Operand, u64)>,
        offset:      u64,
        destination: Register,
    },
    Phi {
        incoming:    Vec<(BlockId, Operand)>,
        destination: Register,
    },
    Unsupported {
        name: String,
    },
}

impl Instruction {
    /// Checks if the instruction ends a basic block.
    #[must_use]
    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            Self::Ret { .. }
                | Self::Br { .. }
                | Self::CondBr { .. }
                | Self::Switch { .. }
                | Self::Unreachable
        )
    }

    /// Gets the register written by the instruction, if any.
    #[must_use]
    pub fn destination(&self) -> Option<Register> {
        match self {
            Self::Call { destination, .. } => *destination,
            Self::Binary { destination, .. }
            | Self::ICmp { destination, .. }
            | Self::Select { destination, .. }
            | Self::Cast { destination, .. }
            | Self::FBinary { destination, .. }
            | Self::FCmp { destination, .. }
            | Self::FCast { destination, .. }
            | Self::Alloca { destination, .. }
            | Self::Load { destination, .. }
            | Self::GetElementPtr { destination, .. }
            | Self::Phi { destination, .. } => Some(*destination),
            _ => None,
        }
    }

    /// Gets all operands read by the instruction.
    #[must_use]
    pub fn operands(&self) -> Vec<Operand> {
        match self {
            Self::Ret { value } => value.iter().copied().collect(),
            Self::Br { .. } | Self::Unreachable | Self::Unsupported { .. } => vec![],
            Self::CondBr { condition, .. } | Self::Switch { condition, .. } => vec![*condition],
            Self::Call {
                callee, arguments, ..
            } => {
                let mut operands = arguments.clone();
                if let Callee::Pointer(pointer) = callee {
                    operands.push(*pointer);
                }
                operands
            }
            Self::Binary { lhs, rhs, .. }
            | Self::ICmp { lhs, rhs, .. }
            | Self::FBinary { lhs, rhs, .. }
            | Self::FCmp { lhs, rhs, .. } => vec![*lhs, *rhs],
            Self::Select {
                condition,
                if_true,
                if_false,
                ..
            } => vec![*condition, *if_true, *if_false],
            Self::Cast { value, .. } | Self::FCast { value, .. } => vec![*value],
            Self::Alloca { count, .. } => vec![*count],
            Self::Load { address, .. } => vec![*address],
            Self::Store { address, value } => vec![*address, *value],
            Self::GetElementPtr { base, indices, .. } => {
                std::iter::once(*base).chain(indices.iter().map(|(i, _)| *i)).collect()
            }
            Self::Phi { incoming, .. } => incoming.iter().map(|(_, o)| *o).collect(),
        }
    }

    /// Gets the blocks that control may transfer to after this instruction.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Self::Br { target } => vec![*target],
            Self::CondBr {
                if_true, if_false, ..
            } => vec![*if_true, *if_false],
            Self::Switch { default, cases, .. } => {
                std::iter::once(*default).chain(cases.iter().map(|(_, b)| *b)).collect()
            }
            _ => vec![],
        }
    }

    /// Gets the callee of a direct call to a program function.
    #[must_use]
    pub fn direct_callee(&self) -> Option<FunctionId> {
        match self {
            Self::Call {
                callee: Callee::Function(f),
                ..
            } => Some(*f),
            _ => None,
        }
    }

    /// Gets a short name for the instruction's opcode.
    #[must_use]
    pub fn opcode_name(&self) -> &str {
        match self {
            Self::Ret { .. } => "ret",
            Self::Br { .. } => "br",
            Self::CondBr { .. } => "condbr",
            Self::Switch { .. } => "switch",
            Self::Unreachable => "unreachable",
            Self::Call { .. } => "call",
            Self::Binary { .. } => "binary",
            Self::ICmp { .. } => "icmp",
            Self::Select { .. } => "select",
            Self::Cast { .. } => "cast",
            Self::FBinary { .. } => "fbinary",
            Self::FCmp { .. } => "fcmp",
            Self::FCast { .. } => "fcast",
            Self::Alloca { .. } => "alloca",
            Self::Load { .. } => "load",
            Self::Store { .. } => "store",
            Self::GetElementPtr { .. } => "getelementptr",
            Self::Phi { .. } => "phi",
            Self::Unsupported { name } => name,
        }
    }
}

#[cfg(test)]
mod test {
    use crate::program::{
        instruction::{BinaryOp, Callee, Instruction, Intrinsic, Operand},
        BlockId,
        ConstantId,
        Register,
    };

    #[test]
    fn terminators_are_recognised() {
        assert!(Instruction::Unreachable.is_terminator());
        assert!(Instruction::Br { target: BlockId(1) }.is_terminator());
        assert!(!Instruction::Unsupported {
            name: "va_arg".into(),
        }
        .is_terminator());
    }

    #[test]
    fn call_operands_include_function_pointer() {
        let call = Instruction::Call {
            callee:      Callee::Pointer(Operand::Register(Register(3))),
            arguments:   vec![Operand::Constant(ConstantId(0))],
            destination: Some(Register(4)),
        };
        assert_eq!(call.operands().len(), 2);
        assert_eq!(call.destination(), Some(Register(4)));
    }

    #[test]
    fn division_ops_are_flagged() {
        assert!(BinaryOp::URem.is_division());
        assert!(!BinaryOp::Shl.is_division());
        assert_eq!(Intrinsic::Calloc.arity(), 2);
    }
}
