//! This module contains the symbolic values manipulated by the executor.
//!
//! A symbolic value is an immutable expression over fixed-width bitvectors,
//! shared between any number of execution states through an [`ExprRef`].
//! Concrete values are simply [`ExprKind::Constant`] nodes.
//!
//! # Construction
//!
//! Expressions are only ever built through the constructors on [`Expr`] (see
//! the `builder` module), all of which fold constants and collapse trivial
//! identities. This keeps fully-concrete computations concrete, which is what
//! allows the executor to avoid the solver for them entirely.
//!
//! # Widths
//!
//! Every expression has a width between 1 and [`MAX_WIDTH`] bits. Width 1
//! doubles as the boolean type, so comparisons produce width 1 values.

pub mod array;
pub mod assignment;
mod builder;
pub mod constraints;
mod display;
pub mod visit;

use std::{
    hash::{Hash, Hasher},
    sync::Arc,
};

pub use array::{Array, UpdateList, UpdateNode};
pub use assignment::Assignment;
pub use constraints::ConstraintSet;
use rustc_hash::FxHasher;

/// The width of an expression in bits.
pub type Width = u32;

/// The width of boolean expressions.
pub const BOOL: Width = 1;

/// The width of a byte.
pub const INT8: Width = 8;

/// The width of a 16-bit integer.
pub const INT16: Width = 16;

/// The width of a 32-bit integer.
pub const INT32: Width = 32;

/// The width of a 64-bit integer.
pub const INT64: Width = 64;

/// The largest width an expression can have.
pub const MAX_WIDTH: Width = 64;

/// A shared reference to an expression.
pub type ExprRef = Arc<Expr>;

/// Binary operations over two bitvectors of the same width.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum BinaryKind {
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

impl BinaryKind {
    /// Checks if the operands of the operation can be swapped freely.
    #[must_use]
    pub fn is_commutative(self) -> bool {
        matches!(self, Self::Add | Self::Mul | Self::And | Self::Or | Self::Xor)
    }
}

/// The canonical comparisons.
///
/// The remaining comparisons (`ne`, `ugt`, `uge`, `sgt`, `sge`) are expressed
/// by the builder in terms of these by swapping operands or negating.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum CompareKind {
    Eq,
    Ult,
    Ule,
    Slt,
    Sle,
}

/// The structure of an expression node.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ExprKind {
    /// A concrete value, always masked to the width of the expression.
    Constant(u64),

    /// A byte read from `updates` at `index`.
    Read { updates: UpdateList, index: ExprRef },

    /// `if condition { if_true } else { if_false }`.
    Select {
        condition: ExprRef,
        if_true:   ExprRef,
        if_false:  ExprRef,
    },

    /// The concatenation of `msb` above `lsb`.
    Concat { msb: ExprRef, lsb: ExprRef },

    /// The bits of `expr` starting at bit `offset`, for the width of the
    /// node.
    Extract { expr: ExprRef, offset: Width },

    ZExt(ExprRef),
    SExt(ExprRef),

    /// Bitwise negation.
    Not(ExprRef),

    Binary {
        kind: BinaryKind,
        lhs:  ExprRef,
        rhs:  ExprRef,
    },

    Compare {
        kind: CompareKind,
        lhs:  ExprRef,
        rhs:  ExprRef,
    },
}

/// A node in a symbolic expression.
///
/// Nodes cache a structural hash on construction, making hashing of any
/// expression `O(1)` and letting equality checks bail out early.
#[derive(Clone, Debug)]
pub struct Expr {
    kind:  ExprKind,
    width: Width,
    hash:  u64,
}

impl Expr {
    /// Wraps `kind` into a node without any simplification.
    fn make(kind: ExprKind, width: Width) -> ExprRef {
        debug_assert!(width > 0 && width <= MAX_WIDTH, "invalid width {width}");
        let mut hasher = FxHasher::default();
        kind.hash(&mut hasher);
        width.hash(&mut hasher);
        let hash = hasher.finish();
        Arc::new(Self { kind, width, hash })
    }

    /// Gets the structure of the node.
    #[must_use]
    pub fn kind(&self) -> &ExprKind {
        &self.kind
    }

    /// Gets the width of the expression in bits.
    #[must_use]
    pub fn width(&self) -> Width {
        self.width
    }

    /// Gets the cached structural hash of the expression.
    #[must_use]
    pub fn structural_hash(&self) -> u64 {
        self.hash
    }

    /// Gets the value of the expression if it is a constant.
    #[must_use]
    pub fn as_constant(&self) -> Option<u64> {
        match self.kind {
            ExprKind::Constant(value) => Some(value),
            _ => None,
        }
    }

    /// Checks if the expression is a constant.
    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.as_constant().is_some()
    }

    /// Checks if the expression is the boolean constant `true`.
    #[must_use]
    pub fn is_true(&self) -> bool {
        self.width == BOOL && self.as_constant() == Some(1)
    }

    /// Checks if the expression is the boolean constant `false`.
    #[must_use]
    pub fn is_false(&self) -> bool {
        self.width == BOOL && self.as_constant() == Some(0)
    }

    /// Gets the direct children of the node, excluding the contents of update
    /// lists.
    #[must_use]
    pub fn children(&self) -> Vec<&ExprRef> {
        match &self.kind {
            ExprKind::Constant(_) => vec![],
            ExprKind::Read { index, .. } => vec![index],
            ExprKind::Select {
                condition,
                if_true,
                if_false,
            } => vec![condition, if_true, if_false],
            ExprKind::Concat { msb, lsb } => vec![msb, lsb],
            ExprKind::Extract { expr, .. }
            | ExprKind::ZExt(expr)
            | ExprKind::SExt(expr)
            | ExprKind::Not(expr) => vec![expr],
            ExprKind::Binary { lhs, rhs, .. } | ExprKind::Compare { lhs, rhs, .. } => {
                vec![lhs, rhs]
            }
        }
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash && self.width == other.width && self.kind == other.kind
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.hash);
    }
}

/// Gets a mask of the low `width` bits.
#[must_use]
pub fn mask(width: Width) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

/// Interprets the low `width` bits of `value` as a two's-complement number.
#[must_use]
pub fn to_signed(value: u64, width: Width) -> i64 {
    let shift = 64 - width;
    ((value << shift) as i64) >> shift
}
