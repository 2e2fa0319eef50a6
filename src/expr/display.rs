//! This module contains the textual rendering of expressions, used in logs and
//! test cases.
//!
//! Expressions are printed in prefix form with their width, such as
//! `(Add w32 1 (Read w8 0 input))`.

use std::fmt::{Display, Formatter};

use itertools::Itertools;

use crate::expr::{BinaryKind, CompareKind, Expr, ExprKind, UpdateList, BOOL};

impl Display for BinaryKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Add => "Add",
            Self::Sub => "Sub",
            Self::Mul => "Mul",
            Self::UDiv => "UDiv",
            Self::SDiv => "SDiv",
            Self::URem => "URem",
            Self::SRem => "SRem",
            Self::And => "And",
            Self::Or => "Or",
            Self::Xor => "Xor",
            Self::Shl => "Shl",
            Self::LShr => "LShr",
            Self::AShr => "AShr",
        };
        write!(f, "{name}")
    }
}

impl Display for CompareKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Eq => "Eq",
            Self::Ult => "Ult",
            Self::Ule => "Ule",
            Self::Slt => "Slt",
            Self::Sle => "Sle",
        };
        write!(f, "{name}")
    }
}

impl Display for UpdateList {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if !self.is_empty() {
            let writes = self.iter().map(|n| format!("{}={}", n.index(), n.value())).join(", ");
            write!(f, "[{writes}] @ ")?;
        }
        write!(f, "{}", self.root().name())
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let width = self.width();
        match self.kind() {
            ExprKind::Constant(value) if width == BOOL => {
                write!(f, "{}", if *value == 0 { "false" } else { "true" })
            }
            ExprKind::Constant(value) => write!(f, "{value}"),
            ExprKind::Read { updates, index } => write!(f, "(Read w{width} {index} {updates})"),
            ExprKind::Select {
                condition,
                if_true,
                if_false,
            } => write!(f, "(Select w{width} {condition} {if_true} {if_false})"),
            ExprKind::Concat { msb, lsb } => write!(f, "(Concat w{width} {msb} {lsb})"),
            ExprKind::Extract { expr, offset } => {
                write!(f, "(Extract w{width} {offset} {expr})")
            }
            ExprKind::ZExt(expr) => write!(f, "(ZExt w{width} {expr})"),
            ExprKind::SExt(expr) => write!(f, "(SExt w{width} {expr})"),
            ExprKind::Not(expr) => write!(f, "(Not w{width} {expr})"),
            ExprKind::Binary { kind, lhs, rhs } => write!(f, "({kind} w{width} {lhs} {rhs})"),
            ExprKind::Compare { kind, lhs, rhs } => write!(f, "({kind} {lhs} {rhs})"),
        }
    }
}

#[cfg(test)]
mod test {
    use crate::expr::{Array, Expr, UpdateList};

    #[test]
    fn renders_prefix_form() {
        let x = Expr::read(UpdateList::new(Array::symbolic("x", 1)), Expr::constant(0, 32));
        let e = Expr::ult(Expr::add(x, Expr::constant(1, 8)), Expr::constant(10, 8));
        assert_eq!(e.to_string(), "(Ult (Add w8 1 (Read w8 0 x)) 10)");
        assert_eq!(Expr::bool(true).to_string(), "true");
    }
}
