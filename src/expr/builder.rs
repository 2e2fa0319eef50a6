//! This module contains the simplifying constructors for expressions.
//!
//! Every constructor folds constant operands, and a number of them also
//! canonicalize their operands (constants to the left of commutative
//! operations, comparisons reduced to the [`CompareKind`] set) so that
//! structurally equal computations produce equal expressions.

use crate::{
    constant::{ARRAY_INDEX_WIDTH_BITS, POINTER_WIDTH_BITS},
    expr::{
        mask,
        to_signed,
        BinaryKind,
        CompareKind,
        Expr,
        ExprKind,
        ExprRef,
        UpdateList,
        Width,
        BOOL,
        INT8,
        MAX_WIDTH,
    },
};

/// Evaluates `kind` over the concrete operands `lhs` and `rhs` of `width`
/// bits.
///
/// Division by zero and over-wide shifts follow the SMT-LIB bitvector
/// semantics, so that folding agrees with what the solver would conclude.
#[must_use]
pub fn fold_binary(kind: BinaryKind, lhs: u64, rhs: u64, width: Width) -> u64 {
    let m = mask(width);
    let (lhs, rhs) = (lhs & m, rhs & m);
    let result = match kind {
        BinaryKind::Add => lhs.wrapping_add(rhs),
        BinaryKind::Sub => lhs.wrapping_sub(rhs),
        BinaryKind::Mul => lhs.wrapping_mul(rhs),
        BinaryKind::UDiv => {
            if rhs == 0 {
                m
            } else {
                lhs / rhs
            }
        }
        BinaryKind::URem => {
            if rhs == 0 {
                lhs
            } else {
                lhs % rhs
            }
        }
        BinaryKind::SDiv => {
            let (l, r) = (to_signed(lhs, width), to_signed(rhs, width));
            if r == 0 {
                if l < 0 {
                    1
                } else {
                    m
                }
            } else {
                l.wrapping_div(r) as u64
            }
        }
        BinaryKind::SRem => {
            let (l, r) = (to_signed(lhs, width), to_signed(rhs, width));
            if r == 0 {
                lhs
            } else {
                l.wrapping_rem(r) as u64
            }
        }
        BinaryKind::And => lhs & rhs,
        BinaryKind::Or => lhs | rhs,
        BinaryKind::Xor => lhs ^ rhs,
        BinaryKind::Shl => {
            if rhs >= u64::from(width) {
                0
            } else {
                lhs << rhs
            }
        }
        BinaryKind::LShr => {
            if rhs >= u64::from(width) {
                0
            } else {
                lhs >> rhs
            }
        }
        BinaryKind::AShr => {
            let signed = to_signed(lhs, width);
            if rhs >= u64::from(width) {
                if signed < 0 {
                    m
                } else {
                    0
                }
            } else {
                (signed >> rhs) as u64
            }
        }
    };
    result & m
}

/// Evaluates the comparison `kind` over concrete operands of `width` bits.
#[must_use]
pub fn fold_compare(kind: CompareKind, lhs: u64, rhs: u64, width: Width) -> bool {
    let m = mask(width);
    let (lhs, rhs) = (lhs & m, rhs & m);
    match kind {
        CompareKind::Eq => lhs == rhs,
        CompareKind::Ult => lhs < rhs,
        CompareKind::Ule => lhs <= rhs,
        CompareKind::Slt => to_signed(lhs, width) < to_signed(rhs, width),
        CompareKind::Sle => to_signed(lhs, width) <= to_signed(rhs, width),
    }
}

impl Expr {
    /// Creates a constant of `width` bits, truncating `value` to that width.
    #[must_use]
    pub fn constant(value: u64, width: Width) -> ExprRef {
        Self::make(ExprKind::Constant(value & mask(width)), width)
    }

    /// Creates a boolean constant.
    #[must_use]
    pub fn bool(value: bool) -> ExprRef {
        Self::constant(u64::from(value), BOOL)
    }

    /// Creates a pointer-width constant.
    #[must_use]
    pub fn pointer(value: u64) -> ExprRef {
        Self::constant(value, POINTER_WIDTH_BITS)
    }

    /// Creates a read of the byte at `index` through `updates`.
    ///
    /// When the index is constant, the read is resolved through every write
    /// whose index is also constant, and folds to a constant if it reaches a
    /// constant root array.
    ///
    /// # Panics
    ///
    /// If `index` is not a 32-bit expression.
    #[must_use]
    pub fn read(updates: UpdateList, index: ExprRef) -> ExprRef {
        assert_eq!(index.width(), ARRAY_INDEX_WIDTH_BITS, "read index width");

        if let Some(i) = index.as_constant() {
            let mut blocked = false;
            for node in updates.iter() {
                match node.index().as_constant() {
                    Some(j) if j == i => return node.value().clone(),
                    Some(_) => (),
                    None => {
                        blocked = true;
                        break;
                    }
                }
            }
            if !blocked {
                if let Some(byte) = updates.root().constant_byte(i) {
                    return Self::constant(u64::from(byte), INT8);
                }

                // None of the writes can affect this read.
                let updates = UpdateList::new(updates.root().clone());
                return Self::make(ExprKind::Read { updates, index }, INT8);
            }
        }

        Self::make(ExprKind::Read { updates, index }, INT8)
    }

    /// Creates `if condition { if_true } else { if_false }`.
    ///
    /// # Panics
    ///
    /// If `condition` is not boolean or the arms differ in width.
    #[must_use]
    pub fn select(condition: ExprRef, if_true: ExprRef, if_false: ExprRef) -> ExprRef {
        assert_eq!(condition.width(), BOOL, "select condition width");
        assert_eq!(if_true.width(), if_false.width(), "select arm widths");

        if let Some(c) = condition.as_constant() {
            return if c == 0 { if_false } else { if_true };
        }
        if if_true == if_false {
            return if_true;
        }
        if if_true.width() == BOOL {
            if if_true.is_true() && if_false.is_false() {
                return condition;
            }
            if if_true.is_false() && if_false.is_true() {
                return Self::is_zero(condition);
            }
        }

        let width = if_true.width();
        Self::make(
            ExprKind::Select {
                condition,
                if_true,
                if_false,
            },
            width,
        )
    }

    /// Creates the concatenation of `msb` above `lsb`.
    ///
    /// Adjacent extracts of the same value are joined back into a single
    /// extract, which collapses to the value itself when it covers all of
    /// it.
    ///
    /// # Panics
    ///
    /// If the combined width exceeds the maximum width.
    #[must_use]
    pub fn concat(msb: ExprRef, lsb: ExprRef) -> ExprRef {
        let width = msb.width() + lsb.width();
        assert!(width <= MAX_WIDTH, "concat width {width}");

        if let (Some(m), Some(l)) = (msb.as_constant(), lsb.as_constant()) {
            return Self::constant((m << lsb.width()) | l, width);
        }

        if let Some(joined) = Self::join_extracts(&msb, &lsb) {
            return joined;
        }

        if let ExprKind::Concat {
            msb: inner_msb,
            lsb: inner_lsb,
        } = lsb.kind()
        {
            if let Some(joined) = Self::join_extracts(&msb, inner_msb) {
                return Self::concat(joined, inner_lsb.clone());
            }
        }

        Self::make(ExprKind::Concat { msb, lsb }, width)
    }

    fn join_extracts(msb: &ExprRef, lsb: &ExprRef) -> Option<ExprRef> {
        match (msb.kind(), lsb.kind()) {
            (
                ExprKind::Extract {
                    expr: high,
                    offset: high_offset,
                },
                ExprKind::Extract {
                    expr: low,
                    offset: low_offset,
                },
            ) if high == low && *high_offset == low_offset + lsb.width() => Some(Self::extract(
                low.clone(),
                *low_offset,
                msb.width() + lsb.width(),
            )),
            _ => None,
        }
    }

    /// Creates the `width` bits of `expr` starting at bit `offset`.
    ///
    /// # Panics
    ///
    /// If the extracted range is not within `expr`.
    #[must_use]
    pub fn extract(expr: ExprRef, offset: Width, width: Width) -> ExprRef {
        assert!(offset + width <= expr.width(), "extract out of range");

        if offset == 0 && width == expr.width() {
            return expr;
        }
        if let Some(value) = expr.as_constant() {
            return Self::constant(value >> offset, width);
        }

        match expr.kind() {
            ExprKind::Concat { msb, lsb } => {
                let split = lsb.width();
                if offset >= split {
                    return Self::extract(msb.clone(), offset - split, width);
                }
                if offset + width <= split {
                    return Self::extract(lsb.clone(), offset, width);
                }
                let low_width = split - offset;
                return Self::concat(
                    Self::extract(msb.clone(), 0, width - low_width),
                    Self::extract(lsb.clone(), offset, low_width),
                );
            }
            ExprKind::Extract {
                expr: inner,
                offset: inner_offset,
            } => return Self::extract(inner.clone(), inner_offset + offset, width),
            ExprKind::ZExt(inner) => {
                if offset + width <= inner.width() {
                    return Self::extract(inner.clone(), offset, width);
                }
                if offset >= inner.width() {
                    return Self::constant(0, width);
                }
            }
            _ => (),
        }

        Self::make(ExprKind::Extract { expr, offset }, width)
    }

    /// Truncates `expr` to its low `width` bits.
    #[must_use]
    pub fn truncate(expr: ExprRef, width: Width) -> ExprRef {
        Self::extract(expr, 0, width)
    }

    /// Zero-extends `expr` to `width` bits.
    ///
    /// A `width` narrower than the expression truncates instead.
    #[must_use]
    pub fn zext(expr: ExprRef, width: Width) -> ExprRef {
        if width == expr.width() {
            return expr;
        }
        if width < expr.width() {
            return Self::truncate(expr, width);
        }
        if let Some(value) = expr.as_constant() {
            return Self::constant(value, width);
        }
        Self::make(ExprKind::ZExt(expr), width)
    }

    /// Sign-extends `expr` to `width` bits.
    ///
    /// A `width` narrower than the expression truncates instead.
    #[must_use]
    pub fn sext(expr: ExprRef, width: Width) -> ExprRef {
        if width == expr.width() {
            return expr;
        }
        if width < expr.width() {
            return Self::truncate(expr, width);
        }
        if let Some(value) = expr.as_constant() {
            return Self::constant(to_signed(value, expr.width()) as u64, width);
        }
        Self::make(ExprKind::SExt(expr), width)
    }

    /// Creates the bitwise negation of `expr`.
    #[must_use]
    pub fn not(expr: ExprRef) -> ExprRef {
        if let Some(value) = expr.as_constant() {
            return Self::constant(!value, expr.width());
        }
        if let ExprKind::Not(inner) = expr.kind() {
            return inner.clone();
        }
        let width = expr.width();
        Self::make(ExprKind::Not(expr), width)
    }

    /// Creates the boolean `expr == 0`.
    ///
    /// For boolean expressions this is logical negation, which is pushed into
    /// comparisons where possible.
    #[must_use]
    pub fn is_zero(expr: ExprRef) -> ExprRef {
        if expr.width() == BOOL {
            match expr.kind() {
                ExprKind::Constant(value) => return Self::bool(*value == 0),
                ExprKind::Compare {
                    kind: CompareKind::Eq,
                    lhs,
                    rhs,
                } if lhs.is_false() => return rhs.clone(),
                ExprKind::Compare { kind, lhs, rhs } => match kind {
                    CompareKind::Ult => return Self::ule(rhs.clone(), lhs.clone()),
                    CompareKind::Ule => return Self::ult(rhs.clone(), lhs.clone()),
                    CompareKind::Slt => return Self::sle(rhs.clone(), lhs.clone()),
                    CompareKind::Sle => return Self::slt(rhs.clone(), lhs.clone()),
                    CompareKind::Eq => (),
                },
                _ => (),
            }
        }
        let width = expr.width();
        Self::eq(Self::constant(0, width), expr)
    }

    /// Creates the binary operation `kind` over `lhs` and `rhs`.
    ///
    /// # Panics
    ///
    /// If the operands differ in width.
    #[must_use]
    pub fn binary(kind: BinaryKind, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        assert_eq!(lhs.width(), rhs.width(), "{kind:?} operand widths");
        let width = lhs.width();

        if let (Some(l), Some(r)) = (lhs.as_constant(), rhs.as_constant()) {
            return Self::constant(fold_binary(kind, l, r, width), width);
        }

        // Constants go on the left of commutative operations.
        let (lhs, rhs) = if kind.is_commutative() && rhs.is_constant() {
            (rhs, lhs)
        } else {
            (lhs, rhs)
        };
        let all_ones = mask(width);

        match kind {
            BinaryKind::Add | BinaryKind::Or | BinaryKind::Xor if lhs.as_constant() == Some(0) => {
                return rhs;
            }
            BinaryKind::Sub | BinaryKind::Shl | BinaryKind::LShr | BinaryKind::AShr
                if rhs.as_constant() == Some(0) =>
            {
                return lhs;
            }
            BinaryKind::Shl | BinaryKind::LShr | BinaryKind::AShr
                if lhs.as_constant() == Some(0) =>
            {
                return lhs;
            }
            BinaryKind::Sub | BinaryKind::Xor if lhs == rhs => return Self::constant(0, width),
            BinaryKind::And | BinaryKind::Or if lhs == rhs => return lhs,
            BinaryKind::Mul | BinaryKind::And if lhs.as_constant() == Some(0) => return lhs,
            BinaryKind::Mul if lhs.as_constant() == Some(1) => return rhs,
            BinaryKind::And if lhs.as_constant() == Some(all_ones) => return rhs,
            BinaryKind::Or if lhs.as_constant() == Some(all_ones) => return lhs,
            BinaryKind::UDiv | BinaryKind::SDiv if rhs.as_constant() == Some(1) => return lhs,
            BinaryKind::URem | BinaryKind::SRem if rhs.as_constant() == Some(1) => {
                return Self::constant(0, width);
            }
            _ => (),
        }

        Self::make(ExprKind::Binary { kind, lhs, rhs }, width)
    }

    #[must_use]
    pub fn add(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::binary(BinaryKind::Add, lhs, rhs)
    }

    #[must_use]
    pub fn sub(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::binary(BinaryKind::Sub, lhs, rhs)
    }

    #[must_use]
    pub fn mul(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::binary(BinaryKind::Mul, lhs, rhs)
    }

    #[must_use]
    pub fn udiv(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::binary(BinaryKind::UDiv, lhs, rhs)
    }

    #[must_use]
    pub fn urem(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::binary(BinaryKind::URem, lhs, rhs)
    }

    #[must_use]
    pub fn and(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::binary(BinaryKind::And, lhs, rhs)
    }

    #[must_use]
    pub fn or(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::binary(BinaryKind::Or, lhs, rhs)
    }

    #[must_use]
    pub fn xor(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::binary(BinaryKind::Xor, lhs, rhs)
    }

    #[must_use]
    pub fn shl(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::binary(BinaryKind::Shl, lhs, rhs)
    }

    #[must_use]
    pub fn lshr(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::binary(BinaryKind::LShr, lhs, rhs)
    }

    /// Creates the canonical comparison `kind` between `lhs` and `rhs`.
    ///
    /// # Panics
    ///
    /// If the operands differ in width.
    #[must_use]
    pub fn compare(kind: CompareKind, lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        assert_eq!(lhs.width(), rhs.width(), "{kind:?} operand widths");
        let width = lhs.width();

        if let (Some(l), Some(r)) = (lhs.as_constant(), rhs.as_constant()) {
            return Self::bool(fold_compare(kind, l, r, width));
        }
        if lhs == rhs {
            return Self::bool(matches!(
                kind,
                CompareKind::Eq | CompareKind::Ule | CompareKind::Sle
            ));
        }

        if kind == CompareKind::Eq {
            let (lhs, rhs) = if rhs.is_constant() {
                (rhs, lhs)
            } else {
                (lhs, rhs)
            };
            if width == BOOL && lhs.is_true() {
                return rhs;
            }
            if width == BOOL && lhs.is_false() {
                match rhs.kind() {
                    ExprKind::Compare {
                        kind: CompareKind::Eq,
                        lhs: inner,
                        rhs: negated,
                    } if inner.is_false() => return negated.clone(),
                    ExprKind::Compare { kind, .. } if *kind != CompareKind::Eq => {
                        return Self::is_zero(rhs);
                    }
                    _ => (),
                }
            }
            return Self::make(ExprKind::Compare { kind, lhs, rhs }, BOOL);
        }

        if kind == CompareKind::Ult && rhs.as_constant() == Some(0) {
            return Self::bool(false);
        }
        if kind == CompareKind::Ule && lhs.as_constant() == Some(0) {
            return Self::bool(true);
        }

        Self::make(ExprKind::Compare { kind, lhs, rhs }, BOOL)
    }

    #[must_use]
    pub fn eq(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::compare(CompareKind::Eq, lhs, rhs)
    }

    #[must_use]
    pub fn ne(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::is_zero(Self::eq(lhs, rhs))
    }

    #[must_use]
    pub fn ult(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::compare(CompareKind::Ult, lhs, rhs)
    }

    #[must_use]
    pub fn ule(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::compare(CompareKind::Ule, lhs, rhs)
    }

    #[must_use]
    pub fn ugt(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::ult(rhs, lhs)
    }

    #[must_use]
    pub fn uge(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::ule(rhs, lhs)
    }

    #[must_use]
    pub fn slt(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::compare(CompareKind::Slt, lhs, rhs)
    }

    #[must_use]
    pub fn sle(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::compare(CompareKind::Sle, lhs, rhs)
    }

    #[must_use]
    pub fn sgt(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::slt(rhs, lhs)
    }

    #[must_use]
    pub fn sge(lhs: ExprRef, rhs: ExprRef) -> ExprRef {
        Self::sle(rhs, lhs)
    }

    /// Creates the conjunction of boolean expressions, which is `true` when
    /// `exprs` is empty.
    pub fn and_all(exprs: impl IntoIterator<Item = ExprRef>) -> ExprRef {
        exprs.into_iter().fold(Self::bool(true), Self::and)
    }

    /// Creates the disjunction of boolean expressions, which is `false` when
    /// `exprs` is empty.
    pub fn or_all(exprs: impl IntoIterator<Item = ExprRef>) -> ExprRef {
        exprs.into_iter().fold(Self::bool(false), Self::or)
    }
}

#[cfg(test)]
mod test {
    use proptest::prelude::*;

    use crate::expr::{
        builder::fold_binary,
        Array,
        BinaryKind,
        CompareKind,
        Expr,
        ExprKind,
        UpdateList,
    };

    fn symbol(name: &str, width: u32) -> crate::expr::ExprRef {
        let bytes = width / 8;
        let array = Array::symbolic(name, u64::from(bytes));
        let updates = UpdateList::new(array);
        (0..bytes)
            .map(|i| Expr::read(updates.clone(), Expr::constant(u64::from(i), 32)))
            .reduce(|low, high| Expr::concat(high, low))
            .expect("width is at least one byte")
    }

    #[test]
    fn constants_fold() {
        let a = Expr::constant(250, 8);
        let b = Expr::constant(10, 8);
        assert_eq!(Expr::add(a.clone(), b.clone()).as_constant(), Some(4));
        assert_eq!(Expr::ult(b, a).as_constant(), Some(1));
    }

    #[test]
    fn division_by_zero_follows_bitvector_semantics() {
        assert_eq!(fold_binary(BinaryKind::UDiv, 7, 0, 8), 0xff);
        assert_eq!(fold_binary(BinaryKind::URem, 7, 0, 8), 7);
        assert_eq!(fold_binary(BinaryKind::Shl, 1, 9, 8), 0);
        assert_eq!(fold_binary(BinaryKind::AShr, 0x80, 12, 8), 0xff);
        assert_eq!(fold_binary(BinaryKind::SDiv, 0x80, 0xff, 8), 0x80);
    }

    #[test]
    fn reads_fold_through_constant_updates() {
        let mut updates = UpdateList::new(Array::constant("c", vec![1, 2, 3, 4]));
        updates.extend_concrete(2, Expr::constant(9, 8));
        assert_eq!(Expr::read(updates.clone(), Expr::constant(2, 32)).as_constant(), Some(9));
        assert_eq!(Expr::read(updates, Expr::constant(1, 32)).as_constant(), Some(2));
    }

    #[test]
    fn symbolic_update_blocks_folding() {
        let x = symbol("x", 32);
        let mut updates = UpdateList::new(Array::constant("c", vec![1, 2, 3, 4]));
        updates.extend(x, Expr::constant(9, 8));
        let read = Expr::read(updates, Expr::constant(1, 32));
        assert!(matches!(read.kind(), ExprKind::Read { .. }));
    }

    #[test]
    fn bytewise_split_and_join_is_identity() {
        let x = Expr::add(symbol("x", 32), symbol("y", 32));
        let bytes = (0..4).map(|i| Expr::extract(x.clone(), i * 8, 8)).collect::<Vec<_>>();
        let joined = bytes.into_iter().reduce(|low, high| Expr::concat(high, low)).unwrap();
        assert_eq!(joined, x);
    }

    #[test]
    fn negation_flips_comparisons() {
        let x = symbol("x", 8);
        let ten = Expr::constant(10, 8);
        let lt = Expr::ult(x.clone(), ten.clone());
        let not_lt = Expr::is_zero(lt.clone());
        assert_eq!(not_lt, Expr::ule(ten, x));
        assert_eq!(Expr::is_zero(Expr::is_zero(Expr::eq(symbol("y", 8), symbol("z", 8)))).width(), 1);
        match Expr::is_zero(lt).kind() {
            ExprKind::Compare { kind, .. } => assert_eq!(*kind, CompareKind::Ule),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn double_negation_of_equality_cancels() {
        let eq = Expr::eq(symbol("a", 8), symbol("b", 8));
        assert_eq!(Expr::is_zero(Expr::is_zero(eq.clone())), eq);
    }

    #[test]
    fn select_simplifies() {
        let c = Expr::eq(symbol("a", 8), Expr::constant(0, 8));
        let v = symbol("v", 8);
        assert_eq!(Expr::select(c.clone(), v.clone(), v.clone()), v);
        assert_eq!(Expr::select(c.clone(), Expr::bool(true), Expr::bool(false)), c);
        assert_eq!(Expr::select(Expr::bool(false), Expr::constant(1, 8), v.clone()), v);
    }

    proptest! {
        #[test]
        fn extension_matches_integer_semantics(value: u8) {
            let e = Expr::constant(u64::from(value), 8);
            prop_assert_eq!(Expr::zext(e.clone(), 32).as_constant(), Some(u64::from(value)));
            prop_assert_eq!(
                Expr::sext(e, 32).as_constant(),
                Some(u64::from(i32::from(value as i8) as u32))
            );
        }

        #[test]
        fn wrapping_arithmetic(a: u16, b: u16) {
            let (x, y) = (Expr::constant(u64::from(a), 16), Expr::constant(u64::from(b), 16));
            prop_assert_eq!(Expr::add(x.clone(), y.clone()).as_constant(), Some(u64::from(a.wrapping_add(b))));
            prop_assert_eq!(Expr::mul(x.clone(), y.clone()).as_constant(), Some(u64::from(a.wrapping_mul(b))));
            prop_assert_eq!(Expr::sub(x, y).as_constant(), Some(u64::from(a.wrapping_sub(b))));
        }
    }
}
