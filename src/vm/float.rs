//! This module contains the floating point instructions.
//!
//! Floating point values are not modelled symbolically. Any symbolic operand
//! is concretized first, and the operation is then performed on the host with
//! IEEE-754 semantics.

use std::ops::{Add, Div, Mul, Rem, Sub};

use crate::{
    error::{
        container::Locatable,
        execution::{Error, Result},
    },
    expr::{to_signed, Expr, ExprRef, Width},
    program::{FloatCastOp, FloatOp, FloatPredicate, Register},
    vm::{state::ExecutionState, Executor},
};

/// A host floating point value of one of the supported widths.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Float {
    Single(f32),
    Double(f64),
}

impl Float {
    /// Interprets the low `width` bits of `bits` as a floating point value.
    fn decode(bits: u64, width: Width) -> std::result::Result<Self, Error> {
        match width {
            32 => Ok(Self::Single(f32::from_bits(bits as u32))),
            64 => Ok(Self::Double(f64::from_bits(bits))),
            width => Err(Error::UnsupportedFloatWidth { width }),
        }
    }

    /// Rounds `value` to the floating point format of `width` bits.
    fn from_f64(value: f64, width: Width) -> std::result::Result<Self, Error> {
        match width {
            32 => Ok(Self::Single(value as f32)),
            64 => Ok(Self::Double(value)),
            width => Err(Error::UnsupportedFloatWidth { width }),
        }
    }

    fn to_f64(self) -> f64 {
        match self {
            Self::Single(value) => f64::from(value),
            Self::Double(value) => value,
        }
    }

    fn bits(self) -> u64 {
        match self {
            Self::Single(value) => u64::from(value.to_bits()),
            Self::Double(value) => value.to_bits(),
        }
    }

    fn width(self) -> Width {
        match self {
            Self::Single(_) => 32,
            Self::Double(_) => 64,
        }
    }

    fn apply(self, op: FloatOp, other: Self) -> Self {
        match (self, other) {
            (Self::Single(a), Self::Single(b)) => Self::Single(arithmetic(op, a, b)),
            (a, b) => Self::Double(arithmetic(op, a.to_f64(), b.to_f64())),
        }
    }
}

fn arithmetic<T>(op: FloatOp, a: T, b: T) -> T
where
    T: Add<Output = T> + Sub<Output = T> + Mul<Output = T> + Div<Output = T> + Rem<Output = T>,
{
    match op {
        FloatOp::FAdd => a + b,
        FloatOp::FSub => a - b,
        FloatOp::FMul => a * b,
        FloatOp::FDiv => a / b,
        FloatOp::FRem => a % b,
    }
}

/// Evaluates `predicate` on two host values, where a NaN operand makes the
/// comparison unordered.
fn compare(predicate: FloatPredicate, a: f64, b: f64) -> bool {
    let unordered = a.is_nan() || b.is_nan();
    match predicate {
        FloatPredicate::False => false,
        FloatPredicate::True => true,
        FloatPredicate::Oeq => a == b,
        FloatPredicate::Ogt => a > b,
        FloatPredicate::Oge => a >= b,
        FloatPredicate::Olt => a < b,
        FloatPredicate::Ole => a <= b,
        FloatPredicate::One => !unordered && a != b,
        FloatPredicate::Ord => !unordered,
        FloatPredicate::Uno => unordered,
        FloatPredicate::Ueq => unordered || a == b,
        FloatPredicate::Ugt => unordered || a > b,
        FloatPredicate::Uge => unordered || a >= b,
        FloatPredicate::Ult => unordered || a < b,
        FloatPredicate::Ule => unordered || a <= b,
        FloatPredicate::Une => unordered || a != b,
    }
}

impl Executor {
    /// Concretizes `value` for use as a floating point operand.
    fn concrete_float_operand(
        &mut self,
        state: &mut ExecutionState,
        value: &ExprRef,
    ) -> Result<(u64, Width)> {
        let value = self.to_constant(state, value, "floating point")?;
        Ok((value.as_constant().unwrap_or_default(), value.width()))
    }

    pub(crate) fn execute_float_binary(
        &mut self,
        state: &mut ExecutionState,
        op: FloatOp,
        lhs: &ExprRef,
        rhs: &ExprRef,
        destination: Register,
    ) -> Result<()> {
        let location = self.location;
        let (lhs, lhs_width) = self.concrete_float_operand(state, lhs)?;
        let (rhs, rhs_width) = self.concrete_float_operand(state, rhs)?;
        if lhs_width != rhs_width {
            let error = Error::WidthMismatch {
                lhs: lhs_width,
                rhs: rhs_width,
            };
            return Err(error.locate(location));
        }

        let lhs = Float::decode(lhs, lhs_width).locate(location)?;
        let rhs = Float::decode(rhs, rhs_width).locate(location)?;
        let result = lhs.apply(op, rhs);
        state
            .frame_mut()
            .write(destination, Expr::constant(result.bits(), result.width()));
        Ok(())
    }

    pub(crate) fn execute_float_compare(
        &mut self,
        state: &mut ExecutionState,
        predicate: FloatPredicate,
        lhs: &ExprRef,
        rhs: &ExprRef,
        destination: Register,
    ) -> Result<()> {
        let location = self.location;
        let (lhs, lhs_width) = self.concrete_float_operand(state, lhs)?;
        let (rhs, rhs_width) = self.concrete_float_operand(state, rhs)?;
        let lhs = Float::decode(lhs, lhs_width).locate(location)?;
        let rhs = Float::decode(rhs, rhs_width).locate(location)?;

        let result = compare(predicate, lhs.to_f64(), rhs.to_f64());
        state.frame_mut().write(destination, Expr::bool(result));
        Ok(())
    }

    pub(crate) fn execute_float_cast(
        &mut self,
        state: &mut ExecutionState,
        op: FloatCastOp,
        value: &ExprRef,
        width: Width,
        destination: Register,
    ) -> Result<()> {
        let location = self.location;
        let (bits, input_width) = self.concrete_float_operand(state, value)?;

        let result = match op {
            FloatCastOp::FpTrunc | FloatCastOp::FpExt => {
                let value = Float::decode(bits, input_width).locate(location)?;
                Float::from_f64(value.to_f64(), width).locate(location)?.bits()
            }
            FloatCastOp::FpToUi => {
                let value = Float::decode(bits, input_width).locate(location)?;
                value.to_f64() as u64
            }
            FloatCastOp::FpToSi => {
                let value = Float::decode(bits, input_width).locate(location)?;
                (value.to_f64() as i64) as u64
            }
            FloatCastOp::UiToFp => match width {
                32 => u64::from((bits as f32).to_bits()),
                64 => (bits as f64).to_bits(),
                width => return Err(Error::UnsupportedFloatWidth { width }.locate(location)),
            },
            FloatCastOp::SiToFp => {
                let signed = to_signed(bits, input_width);
                match width {
                    32 => u64::from((signed as f32).to_bits()),
                    64 => (signed as f64).to_bits(),
                    width => return Err(Error::UnsupportedFloatWidth { width }.locate(location)),
                }
            }
        };
        state.frame_mut().write(destination, Expr::constant(result, width));
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::{
        program::{FloatOp, FloatPredicate},
        vm::float::{compare, Float},
    };

    #[test]
    fn single_precision_arithmetic_rounds_like_the_host() -> anyhow::Result<()> {
        let a = Float::decode(u64::from(0.1f32.to_bits()), 32)?;
        let b = Float::decode(u64::from(0.2f32.to_bits()), 32)?;
        assert_eq!(a.apply(FloatOp::FAdd, b), Float::Single(0.1f32 + 0.2f32));
        assert_eq!(a.apply(FloatOp::FRem, b).width(), 32);
        assert!(Float::decode(0, 16).is_err());
        Ok(())
    }

    #[test]
    fn nan_comparisons_are_unordered() {
        assert!(!compare(FloatPredicate::Oeq, f64::NAN, f64::NAN));
        assert!(compare(FloatPredicate::Une, f64::NAN, 1.0));
        assert!(compare(FloatPredicate::Uno, 1.0, f64::NAN));
        assert!(!compare(FloatPredicate::One, f64::NAN, 1.0));
        assert!(compare(FloatPredicate::Olt, 1.0, 2.0));
    }
}
