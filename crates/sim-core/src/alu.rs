//! Pure word arithmetic.
//!
//! Trapping operations (`add`, `sub`, `neg`, `abs`, `div`, `rem`) report
//! [`ExecuteFault`]s; the `u`-suffixed forms wrap.

use crate::{ExecuteFault, Word};

/// Binary ALU operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum AluOp {
    Add,
    AddWrapping,
    Sub,
    SubWrapping,
    And,
    Or,
    Xor,
    Nor,
    SetLessThan,
    SetLessThanUnsigned,
    SetEqual,
    SetNotEqual,
    Mul,
    Div,
    DivUnsigned,
    Rem,
    RemUnsigned,
    ShiftLeft,
    ShiftRightLogical,
    ShiftRightArithmetic,
    /// Absolute value of `lhs`; `rhs` is ignored.
    Abs,
}

/// Applies `op` to `lhs` and `rhs`.
///
/// Shift amounts use the low five bits of `rhs`.
///
/// # Errors
///
/// Returns [`ExecuteFault::ArithmeticOverflow`] when a trapping operation
/// overflows and [`ExecuteFault::DivideByZero`] for a zero divisor.
pub fn evaluate(op: AluOp, lhs: Word, rhs: Word) -> Result<Word, ExecuteFault> {
    let (a, b) = (lhs.as_signed(), rhs.as_signed());
    let (ua, ub) = (lhs.as_unsigned(), rhs.as_unsigned());
    let shift = ub & 0x1f;

    let result = match op {
        AluOp::Add => Word::from_signed(a.checked_add(b).ok_or(ExecuteFault::ArithmeticOverflow)?),
        AluOp::AddWrapping => Word::from_unsigned(ua.wrapping_add(ub)),
        AluOp::Sub => Word::from_signed(a.checked_sub(b).ok_or(ExecuteFault::ArithmeticOverflow)?),
        AluOp::SubWrapping => Word::from_unsigned(ua.wrapping_sub(ub)),
        AluOp::And => Word::from_unsigned(ua & ub),
        AluOp::Or => Word::from_unsigned(ua | ub),
        AluOp::Xor => Word::from_unsigned(ua ^ ub),
        AluOp::Nor => Word::from_unsigned(!(ua | ub)),
        AluOp::SetLessThan => Word::from_bool(a < b),
        AluOp::SetLessThanUnsigned => Word::from_bool(ua < ub),
        AluOp::SetEqual => Word::from_bool(ua == ub),
        AluOp::SetNotEqual => Word::from_bool(ua != ub),
        AluOp::Mul => Word::from_signed(a.wrapping_mul(b)),
        AluOp::Div => Word::from_signed(signed_divisor(b).map(|d| a.wrapping_div(d))?),
        AluOp::DivUnsigned => Word::from_unsigned(ua.checked_div(ub).ok_or(ExecuteFault::DivideByZero)?),
        AluOp::Rem => Word::from_signed(signed_divisor(b).map(|d| a.wrapping_rem(d))?),
        AluOp::RemUnsigned => Word::from_unsigned(ua.checked_rem(ub).ok_or(ExecuteFault::DivideByZero)?),
        AluOp::ShiftLeft => Word::from_unsigned(ua << shift),
        AluOp::ShiftRightLogical => Word::from_unsigned(ua >> shift),
        AluOp::ShiftRightArithmetic => Word::from_signed(a >> shift),
        AluOp::Abs => Word::from_signed(a.checked_abs().ok_or(ExecuteFault::ArithmeticOverflow)?),
    };
    Ok(result)
}

const fn signed_divisor(divisor: i32) -> Result<i32, ExecuteFault> {
    if divisor == 0 {
        Err(ExecuteFault::DivideByZero)
    } else {
        Ok(divisor)
    }
}
