use std::cmp::Ordering;

use super::{DataType, Value};
use crate::vm::ErrorCode;

/// Binary operators that go through numeric promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Shl,
    Shr,
    BitAnd,
    BitOr,
    BitXor,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinaryOp {
    fn integer_only(self) -> bool {
        matches!(
            self,
            BinaryOp::Rem | BinaryOp::Shl | BinaryOp::Shr | BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor
        )
    }
}

/// Result type of a binary numeric operation.
///
/// Division is always real. With a real operand, integer-only operators fail
/// and everything else is real. Otherwise a mixed signed/unsigned pair is
/// first mapped to the signed family and the wider type wins.
pub fn select_result_type(left: DataType, right: DataType, op: BinaryOp) -> Result<DataType, ErrorCode> {
    let (left, right) = match (left.numeric_class(), right.numeric_class()) {
        (Some(l), Some(r)) => (l, r),
        _ => return Err(ErrorCode::NotNumber),
    };
    if op == BinaryOp::Div {
        return Ok(DataType::Real);
    }
    if left == DataType::Real || right == DataType::Real {
        return if op.integer_only() { Err(ErrorCode::RealValue) } else { Ok(DataType::Real) };
    }
    let (left, right) = if left.is_unsigned() != right.is_unsigned() {
        (left.to_signed(), right.to_signed())
    } else {
        (left, right)
    };
    Ok(if integer_rank(left) >= integer_rank(right) { left } else { right })
}

fn integer_rank(ty: DataType) -> u8 {
    match ty {
        DataType::Int32 => 0,
        DataType::Int64 => 1,
        DataType::UInt32 => 2,
        _ => 3,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Real(f64),
}

impl Number {
    pub fn data_type(self) -> DataType {
        match self {
            Number::Int32(_) => DataType::Int32,
            Number::UInt32(_) => DataType::UInt32,
            Number::Int64(_) => DataType::Int64,
            Number::UInt64(_) => DataType::UInt64,
            Number::Real(_) => DataType::Real,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Number::Int32(v) => v as i64,
            Number::UInt32(v) => v as i64,
            Number::Int64(v) => v,
            Number::UInt64(v) => v as i64,
            Number::Real(v) => v as i64,
        }
    }

    pub fn as_u64(self) -> u64 {
        match self {
            Number::Int32(v) => v as u64,
            Number::UInt32(v) => v as u64,
            Number::Int64(v) => v as u64,
            Number::UInt64(v) => v,
            Number::Real(v) => v as u64,
        }
    }

    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int32(v) => v as f64,
            Number::UInt32(v) => v as f64,
            Number::Int64(v) => v as f64,
            Number::UInt64(v) => v as f64,
            Number::Real(v) => v,
        }
    }

    pub fn is_zero(self) -> bool {
        match self {
            Number::Real(v) => v == 0.0,
            other => other.as_u64() == 0,
        }
    }

    pub fn is_integer(self) -> bool {
        !matches!(self, Number::Real(_))
    }

    /// C-style conversion between numeric types; `None` for a non-numeric target.
    pub fn convert(self, to: DataType) -> Option<Number> {
        Some(match to {
            DataType::Int32 => Number::Int32(self.as_i64() as i32),
            DataType::UInt32 => Number::UInt32(self.as_u64() as u32),
            DataType::Int64 => Number::Int64(self.as_i64()),
            DataType::UInt64 => Number::UInt64(self.as_u64()),
            DataType::Real => Number::Real(self.as_f64()),
            _ => return None,
        })
    }

    /// Parses a numeric string: integers take the narrowest of int32, int64
    /// and uint64, anything else that looks like a number becomes real.
    pub fn parse(text: &str) -> Option<Number> {
        let t = text.trim();
        if t.is_empty() {
            return None;
        }
        if let Ok(v) = t.parse::<i64>() {
            return Some(match i32::try_from(v) {
                Ok(small) => Number::Int32(small),
                Err(_) => Number::Int64(v),
            });
        }
        if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
            return u64::from_str_radix(hex, 16).ok().map(|v| match i64::try_from(v) {
                Ok(signed) => Number::Int64(signed),
                Err(_) => Number::UInt64(v),
            });
        }
        if let Ok(v) = t.parse::<u64>() {
            return Some(Number::UInt64(v));
        }
        let plausible = t.bytes().all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
        if plausible {
            return t.parse::<f64>().ok().map(Number::Real);
        }
        None
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Int32(v) => Value::Int32(v),
            Number::UInt32(v) => Value::UInt32(v),
            Number::Int64(v) => Value::Int64(v),
            Number::UInt64(v) => Value::UInt64(v),
            Number::Real(v) => Value::Real(v),
        }
    }
}

macro_rules! integer_op {
    ($variant:ident, $x:expr, $y:expr, $op:expr) => {{
        let (x, y) = ($x, $y);
        let result = match $op {
            BinaryOp::Add => x.wrapping_add(y),
            BinaryOp::Sub => x.wrapping_sub(y),
            BinaryOp::Mul => x.wrapping_mul(y),
            BinaryOp::Rem => {
                if y == 0 {
                    return Err(ErrorCode::DivideByZero);
                }
                x.wrapping_rem(y)
            }
            BinaryOp::Shl => x.wrapping_shl(y as u32),
            BinaryOp::Shr => x.wrapping_shr(y as u32),
            BinaryOp::BitAnd => x & y,
            BinaryOp::BitOr => x | y,
            BinaryOp::BitXor => x ^ y,
            _ => return Err(ErrorCode::Internal),
        };
        Number::$variant(result)
    }};
}

/// Applies an arithmetic or bitwise operator after promotion.
pub fn arithmetic(op: BinaryOp, left: Number, right: Number) -> Result<Number, ErrorCode> {
    let ty = select_result_type(left.data_type(), right.data_type(), op)?;
    let l = left.convert(ty).ok_or(ErrorCode::BadArithmeticConversion)?;
    let r = right.convert(ty).ok_or(ErrorCode::BadArithmeticConversion)?;
    Ok(match (l, r) {
        (Number::Real(x), Number::Real(y)) => match op {
            BinaryOp::Add => Number::Real(x + y),
            BinaryOp::Sub => Number::Real(x - y),
            BinaryOp::Mul => Number::Real(x * y),
            BinaryOp::Div => {
                if y == 0.0 {
                    return Err(ErrorCode::DivideByZero);
                }
                Number::Real(x / y)
            }
            _ => return Err(ErrorCode::RealValue),
        },
        (Number::Int32(x), Number::Int32(y)) => integer_op!(Int32, x, y, op),
        (Number::UInt32(x), Number::UInt32(y)) => integer_op!(UInt32, x, y, op),
        (Number::Int64(x), Number::Int64(y)) => integer_op!(Int64, x, y, op),
        (Number::UInt64(x), Number::UInt64(y)) => integer_op!(UInt64, x, y, op),
        _ => return Err(ErrorCode::BadArithmeticConversion),
    })
}

/// Orders two numbers after promotion; `None` when a real NaN is involved.
pub fn compare(left: Number, right: Number) -> Result<Option<Ordering>, ErrorCode> {
    let ty = select_result_type(left.data_type(), right.data_type(), BinaryOp::Eq)?;
    let l = left.convert(ty).ok_or(ErrorCode::BadArithmeticConversion)?;
    let r = right.convert(ty).ok_or(ErrorCode::BadArithmeticConversion)?;
    Ok(match (l, r) {
        (Number::Real(x), Number::Real(y)) => x.partial_cmp(&y),
        (Number::Int32(x), Number::Int32(y)) => Some(x.cmp(&y)),
        (Number::UInt32(x), Number::UInt32(y)) => Some(x.cmp(&y)),
        (Number::Int64(x), Number::Int64(y)) => Some(x.cmp(&y)),
        (Number::UInt64(x), Number::UInt64(y)) => Some(x.cmp(&y)),
        _ => return Err(ErrorCode::BadArithmeticConversion),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn division_is_real() {
        assert_eq!(select_result_type(DataType::Int32, DataType::Int32, BinaryOp::Div), Ok(DataType::Real));
        assert_eq!(
            arithmetic(BinaryOp::Div, Number::Int32(7), Number::Int32(2)),
            Ok(Number::Real(3.5))
        );
    }

    #[test]
    fn real_rejects_integer_only_ops() {
        assert_eq!(
            select_result_type(DataType::Real, DataType::Int32, BinaryOp::Rem),
            Err(ErrorCode::RealValue)
        );
        assert_eq!(select_result_type(DataType::Real, DataType::Int32, BinaryOp::Add), Ok(DataType::Real));
    }

    #[test]
    fn mixed_signedness_goes_signed() {
        assert_eq!(select_result_type(DataType::UInt32, DataType::Int32, BinaryOp::Add), Ok(DataType::Int32));
        assert_eq!(select_result_type(DataType::UInt64, DataType::Int32, BinaryOp::Add), Ok(DataType::Int64));
        assert_eq!(select_result_type(DataType::UInt32, DataType::UInt64, BinaryOp::Mul), Ok(DataType::UInt64));
        assert_eq!(select_result_type(DataType::Int32, DataType::Int64, BinaryOp::Sub), Ok(DataType::Int64));
    }

    #[test]
    fn booleans_count_as_int32() {
        assert_eq!(select_result_type(DataType::Boolean, DataType::Int32, BinaryOp::Add), Ok(DataType::Int32));
        assert_eq!(
            select_result_type(DataType::String, DataType::Int32, BinaryOp::Add),
            Err(ErrorCode::NotNumber)
        );
    }

    #[test]
    fn integer_division_by_zero() {
        assert_eq!(
            arithmetic(BinaryOp::Rem, Number::Int32(1), Number::Int32(0)),
            Err(ErrorCode::DivideByZero)
        );
        assert_eq!(
            arithmetic(BinaryOp::Div, Number::Int64(1), Number::Int32(0)),
            Err(ErrorCode::DivideByZero)
        );
    }

    #[test]
    fn wrapping_overflow() {
        assert_eq!(
            arithmetic(BinaryOp::Add, Number::Int32(i32::MAX), Number::Int32(1)),
            Ok(Number::Int32(i32::MIN))
        );
    }

    #[test]
    fn parse_numeric_strings() {
        assert_eq!(Number::parse("42"), Some(Number::Int32(42)));
        assert_eq!(Number::parse(" 5000000000 "), Some(Number::Int64(5_000_000_000)));
        assert_eq!(Number::parse("18446744073709551615"), Some(Number::UInt64(u64::MAX)));
        assert_eq!(Number::parse("2.5"), Some(Number::Real(2.5)));
        assert_eq!(Number::parse("0x10"), Some(Number::Int64(16)));
        assert_eq!(Number::parse("abc"), None);
        assert_eq!(Number::parse("inf"), None);
        assert_eq!(Number::parse(""), None);
    }

    #[test]
    fn compare_promotes() {
        assert_eq!(compare(Number::Int32(3), Number::Real(3.0)), Ok(Some(Ordering::Equal)));
        assert_eq!(compare(Number::UInt32(1), Number::Int32(-1)), Ok(Some(Ordering::Greater)));
    }
}
