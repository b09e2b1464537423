use std::cmp::Ordering;

use regex::RegexBuilder;

use super::number::{self, BinaryOp};
use super::Value;
use crate::vm::ErrorCode;

/// Evaluates a binary operator on two values.
pub fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ErrorCode> {
    match op {
        BinaryOp::Eq => return Ok(Value::Boolean(left.loose_eq(right))),
        BinaryOp::Ne => return Ok(Value::Boolean(!left.loose_eq(right))),
        _ => {}
    }
    if left.is_null() || right.is_null() {
        return Err(ErrorCode::NullValue);
    }
    match op {
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = order(left, right)?;
            let result = match (op, ordering) {
                (_, None) => false,
                (BinaryOp::Lt, Some(o)) => o == Ordering::Less,
                (BinaryOp::Le, Some(o)) => o != Ordering::Greater,
                (BinaryOp::Gt, Some(o)) => o == Ordering::Greater,
                (_, Some(o)) => o != Ordering::Less,
            };
            Ok(Value::Boolean(result))
        }
        _ => {
            let (l, r) = numbers(left, right)?;
            number::arithmetic(op, l, r).map(Value::from)
        }
    }
}

fn numbers(left: &Value, right: &Value) -> Result<(number::Number, number::Number), ErrorCode> {
    match (left.to_number(), right.to_number()) {
        (Some(l), Some(r)) => Ok((l, r)),
        _ if matches!(left, Value::Object(_)) || matches!(right, Value::Object(_)) => {
            Err(ErrorCode::InvalidObjectOperation)
        }
        _ => Err(ErrorCode::NotNumber),
    }
}

/// Relational ordering: numbers after promotion, otherwise two strings by bytes.
fn order(left: &Value, right: &Value) -> Result<Option<Ordering>, ErrorCode> {
    if let (Some(l), Some(r)) = (left.to_number(), right.to_number()) {
        return number::compare(l, r);
    }
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(Some(a.as_bytes().cmp(b.as_bytes()))),
        _ => Err(ErrorCode::NotNumber),
    }
}

pub fn concat(left: &Value, right: &Value) -> Result<Value, ErrorCode> {
    for v in [left, right] {
        match v {
            Value::Null => return Err(ErrorCode::NullValue),
            Value::Object(_) => return Err(ErrorCode::InvalidObjectOperation),
            _ => {}
        }
    }
    let mut text = left.to_text();
    text.push_str(&right.to_text());
    Ok(Value::string(text))
}

pub fn negate(value: &Value) -> Result<Value, ErrorCode> {
    match value {
        Value::Null => Err(ErrorCode::NullValue),
        Value::Int32(v) => Ok(Value::Int32(v.wrapping_neg())),
        Value::Int64(v) => Ok(Value::Int64(v.wrapping_neg())),
        Value::UInt32(v) => Ok(Value::Int32((*v as i32).wrapping_neg())),
        Value::UInt64(v) => Ok(Value::Int64((*v as i64).wrapping_neg())),
        Value::Real(v) => Ok(Value::Real(-v)),
        other => match other.to_number() {
            Some(n) => negate(&Value::from(n)),
            None => Err(ErrorCode::NotNumber),
        },
    }
}

pub fn bit_not(value: &Value) -> Result<Value, ErrorCode> {
    match value {
        Value::Null => Err(ErrorCode::NullValue),
        Value::Int32(v) => Ok(Value::Int32(!v)),
        Value::UInt32(v) => Ok(Value::UInt32(!v)),
        Value::Int64(v) => Ok(Value::Int64(!v)),
        Value::UInt64(v) => Ok(Value::UInt64(!v)),
        Value::Real(_) => Err(ErrorCode::RealValue),
        other => match other.to_number() {
            Some(n) => bit_not(&Value::from(n)),
            None => Err(ErrorCode::NotNumber),
        },
    }
}

/// Adds `delta` (±1) to a numeric value, keeping its type.
pub fn step(value: &Value, delta: i32) -> Result<Value, ErrorCode> {
    match value {
        Value::Null => Err(ErrorCode::NullValue),
        Value::Int32(v) => Ok(Value::Int32(v.wrapping_add(delta))),
        Value::UInt32(v) => Ok(Value::UInt32(v.wrapping_add_signed(delta))),
        Value::Int64(v) => Ok(Value::Int64(v.wrapping_add(delta as i64))),
        Value::UInt64(v) => Ok(Value::UInt64(v.wrapping_add_signed(delta as i64))),
        Value::Real(v) => Ok(Value::Real(v + delta as f64)),
        other => match other.to_number() {
            Some(n) => step(&Value::from(n), delta),
            None => Err(ErrorCode::NotNumber),
        },
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len() + 8);
    out.push('^');
    for c in pattern.chars() {
        match c {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    out
}

/// Shell-style wildcard match (`*` and `?`).
pub fn like(text: &Value, pattern: &Value, ignore_case: bool) -> Result<bool, ErrorCode> {
    let (Value::String(text), Value::String(pattern)) = (text, pattern) else {
        return Err(ErrorCode::NotString);
    };
    let re = RegexBuilder::new(&glob_to_regex(pattern))
        .case_insensitive(ignore_case)
        .dot_matches_new_line(true)
        .build()
        .map_err(|_| ErrorCode::BadRegexp)?;
    Ok(re.is_match(text))
}

/// Regular expression match. On success returns the capture groups
/// (group 1 onwards); unmatched optional groups are `None`.
pub fn regex_match(text: &Value, pattern: &Value, ignore_case: bool) -> Result<Option<Vec<Option<String>>>, ErrorCode> {
    let (Value::String(text), Value::String(pattern)) = (text, pattern) else {
        return Err(ErrorCode::NotString);
    };
    let re = RegexBuilder::new(pattern)
        .case_insensitive(ignore_case)
        .build()
        .map_err(|_| ErrorCode::BadRegexp)?;
    Ok(re.captures(text).map(|caps| {
        caps.iter().skip(1).map(|m| m.map(|m| m.as_str().to_string())).collect()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_promotes() {
        assert_eq!(binary(BinaryOp::Add, &Value::Int32(2), &Value::Int32(3)), Ok(Value::Int32(5)));
        assert_eq!(binary(BinaryOp::Add, &Value::Int32(2), &Value::Int64(3)), Ok(Value::Int64(5)));
        assert_eq!(binary(BinaryOp::Mul, &Value::from("4"), &Value::Int32(3)), Ok(Value::Int32(12)));
        assert_eq!(binary(BinaryOp::Div, &Value::Int32(1), &Value::Int32(4)), Ok(Value::Real(0.25)));
    }

    #[test]
    fn null_operands() {
        assert_eq!(binary(BinaryOp::Eq, &Value::Null, &Value::Null), Ok(Value::Boolean(true)));
        assert_eq!(binary(BinaryOp::Ne, &Value::Null, &Value::Int32(1)), Ok(Value::Boolean(true)));
        assert_eq!(binary(BinaryOp::Add, &Value::Null, &Value::Int32(1)), Err(ErrorCode::NullValue));
        assert_eq!(binary(BinaryOp::Lt, &Value::Int32(1), &Value::Null), Err(ErrorCode::NullValue));
    }

    #[test]
    fn string_ordering() {
        assert_eq!(binary(BinaryOp::Lt, &Value::from("abc"), &Value::from("abd")), Ok(Value::Boolean(true)));
        assert_eq!(binary(BinaryOp::Ge, &Value::from("10"), &Value::from("9")), Ok(Value::Boolean(true)));
        assert_eq!(binary(BinaryOp::Sub, &Value::from("a"), &Value::Int32(1)), Err(ErrorCode::NotNumber));
    }

    #[test]
    fn concat_rules() {
        assert_eq!(concat(&Value::from("a"), &Value::Int32(1)), Ok(Value::from("a1")));
        assert_eq!(concat(&Value::Null, &Value::from("a")), Err(ErrorCode::NullValue));
    }

    #[test]
    fn like_patterns() {
        assert_eq!(like(&Value::from("hello.txt"), &Value::from("*.txt"), false), Ok(true));
        assert_eq!(like(&Value::from("HELLO"), &Value::from("h?llo"), false), Ok(false));
        assert_eq!(like(&Value::from("HELLO"), &Value::from("h?llo"), true), Ok(true));
        assert_eq!(like(&Value::from("a+b"), &Value::from("a+b"), false), Ok(true));
        assert_eq!(like(&Value::Int32(1), &Value::from("*"), false), Err(ErrorCode::NotString));
    }

    #[test]
    fn regex_captures() {
        let caps = regex_match(&Value::from("key=value"), &Value::from("(\\w+)=(\\w+)"), false).unwrap();
        assert_eq!(caps, Some(vec![Some("key".to_string()), Some("value".to_string())]));
        assert_eq!(regex_match(&Value::from("x"), &Value::from("y"), false), Ok(None));
        assert_eq!(regex_match(&Value::from("x"), &Value::from("("), false), Err(ErrorCode::BadRegexp));
    }

    #[test]
    fn unary_ops() {
        assert_eq!(negate(&Value::Int32(5)), Ok(Value::Int32(-5)));
        assert_eq!(bit_not(&Value::Real(1.0)), Err(ErrorCode::RealValue));
        assert_eq!(step(&Value::UInt32(0), -1), Ok(Value::UInt32(u32::MAX)));
        assert_eq!(step(&Value::Null, 1), Err(ErrorCode::NullValue));
    }
}
