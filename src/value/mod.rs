//! Dynamically typed script values.

pub mod array;
pub mod handle;
pub mod iterator;
pub mod map;
pub mod number;
pub mod ops;

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

pub use array::Array;
pub use handle::Handle;
pub use iterator::ScriptIterator;
pub use map::Map;
pub use number::{BinaryOp, Number, select_result_type};

use crate::vm::ErrorCode;
use crate::vm::object::Object;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Null,
    Boolean,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Real,
    String,
    Array,
    HashMap,
    Object,
    Iterator,
}

impl DataType {
    pub fn name(self) -> &'static str {
        match self {
            DataType::Null => "null",
            DataType::Boolean => "boolean",
            DataType::Int32 => "int32",
            DataType::UInt32 => "uint32",
            DataType::Int64 => "int64",
            DataType::UInt64 => "uint64",
            DataType::Real => "real",
            DataType::String => "string",
            DataType::Array => "array",
            DataType::HashMap => "hashmap",
            DataType::Object => "object",
            DataType::Iterator => "iterator",
        }
    }

    /// Numeric code carried in `Cast` instructions.
    pub fn code(self) -> i32 {
        match self {
            DataType::Null => 0,
            DataType::Boolean => 1,
            DataType::Int32 => 2,
            DataType::UInt32 => 3,
            DataType::Int64 => 4,
            DataType::UInt64 => 5,
            DataType::Real => 6,
            DataType::String => 7,
            DataType::Array => 8,
            DataType::HashMap => 9,
            DataType::Object => 10,
            DataType::Iterator => 11,
        }
    }

    pub fn from_code(code: i32) -> Option<DataType> {
        Some(match code {
            0 => DataType::Null,
            1 => DataType::Boolean,
            2 => DataType::Int32,
            3 => DataType::UInt32,
            4 => DataType::Int64,
            5 => DataType::UInt64,
            6 => DataType::Real,
            7 => DataType::String,
            8 => DataType::Array,
            9 => DataType::HashMap,
            10 => DataType::Object,
            11 => DataType::Iterator,
            _ => return None,
        })
    }

    pub fn is_unsigned(self) -> bool {
        matches!(self, DataType::UInt32 | DataType::UInt64)
    }

    pub fn to_signed(self) -> DataType {
        match self {
            DataType::UInt32 => DataType::Int32,
            DataType::UInt64 => DataType::Int64,
            other => other,
        }
    }

    /// The arithmetic type a value of this type takes part as, if any.
    pub fn numeric_class(self) -> Option<DataType> {
        match self {
            DataType::Boolean => Some(DataType::Int32),
            DataType::Int32 | DataType::UInt32 | DataType::Int64 | DataType::UInt64 | DataType::Real => Some(self),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Real(f64),
    String(Rc<str>),
    Array(Handle<Array>),
    HashMap(Handle<Map>),
    Object(Rc<Object>),
    Iterator(Rc<RefCell<ScriptIterator>>),
}

impl Value {
    pub fn string(text: impl Into<Rc<str>>) -> Value {
        Value::String(text.into())
    }

    pub fn array(array: Array) -> Value {
        Value::Array(Handle::new(array))
    }

    pub fn hashmap(map: Map) -> Value {
        Value::HashMap(Handle::new(map))
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Boolean(_) => DataType::Boolean,
            Value::Int32(_) => DataType::Int32,
            Value::UInt32(_) => DataType::UInt32,
            Value::Int64(_) => DataType::Int64,
            Value::UInt64(_) => DataType::UInt64,
            Value::Real(_) => DataType::Real,
            Value::String(_) => DataType::String,
            Value::Array(_) => DataType::Array,
            Value::HashMap(_) => DataType::HashMap,
            Value::Object(_) => DataType::Object,
            Value::Iterator(_) => DataType::Iterator,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.data_type().name()
    }

    /// Shares the container slot instead of the container, so writes made
    /// through the alias are seen by the original owner.
    pub fn alias(&self) -> Value {
        match self {
            Value::Array(h) => Value::Array(h.alias()),
            Value::HashMap(h) => Value::HashMap(h.alias()),
            other => other.clone(),
        }
    }

    /// Handle count of the backing container, for arrays and hash maps.
    pub fn handle_count(&self) -> Option<usize> {
        match self {
            Value::Array(h) => Some(h.handle_count()),
            Value::HashMap(h) => Some(h.handle_count()),
            _ => None,
        }
    }

    pub fn same_container(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Array(a), Value::Array(b)) => a.same_container(b),
            (Value::HashMap(a), Value::HashMap(b)) => a.same_container(b),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&Rc<Object>> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Truthiness used by conditional jumps and logical operators.
    pub fn is_true(&self) -> Result<bool, ErrorCode> {
        Ok(match self {
            Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Int32(v) => *v != 0,
            Value::UInt32(v) => *v != 0,
            Value::Int64(v) => *v != 0,
            Value::UInt64(v) => *v != 0,
            Value::Real(v) => *v != 0.0,
            Value::String(s) => match Number::parse(s) {
                Some(n) => !n.is_zero(),
                None => !s.is_empty(),
            },
            Value::Array(_) | Value::HashMap(_) | Value::Object(_) => true,
            Value::Iterator(_) => return Err(ErrorCode::BadCondition),
        })
    }

    /// Numeric view of the value: numbers as-is, booleans as 0/1, numeric strings parsed.
    pub fn to_number(&self) -> Option<Number> {
        match self {
            Value::Boolean(b) => Some(Number::Int32(*b as i32)),
            Value::Int32(v) => Some(Number::Int32(*v)),
            Value::UInt32(v) => Some(Number::UInt32(*v)),
            Value::Int64(v) => Some(Number::Int64(*v)),
            Value::UInt64(v) => Some(Number::UInt64(*v)),
            Value::Real(v) => Some(Number::Real(*v)),
            Value::String(s) => Number::parse(s),
            _ => None,
        }
    }

    /// Whole-number view, used for array indices and shift counts.
    pub fn to_integer(&self) -> Option<i64> {
        match self.to_number()? {
            Number::Real(_) => None,
            n => Some(n.as_i64()),
        }
    }

    /// Key used to address a hash map element.
    pub fn to_key(&self) -> Result<String, ErrorCode> {
        match self {
            Value::String(s) => Ok(s.to_string()),
            Value::Null | Value::Array(_) | Value::HashMap(_) | Value::Object(_) | Value::Iterator(_) => {
                Err(ErrorCode::KeyNotString)
            }
            scalar => Ok(scalar.to_text()),
        }
    }

    /// String conversion as scripts see it; null converts to an empty string.
    pub fn to_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::String(s) => s.to_string(),
            other => other.to_string(),
        }
    }

    /// Explicit cast to `target`.
    pub fn convert(&self, target: DataType) -> Result<Value, ErrorCode> {
        match target {
            DataType::Boolean => Ok(Value::Boolean(self.is_true()?)),
            DataType::String => match self {
                Value::Iterator(_) => Err(ErrorCode::TypeCast),
                other => Ok(Value::string(other.to_text())),
            },
            DataType::Int32 | DataType::UInt32 | DataType::Int64 | DataType::UInt64 | DataType::Real => {
                let number = match self {
                    Value::Null => Number::Int32(0),
                    other => other.to_number().ok_or(ErrorCode::TypeCast)?,
                };
                number.convert(target).map(Value::from).ok_or(ErrorCode::TypeCast)
            }
            DataType::Null => Ok(Value::Null),
            _ if self.data_type() == target => Ok(self.clone()),
            _ => Err(ErrorCode::TypeCast),
        }
    }

    /// Script-level equality: null only equals null, numbers compare after
    /// promotion, containers compare element-wise, objects by identity.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Array(a), Value::Array(b)) => {
                if a.same_container(b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len()
                    && a.iter().zip(b.iter()).all(|(x, y)| x.index == y.index && x.value.loose_eq(&y.value))
            }
            (Value::HashMap(a), Value::HashMap(b)) => {
                if a.same_container(b) {
                    return true;
                }
                let (a, b) = (a.borrow(), b.borrow());
                a.len() == b.len() && a.iter().zip(b.iter()).all(|((ka, va), (kb, vb))| ka == kb && va.loose_eq(vb))
            }
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Iterator(a), Value::Iterator(b)) => Rc::ptr_eq(a, b),
            (Value::Array(_) | Value::HashMap(_) | Value::Object(_) | Value::Iterator(_), _)
            | (_, Value::Array(_) | Value::HashMap(_) | Value::Object(_) | Value::Iterator(_)) => false,
            _ => match (self.to_number(), other.to_number()) {
                (Some(a), Some(b)) => {
                    matches!(number::compare(a, b), Ok(Some(std::cmp::Ordering::Equal)))
                }
                _ => self.to_text() == other.to_text(),
            },
        }
    }
}

impl PartialEq for Value {
    /// Strict structural equality: types must match exactly.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int32(a), Value::Int32(b)) => a == b,
            (Value::UInt32(a), Value::UInt32(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::UInt64(a), Value::UInt64(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::HashMap(a), Value::HashMap(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Rc::ptr_eq(a, b),
            (Value::Iterator(a), Value::Iterator(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

fn write_nested(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::String(s) => write!(f, "{s:?}"),
        other => write!(f, "{other}"),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Int32(v) => write!(f, "{v}"),
            Value::UInt32(v) => write!(f, "{v}"),
            Value::Int64(v) => write!(f, "{v}"),
            Value::UInt64(v) => write!(f, "{v}"),
            Value::Real(v) => write!(f, "{v}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(a) => {
                write!(f, "[")?;
                for (i, e) in a.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write_nested(f, &e.value)?;
                }
                write!(f, "]")
            }
            Value::HashMap(m) => {
                write!(f, "%{{")?;
                for (i, (k, v)) in m.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k:?}: ")?;
                    write_nested(f, v)?;
                }
                write!(f, "}}")
            }
            Value::Object(o) => write!(f, "{}", o.class().to_display(o)),
            Value::Iterator(_) => write!(f, "<iterator>"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int32(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::UInt32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Value::UInt64(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::string(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::string(v)
    }
}

impl From<Array> for Value {
    fn from(v: Array) -> Self {
        Value::array(v)
    }
}

impl From<Map> for Value {
    fn from(v: Map) -> Self {
        Value::hashmap(v)
    }
}

impl From<Rc<Object>> for Value {
    fn from(v: Rc<Object>) -> Self {
        Value::Object(v)
    }
}
