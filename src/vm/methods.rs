//! Built-in methods and attributes of arrays, hash maps and strings.

use crate::value::{Array, Handle, Map, Value};

use super::ErrorCode;

type MethodResult = Result<Value, ErrorCode>;

struct Method<T: ?Sized> {
    name: &'static str,
    min_args: usize,
    max_args: usize,
    call: fn(&T, &[Value]) -> MethodResult,
}

const fn method<T: ?Sized>(
    name: &'static str,
    min_args: usize,
    max_args: usize,
    call: fn(&T, &[Value]) -> MethodResult,
) -> Method<T> {
    Method { name, min_args, max_args, call }
}

static ARRAY_METHODS: &[Method<Handle<Array>>] = &[
    method("size", 0, 0, |a, _| Ok(Value::Int32(a.borrow().len() as i32))),
    method("push", 1, 1, array_push),
    method("pop", 0, 0, |a, _| Ok(a.borrow_mut().pop().unwrap_or(Value::Null))),
    method("insert", 2, 2, array_insert),
    method("remove", 1, 1, array_remove),
    method("indexOf", 1, 1, |a, args| Ok(Value::Int32(a.borrow().index_of(&args[0]).unwrap_or(-1)))),
    method("contains", 1, 1, |a, args| Ok(Value::Boolean(a.borrow().index_of(&args[0]).is_some()))),
    method("join", 1, 1, array_join),
];

static MAP_METHODS: &[Method<Handle<Map>>] = &[
    method("size", 0, 0, |m, _| Ok(Value::Int32(m.borrow().len() as i32))),
    method("keys", 0, 0, |m, _| Ok(map_keys(&m.borrow()))),
    method("values", 0, 0, |m, _| Ok(map_values(&m.borrow()))),
    method("contains", 1, 1, |m, args| Ok(Value::Boolean(m.borrow().contains(&args[0].to_key()?)))),
    method("remove", 1, 1, |m, args| {
        let key = args[0].to_key()?;
        Ok(m.borrow_mut().remove(&key).unwrap_or(Value::Null))
    }),
    method("get", 1, 2, |m, args| {
        let key = args[0].to_key()?;
        let fallback = args.get(1).cloned().unwrap_or(Value::Null);
        Ok(m.borrow().get(&key).cloned().unwrap_or(fallback))
    }),
];

static STRING_METHODS: &[Method<str>] = &[
    method("length", 0, 0, |s, _| Ok(Value::Int32(s.chars().count() as i32))),
    method("upper", 0, 0, |s, _| Ok(Value::from(s.to_uppercase()))),
    method("lower", 0, 0, |s, _| Ok(Value::from(s.to_lowercase()))),
    method("trim", 0, 0, |s, _| Ok(Value::from(s.trim()))),
    method("substring", 1, 2, string_substring),
    method("indexOf", 1, 1, string_index_of),
    method("split", 1, 1, string_split),
    method("contains", 1, 1, |s, args| Ok(Value::Boolean(s.contains(text_arg(&args[0])?.as_str())))),
    method("startsWith", 1, 1, |s, args| Ok(Value::Boolean(s.starts_with(text_arg(&args[0])?.as_str())))),
    method("endsWith", 1, 1, |s, args| Ok(Value::Boolean(s.ends_with(text_arg(&args[0])?.as_str())))),
];

fn invoke<T: ?Sized>(table: &[Method<T>], receiver: &T, name: &str, args: &[Value]) -> MethodResult {
    let method = table.iter().find(|m| m.name == name).ok_or(ErrorCode::NoSuchMethod)?;
    if args.len() < method.min_args || args.len() > method.max_args {
        return Err(ErrorCode::InvalidArgumentCount);
    }
    (method.call)(receiver, args)
}

/// Calls a built-in method on a non-object receiver.
pub(crate) fn call_method(receiver: &Value, name: &str, args: &[Value]) -> MethodResult {
    match receiver {
        Value::Array(a) => invoke(ARRAY_METHODS, a, name, args),
        Value::HashMap(m) => invoke(MAP_METHODS, m, name, args),
        Value::String(s) => invoke(STRING_METHODS, &**s, name, args),
        Value::Null => Err(ErrorCode::NullValue),
        _ => Err(ErrorCode::NotObject),
    }
}

/// Reads a built-in attribute of a non-object receiver.
pub(crate) fn get_attribute(receiver: &Value, name: &str) -> MethodResult {
    match (receiver, name) {
        (Value::Array(a), "size") => Ok(Value::Int32(a.borrow().len() as i32)),
        (Value::Array(a), "minIndex") => Ok(a.borrow().min_index().map_or(Value::Null, Value::Int32)),
        (Value::Array(a), "maxIndex") => Ok(a.borrow().max_index().map_or(Value::Null, Value::Int32)),
        (Value::HashMap(m), "size") => Ok(Value::Int32(m.borrow().len() as i32)),
        (Value::HashMap(m), "keys") => Ok(map_keys(&m.borrow())),
        (Value::HashMap(m), "values") => Ok(map_values(&m.borrow())),
        (Value::String(s), "length") => Ok(Value::Int32(s.chars().count() as i32)),
        (Value::Array(_) | Value::HashMap(_) | Value::String(_), _) => Err(ErrorCode::NoSuchAttribute),
        (Value::Null, _) => Err(ErrorCode::NullValue),
        _ => Err(ErrorCode::NotObject),
    }
}

fn index_arg(value: &Value) -> Result<i32, ErrorCode> {
    value.to_integer().and_then(|i| i32::try_from(i).ok()).ok_or(ErrorCode::NotInteger)
}

fn text_arg(value: &Value) -> Result<String, ErrorCode> {
    match value {
        Value::Null | Value::Array(_) | Value::HashMap(_) | Value::Object(_) | Value::Iterator(_) => {
            Err(ErrorCode::NotString)
        }
        other => Ok(other.to_text()),
    }
}

fn array_push(a: &Handle<Array>, args: &[Value]) -> MethodResult {
    let value = args[0].clone();
    a.borrow_mut().append(value)?;
    Ok(Value::Null)
}

fn array_insert(a: &Handle<Array>, args: &[Value]) -> MethodResult {
    let index = index_arg(&args[0])?;
    let value = args[1].clone();
    a.borrow_mut().insert(index, value)?;
    Ok(Value::Null)
}

fn array_remove(a: &Handle<Array>, args: &[Value]) -> MethodResult {
    let index = index_arg(&args[0])?;
    Ok(a.borrow_mut().remove(index).unwrap_or(Value::Null))
}

fn array_join(a: &Handle<Array>, args: &[Value]) -> MethodResult {
    let separator = text_arg(&args[0])?;
    let parts: Vec<String> = a.borrow().values().map(Value::to_text).collect();
    Ok(Value::from(parts.join(&separator)))
}

fn map_keys(m: &Map) -> Value {
    Value::array(m.keys().map(Value::from).collect())
}

fn map_values(m: &Map) -> Value {
    Value::array(m.values().cloned().collect())
}

fn string_substring(s: &str, args: &[Value]) -> MethodResult {
    let start = args[0].to_integer().ok_or(ErrorCode::NotInteger)?.max(0) as usize;
    let chars = s.chars().skip(start);
    let text: String = match args.get(1) {
        Some(len) => chars.take(len.to_integer().ok_or(ErrorCode::NotInteger)?.max(0) as usize).collect(),
        None => chars.collect(),
    };
    Ok(Value::from(text))
}

fn string_index_of(s: &str, args: &[Value]) -> MethodResult {
    let needle = text_arg(&args[0])?;
    let index = s.find(needle.as_str()).map_or(-1, |byte| s[..byte].chars().count() as i32);
    Ok(Value::Int32(index))
}

fn string_split(s: &str, args: &[Value]) -> MethodResult {
    let separator = text_arg(&args[0])?;
    if separator.is_empty() {
        return Ok(Value::array(s.chars().map(|c| Value::from(c.to_string())).collect()));
    }
    Ok(Value::array(s.split(separator.as_str()).map(Value::from).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn array(values: &[i32]) -> Value {
        Value::array(Array::from_values(values.iter().map(|&v| Value::Int32(v))))
    }

    #[test]
    fn array_methods_mutate_through_alias() {
        let a = array(&[1, 2]);
        let alias = a.alias();
        call_method(&alias, "push", &[Value::Int32(3)]).unwrap();
        assert_eq!(a.to_string(), "[1, 2, 3]");
        assert_eq!(call_method(&a, "pop", &[]).unwrap(), Value::Int32(3));
        assert_eq!(call_method(&a, "indexOf", &[Value::Int32(2)]).unwrap(), Value::Int32(1));
        assert_eq!(call_method(&a, "indexOf", &[Value::Int32(9)]).unwrap(), Value::Int32(-1));
        assert_eq!(call_method(&a, "join", &[Value::from("-")]).unwrap(), Value::from("1-2"));
    }

    #[test]
    fn mutating_method_does_not_touch_copies() {
        let a = array(&[1]);
        let copy = a.clone();
        call_method(&a, "push", &[Value::Int32(2)]).unwrap();
        assert_eq!(copy.to_string(), "[1]");
        assert_eq!(a.to_string(), "[1, 2]");
    }

    #[test]
    fn pushing_self_snapshots() {
        let a = array(&[1]);
        call_method(&a, "push", &[a.alias()]).unwrap();
        assert_eq!(a.to_string(), "[1, [1]]");
    }

    #[test]
    fn map_methods() {
        let mut m = Map::new();
        m.set("b", Value::Int32(2));
        m.set("a", Value::Int32(1));
        let m = Value::hashmap(m);
        assert_eq!(call_method(&m, "keys", &[]).unwrap().to_string(), "[\"a\", \"b\"]");
        assert_eq!(call_method(&m, "get", &[Value::from("z"), Value::Int32(0)]).unwrap(), Value::Int32(0));
        assert_eq!(call_method(&m, "remove", &[Value::from("a")]).unwrap(), Value::Int32(1));
        assert_eq!(get_attribute(&m, "size").unwrap(), Value::Int32(1));
    }

    #[test]
    fn string_methods() {
        let s = Value::from("Hello, World");
        assert_eq!(call_method(&s, "upper", &[]).unwrap(), Value::from("HELLO, WORLD"));
        assert_eq!(call_method(&s, "substring", &[Value::Int32(7)]).unwrap(), Value::from("World"));
        assert_eq!(call_method(&s, "substring", &[Value::Int32(0), Value::Int32(5)]).unwrap(), Value::from("Hello"));
        assert_eq!(call_method(&s, "indexOf", &[Value::from("World")]).unwrap(), Value::Int32(7));
        assert_eq!(call_method(&s, "split", &[Value::from(", ")]).unwrap().to_string(), "[\"Hello\", \"World\"]");
        assert_eq!(get_attribute(&s, "length").unwrap(), Value::Int32(12));
    }

    #[test]
    fn unknown_names_and_arity() {
        let a = array(&[]);
        assert_eq!(call_method(&a, "frobnicate", &[]), Err(ErrorCode::NoSuchMethod));
        assert_eq!(call_method(&a, "push", &[]), Err(ErrorCode::InvalidArgumentCount));
        assert_eq!(get_attribute(&a, "minIndex").unwrap(), Value::Null);
        assert_eq!(get_attribute(&Value::Int32(1), "size"), Err(ErrorCode::NotObject));
    }
}
