use std::collections::BTreeMap;

use super::Value;

/// String-keyed hash map value. Keys are kept sorted so listings are stable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Map {
    entries: BTreeMap<String, Value>,
}

impl Map {
    pub fn new() -> Self {
        Map { entries: BTreeMap::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.get_mut(key)
    }

    pub fn entry(&mut self, key: &str) -> &mut Value {
        self.entries.entry(key.to_string()).or_insert(Value::Null)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Value)> for Map {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Map { entries: iter.into_iter().collect() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_sorted() {
        let mut m = Map::new();
        m.set("b", Value::Int32(2));
        m.set("a", Value::Int32(1));
        assert_eq!(m.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn entry_creates_null() {
        let mut m = Map::new();
        assert_eq!(*m.entry("x"), Value::Null);
        assert!(m.contains("x"));
        *m.entry("x") = Value::Boolean(true);
        assert_eq!(m.get("x"), Some(&Value::Boolean(true)));
    }
}
