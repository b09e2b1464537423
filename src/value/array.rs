use super::Value;
use crate::vm::ErrorCode;

#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub index: i32,
    pub value: Value,
}

/// Sparse array: elements sorted by index, looked up by binary search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Array {
    elements: Vec<Element>,
}

impl Array {
    pub fn new() -> Self {
        Array { elements: Vec::new() }
    }

    /// Dense array indexed from 0.
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        let elements = values
            .into_iter()
            .enumerate()
            .map(|(i, value)| Element { index: i as i32, value })
            .collect();
        Array { elements }
    }

    fn position(&self, index: i32) -> Result<usize, usize> {
        self.elements.binary_search_by_key(&index, |e| e.index)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn min_index(&self) -> Option<i32> {
        self.elements.first().map(|e| e.index)
    }

    pub fn max_index(&self) -> Option<i32> {
        self.elements.last().map(|e| e.index)
    }

    pub fn get(&self, index: i32) -> Option<&Value> {
        self.position(index).ok().map(|pos| &self.elements[pos].value)
    }

    pub fn get_mut(&mut self, index: i32) -> Option<&mut Value> {
        match self.position(index) {
            Ok(pos) => Some(&mut self.elements[pos].value),
            Err(_) => None,
        }
    }

    /// Element slot at `index`, created as null when missing.
    pub fn entry(&mut self, index: i32) -> &mut Value {
        let pos = match self.position(index) {
            Ok(pos) => pos,
            Err(pos) => {
                self.elements.insert(pos, Element { index, value: Value::Null });
                pos
            }
        };
        &mut self.elements[pos].value
    }

    pub fn set(&mut self, index: i32, value: Value) {
        match self.position(index) {
            Ok(pos) => self.elements[pos].value = value,
            Err(pos) => self.elements.insert(pos, Element { index, value }),
        }
    }

    /// Appends after the highest index. Fails when that index is `i32::MAX`.
    pub fn append(&mut self, value: Value) -> Result<i32, ErrorCode> {
        let index = match self.max_index() {
            Some(max) => max.checked_add(1).ok_or(ErrorCode::IndexNotInteger)?,
            None => 0,
        };
        self.elements.push(Element { index, value });
        Ok(index)
    }

    /// Inserts at `index`, moving every element at or above it up by one.
    pub fn insert(&mut self, index: i32, value: Value) -> Result<(), ErrorCode> {
        let pos = match self.position(index) {
            Ok(pos) | Err(pos) => pos,
        };
        if pos < self.elements.len() && self.max_index() == Some(i32::MAX) {
            return Err(ErrorCode::IndexNotInteger);
        }
        for e in &mut self.elements[pos..] {
            e.index += 1;
        }
        self.elements.insert(pos, Element { index, value });
        Ok(())
    }

    /// Removes `index` and moves every element above it down by one.
    pub fn remove(&mut self, index: i32) -> Option<Value> {
        let (removed, pos) = match self.position(index) {
            Ok(pos) => (Some(self.elements.remove(pos).value), pos),
            Err(pos) => (None, pos),
        };
        for e in &mut self.elements[pos..] {
            e.index = e.index.wrapping_sub(1);
        }
        removed
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.elements.pop().map(|e| e.value)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.elements.iter().map(|e| &e.value)
    }

    /// Elements with `start <= index < end`, re-indexed from 0.
    pub fn slice(&self, start: Option<i32>, end: Option<i32>) -> Array {
        let start = start.unwrap_or(i32::MIN);
        let values = self
            .elements
            .iter()
            .filter(|e| e.index >= start && end.is_none_or(|end| e.index < end))
            .map(|e| e.value.clone());
        Array::from_values(values)
    }

    pub fn index_of(&self, value: &Value) -> Option<i32> {
        self.elements.iter().find(|e| e.value.loose_eq(value)).map(|e| e.index)
    }
}

impl FromIterator<Value> for Array {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Array::from_values(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(a: &Array) -> Vec<(i32, i32)> {
        a.iter()
            .map(|e| match e.value {
                Value::Int32(v) => (e.index, v),
                _ => panic!("unexpected element {:?}", e.value),
            })
            .collect()
    }

    #[test]
    fn sparse_set_keeps_order() {
        let mut a = Array::new();
        a.set(10, Value::Int32(1));
        a.set(-3, Value::Int32(2));
        a.set(4, Value::Int32(3));
        assert_eq!(ints(&a), vec![(-3, 2), (4, 3), (10, 1)]);
        assert_eq!(a.get(4), Some(&Value::Int32(3)));
        assert_eq!(a.get(5), None);
    }

    #[test]
    fn append_after_max_index() {
        let mut a = Array::from_values([Value::Int32(7)]);
        a.set(10, Value::Int32(8));
        assert_eq!(a.append(Value::Int32(9)), Ok(11));
        assert_eq!(Array::new().append(Value::Null), Ok(0));
    }

    #[test]
    fn append_and_insert_stop_at_max_index() {
        let mut a = Array::new();
        a.set(i32::MAX, Value::Int32(1));
        assert_eq!(a.append(Value::Int32(2)), Err(ErrorCode::IndexNotInteger));
        assert_eq!(a.insert(0, Value::Int32(9)), Err(ErrorCode::IndexNotInteger));
        assert_eq!(ints(&a), vec![(i32::MAX, 1)]);
        assert_eq!(a.max_index(), Some(i32::MAX));

        // nothing above the insertion point to shift
        let mut b = Array::new();
        b.set(5, Value::Int32(1));
        b.insert(i32::MAX, Value::Int32(2)).unwrap();
        assert_eq!(ints(&b), vec![(5, 1), (i32::MAX, 2)]);
    }

    #[test]
    fn insert_shifts_up() {
        let mut a = Array::from_values([Value::Int32(0), Value::Int32(1), Value::Int32(2)]);
        a.insert(1, Value::Int32(9)).unwrap();
        assert_eq!(ints(&a), vec![(0, 0), (1, 9), (2, 1), (3, 2)]);
    }

    #[test]
    fn remove_shifts_down() {
        let mut a = Array::from_values([Value::Int32(0), Value::Int32(1), Value::Int32(2)]);
        assert_eq!(a.remove(0), Some(Value::Int32(0)));
        assert_eq!(ints(&a), vec![(0, 1), (1, 2)]);
        assert_eq!(a.remove(42), None);
    }

    #[test]
    fn slice_reindexes() {
        let a = Array::from_values((0..6).map(Value::Int32));
        let s = a.slice(Some(2), Some(4));
        assert_eq!(ints(&s), vec![(0, 2), (1, 3)]);
        assert_eq!(a.slice(None, Some(1)).len(), 1);
        assert_eq!(a.slice(Some(4), None).len(), 2);
    }
}
