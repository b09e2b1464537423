use std::rc::Rc;

use super::error::Exec;
use super::ErrorCode;
use crate::value::Value;

/// Data-stack slot: a value plus the optional argument name attached by
/// the `Name` opcode.
#[derive(Debug, Clone)]
pub(crate) struct StackEntry {
    pub value: Value,
    pub name: Option<Rc<str>>,
}

#[derive(Debug)]
pub(crate) struct DataStack {
    entries: Vec<StackEntry>,
    limit: usize,
}

impl DataStack {
    pub fn new(limit: usize) -> Self {
        DataStack { entries: Vec::new(), limit }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn push(&mut self, value: Value) -> Exec {
        self.push_entry(StackEntry { value, name: None })
    }

    pub fn push_entry(&mut self, entry: StackEntry) -> Exec {
        if self.entries.len() >= self.limit {
            return Err(ErrorCode::DataStackOverflow.into());
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn pop(&mut self) -> Exec<Value> {
        self.pop_entry().map(|e| e.value)
    }

    pub fn pop_entry(&mut self) -> Exec<StackEntry> {
        self.entries.pop().ok_or_else(|| ErrorCode::DataStackUnderflow.into())
    }

    /// Pops `n` entries, returned in push order.
    pub fn pop_n(&mut self, n: usize) -> Exec<Vec<StackEntry>> {
        if n > self.entries.len() {
            return Err(ErrorCode::DataStackUnderflow.into());
        }
        Ok(self.entries.split_off(self.entries.len() - n))
    }

    pub fn peek(&self) -> Exec<&Value> {
        self.entries.last().map(|e| &e.value).ok_or_else(|| ErrorCode::DataStackUnderflow.into())
    }

    pub fn peek_mut(&mut self) -> Exec<&mut StackEntry> {
        self.entries.last_mut().ok_or_else(|| ErrorCode::DataStackUnderflow.into())
    }

    /// Entry `depth` positions below the top (0 is the top).
    pub fn peek_at(&self, depth: usize) -> Exec<&Value> {
        self.entries
            .len()
            .checked_sub(depth + 1)
            .map(|i| &self.entries[i].value)
            .ok_or_else(|| ErrorCode::DataStackUnderflow.into())
    }

    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn underflow_and_overflow() {
        let mut s = DataStack::new(2);
        assert_eq!(s.pop().unwrap_err().code, ErrorCode::DataStackUnderflow.code());
        s.push(Value::Int32(1)).unwrap();
        s.push(Value::Int32(2)).unwrap();
        assert_eq!(s.push(Value::Int32(3)).unwrap_err().code, ErrorCode::DataStackOverflow.code());
        assert_eq!(s.peek_at(1).unwrap(), &Value::Int32(1));
        assert!(s.peek_at(2).is_err());
    }

    #[test]
    fn pop_n_keeps_order() {
        let mut s = DataStack::new(8);
        for i in 0..4 {
            s.push(Value::Int32(i)).unwrap();
        }
        let top: Vec<Value> = s.pop_n(3).unwrap().into_iter().map(|e| e.value).collect();
        assert_eq!(top, vec![Value::Int32(1), Value::Int32(2), Value::Int32(3)]);
        assert_eq!(s.len(), 1);
        assert!(s.pop_n(2).is_err());
    }
}
