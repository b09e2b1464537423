use std::cell::RefCell;
use std::collections::BTreeMap;

/// Persistent key/value store a host injects into a VM. It is the only
/// script-visible state meant to outlive a single run.
pub trait Storage {
    fn read(&self, key: &str) -> Option<String>;
    /// `None` deletes the key.
    fn write(&self, key: &str, value: Option<&str>);
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RefCell<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage::default()
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }
}

impl Storage for MemoryStorage {
    fn read(&self, key: &str) -> Option<String> {
        self.entries.borrow().get(key).cloned()
    }

    fn write(&self, key: &str, value: Option<&str>) {
        let mut entries = self.entries.borrow_mut();
        match value {
            Some(v) => {
                entries.insert(key.to_string(), v.to_string());
            }
            None => {
                entries.remove(key);
            }
        }
    }
}
