use std::rc::Rc;

use super::Value;
use crate::vm::object::Object;

#[derive(Debug)]
enum Source {
    Values(Vec<Value>),
    Object(Rc<Object>),
}

/// State of a `foreach` loop: a snapshot of the iterated values (or a host
/// object that yields them) plus the loop variable's name.
#[derive(Debug)]
pub struct ScriptIterator {
    source: Source,
    position: usize,
    variable: Rc<str>,
}

impl ScriptIterator {
    pub fn over_values(variable: Rc<str>, values: Vec<Value>) -> Self {
        ScriptIterator { source: Source::Values(values), position: 0, variable }
    }

    pub fn over_object(variable: Rc<str>, object: Rc<Object>) -> Self {
        ScriptIterator { source: Source::Object(object), position: 0, variable }
    }

    pub fn variable(&self) -> &Rc<str> {
        &self.variable
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn next_value(&mut self) -> Option<Value> {
        let value = match &self.source {
            Source::Values(values) => values.get(self.position).cloned(),
            Source::Object(object) => object.class().next(object, self.position),
        };
        if value.is_some() {
            self.position += 1;
        }
        value
    }
}
