use std::collections::HashMap;
use std::rc::Rc;

use crate::value::Value;

/// Variable scope kinds, in lookup order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Constant,
    Local,
    Expression,
    Context,
    Global,
}

impl Scope {
    /// Scopes whose bindings may be kept in the inline cache. Context and
    /// global bindings can be shadowed later by a new local, so they are
    /// always resolved by name.
    pub fn cacheable(self) -> bool {
        matches!(self, Scope::Constant | Scope::Local | Scope::Expression)
    }
}

/// Resolved location of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Binding {
    pub scope: Scope,
    pub slot: usize,
}

#[derive(Debug, Clone)]
pub struct Variable {
    name: Rc<str>,
    pub(crate) value: Value,
    constant: bool,
}

impl Variable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn is_constant(&self) -> bool {
        self.constant
    }
}

/// Variables of one scope. Slots are stable: variables are never removed
/// individually, only all at once.
#[derive(Debug)]
pub(crate) struct VariableSystem {
    scope: Scope,
    variables: Vec<Variable>,
    index: HashMap<Rc<str>, usize>,
    /// Instructions whose inline-cache entry points into this system.
    cache_refs: Vec<usize>,
}

impl VariableSystem {
    pub fn new(scope: Scope) -> Self {
        VariableSystem { scope, variables: Vec::new(), index: HashMap::new(), cache_refs: Vec::new() }
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn get(&self, slot: usize) -> Option<&Variable> {
        self.variables.get(slot)
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut Variable> {
        self.variables.get_mut(slot)
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.find(name).map(|slot| &self.variables[slot].value)
    }

    pub fn create(&mut self, name: Rc<str>, value: Value, constant: bool) -> usize {
        let slot = self.variables.len();
        self.index.insert(name.clone(), slot);
        self.variables.push(Variable { name, value, constant });
        slot
    }

    /// Assigns by name, creating the variable when missing.
    pub fn set(&mut self, name: &str, value: Value) -> usize {
        match self.find(name) {
            Some(slot) => {
                self.variables[slot].value = value;
                slot
            }
            None => self.create(name.into(), value, self.scope == Scope::Constant),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Variable> {
        self.variables.iter()
    }

    pub fn clear(&mut self) {
        self.variables.clear();
        self.index.clear();
    }
}

/// Side table from instruction index to resolved binding.
#[derive(Debug)]
pub(crate) struct InlineCache {
    entries: HashMap<usize, Binding>,
    enabled: bool,
}

impl InlineCache {
    pub fn new(enabled: bool) -> Self {
        InlineCache { entries: HashMap::new(), enabled }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, ip: usize) -> Option<Binding> {
        self.entries.get(&ip).copied()
    }

    pub fn remember(&mut self, ip: usize, binding: Binding, owner: &mut VariableSystem) {
        if !self.enabled || !binding.scope.cacheable() {
            return;
        }
        self.entries.insert(ip, binding);
        owner.cache_refs.push(ip);
    }

    /// Drops every entry pointing into `owner`. Called whenever the system is
    /// suspended by a call or destroyed by a return or unwind.
    pub fn invalidate(&mut self, owner: &mut VariableSystem) {
        for ip in owner.cache_refs.drain(..) {
            if self.entries.get(&ip).is_some_and(|b| b.scope == owner.scope) {
                self.entries.remove(&ip);
            }
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_creates_then_overwrites() {
        let mut vars = VariableSystem::new(Scope::Global);
        let a = vars.set("x", Value::Int32(1));
        let b = vars.set("x", Value::Int32(2));
        assert_eq!(a, b);
        assert_eq!(vars.value("x"), Some(&Value::Int32(2)));
        assert!(!vars.get(a).unwrap().is_constant());
    }

    #[test]
    fn constants_are_flagged() {
        let mut vars = VariableSystem::new(Scope::Constant);
        let slot = vars.set("PI", Value::Real(3.14));
        assert!(vars.get(slot).unwrap().is_constant());
    }

    #[test]
    fn invalidation_removes_only_owned_entries() {
        let mut cache = InlineCache::new(true);
        let mut locals = VariableSystem::new(Scope::Local);
        let mut consts = VariableSystem::new(Scope::Constant);
        let l = locals.create("a".into(), Value::Null, false);
        let c = consts.create("K".into(), Value::Int32(1), true);
        cache.remember(10, Binding { scope: Scope::Local, slot: l }, &mut locals);
        cache.remember(11, Binding { scope: Scope::Constant, slot: c }, &mut consts);
        cache.invalidate(&mut locals);
        assert_eq!(cache.get(10), None);
        assert_eq!(cache.get(11), Some(Binding { scope: Scope::Constant, slot: c }));
    }

    #[test]
    fn globals_are_never_cached() {
        let mut cache = InlineCache::new(true);
        let mut globals = VariableSystem::new(Scope::Global);
        let g = globals.create("g".into(), Value::Null, false);
        cache.remember(3, Binding { scope: Scope::Global, slot: g }, &mut globals);
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn disabled_cache_stays_empty() {
        let mut cache = InlineCache::new(false);
        let mut locals = VariableSystem::new(Scope::Local);
        let l = locals.create("a".into(), Value::Null, false);
        cache.remember(0, Binding { scope: Scope::Local, slot: l }, &mut locals);
        assert_eq!(cache.get(0), None);
    }
}
