use std::any::Any;
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

use super::env::{Completion, NativeResult};
use super::Vm;
use crate::value::Value;

/// Behaviour shared by every host object of one class.
///
/// Attribute and method hooks return `None` when the name is unknown, which
/// the VM reports as an unknown-attribute or unknown-method error.
pub trait Class {
    fn name(&self) -> &str;

    fn get_attribute(&self, _object: &Object, _name: &str) -> Option<Value> {
        None
    }

    /// Returns `false` when the attribute does not exist or is read-only.
    fn set_attribute(&self, _object: &Object, _name: &str, _value: Value) -> bool {
        false
    }

    fn call_method(&self, _object: &Rc<Object>, _name: &str, _args: &[Value], _vm: &mut Vm) -> Option<NativeResult> {
        None
    }

    fn to_display(&self, object: &Object) -> String {
        format!("{}@{:p}", self.name(), object)
    }

    fn is_iterable(&self) -> bool {
        false
    }

    /// Value at `position` of an iterable object, `None` once exhausted.
    fn next(&self, _object: &Object, _position: usize) -> Option<Value> {
        None
    }

    /// Runs when the last script reference to the object goes away.
    fn dispose(&self, _data: &mut dyn Any) {}
}

/// Host object: a class plus opaque host data.
pub struct Object {
    class: Rc<dyn Class>,
    data: RefCell<Box<dyn Any>>,
}

impl Object {
    pub fn new(class: Rc<dyn Class>, data: impl Any) -> Rc<Object> {
        Rc::new(Object { class, data: RefCell::new(Box::new(data)) })
    }

    pub fn class(&self) -> &Rc<dyn Class> {
        &self.class
    }

    pub fn class_name(&self) -> &str {
        self.class.name()
    }

    pub fn data<T: 'static>(&self) -> Option<Ref<'_, T>> {
        Ref::filter_map(self.data.borrow(), |d| (**d).downcast_ref::<T>()).ok()
    }

    pub fn data_mut<T: 'static>(&self) -> Option<RefMut<'_, T>> {
        RefMut::filter_map(self.data.borrow_mut(), |d| (**d).downcast_mut::<T>()).ok()
    }
}

impl Drop for Object {
    fn drop(&mut self) {
        self.class.dispose(self.data.get_mut().as_mut());
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({})", self.class.name())
    }
}

/// Convenience for method hooks that never stop the script.
pub fn method_value(value: Value) -> Option<NativeResult> {
    Some(Ok(Completion::Value(value)))
}
