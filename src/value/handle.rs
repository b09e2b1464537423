use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::Rc;

/// Copy-on-write reference to a container.
///
/// Two levels of sharing are involved. The outer slot is what a variable
/// owns; [`Handle::alias`] shares the slot itself, so writes through an alias
/// land in the variable. The inner `Rc<T>` is the container; [`Clone`] makes a
/// new slot pointing at the same container, and the first write through
/// either slot clones the container when more than one slot refers to it.
pub struct Handle<T> {
    slot: Rc<RefCell<Rc<T>>>,
}

impl<T: Clone> Handle<T> {
    pub fn new(container: T) -> Self {
        Handle { slot: Rc::new(RefCell::new(Rc::new(container))) }
    }

    pub fn alias(&self) -> Self {
        Handle { slot: Rc::clone(&self.slot) }
    }

    pub fn borrow(&self) -> Ref<'_, T> {
        Ref::map(self.slot.borrow(), |rc| &**rc)
    }

    /// Exclusive access; clones the container first if another handle shares it.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        RefMut::map(self.slot.borrow_mut(), |rc| Rc::make_mut(rc))
    }

    /// Number of handles that refer to the current container.
    pub fn handle_count(&self) -> usize {
        Rc::strong_count(&*self.slot.borrow())
    }

    pub fn same_container(&self, other: &Handle<T>) -> bool {
        Rc::ptr_eq(&*self.slot.borrow(), &*other.slot.borrow())
    }

    pub fn same_slot(&self, other: &Handle<T>) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot)
    }
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        let container = Rc::clone(&*self.slot.borrow());
        Handle { slot: Rc::new(RefCell::new(container)) }
    }
}

impl<T: fmt::Debug> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.slot.borrow().fmt(f)
    }
}

impl<T: PartialEq> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.slot, &other.slot) || **self.slot.borrow() == **other.slot.borrow()
    }
}
