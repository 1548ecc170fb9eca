//! Handles to tracked objects
//!
//! The tracking session is single-threaded, so objects are shared through
//! `Rc<RefCell<T>>`. Object identity is pointer identity of the `Rc`.

use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

/// Handle through which callers hold an entity
pub type Managed<T> = Rc<RefCell<T>>;

/// Type-erased handle stored in the identity map
pub type AnyEntity = Rc<dyn Any>;

/// Erase a typed handle without changing its identity
pub fn erase<T: Any>(entity: &Managed<T>) -> AnyEntity {
    entity.clone()
}

/// True when both handles point at the same instance
pub fn same_instance(a: &AnyEntity, b: &AnyEntity) -> bool {
    std::ptr::eq(
        Rc::as_ptr(a) as *const (),
        Rc::as_ptr(b) as *const (),
    )
}

/// Recover the typed handle from an erased one
pub fn downcast<T: Any>(entity: AnyEntity) -> Option<Managed<T>> {
    entity.downcast::<RefCell<T>>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_erase_preserves_identity() {
        let a: Managed<i32> = Rc::new(RefCell::new(1));
        let b: Managed<i32> = Rc::new(RefCell::new(1));
        assert!(same_instance(&erase(&a), &erase(&a)));
        assert!(!same_instance(&erase(&a), &erase(&b)));
    }

    #[test]
    fn test_downcast_round_trip() {
        let a: Managed<String> = Rc::new(RefCell::new("x".to_string()));
        let back = downcast::<String>(erase(&a)).unwrap();
        assert!(Rc::ptr_eq(&a, &back));
        assert!(downcast::<i32>(erase(&a)).is_none());
    }
}
