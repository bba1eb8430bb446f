//
// Copyright 2017 yvt, all rights reserved.
//
// This source code is a part of Nightingales.
//
//! Intrusive-refcount-flavored shared ownership with downcasting.
//!
//! The reference engine's C++ objects use an atomic intrusive refcount plus
//! a hand-rolled RTTI downcast; in Rust the natural analogue is an `Arc`
//! (the refcount is still atomic, it is just not stored inline in the
//! object's own header) paired with `std::any::Any` for the narrowing
//! downcast. `Ref<T>` packages that pairing so call sites read the same way
//! the reference engine's `xxx_interface::ref` typedefs do.
use std::any::Any;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Object-safe supertrait giving trait objects a way to narrow back to
/// `dyn Any` without relying on trait-object upcasting coercion. Any
/// `'static` type gets a blanket impl; trait definitions that want to be
/// the `T` in a `Ref<dyn Trait>` should add `AsAny` as a supertrait, e.g.
/// `trait Command: AsAny + Send { ... }`.
pub trait AsAny: Any {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A shared handle to a `T`, with referential equality and a checked
/// downcast when `T` is a trait object.
pub struct Ref<T: ?Sized>(Arc<T>);

impl<T: ?Sized> Ref<T> {
    pub fn new(value: T) -> Self
    where
        T: Sized,
    {
        Ref(Arc::new(value))
    }

    pub fn from_arc(arc: Arc<T>) -> Self {
        Ref(arc)
    }

    pub fn into_arc(self) -> Arc<T> {
        self.0
    }

    /// Mirrors the reference engine's "is this the only holder" check,
    /// used before an in-place resource destroy is permitted to skip the
    /// queued destroy-command path.
    pub fn is_unique(this: &Self) -> bool {
        Arc::strong_count(&this.0) == 1
    }

    pub fn strong_count(this: &Self) -> usize {
        Arc::strong_count(&this.0)
    }

    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl<T: ?Sized + AsAny> Ref<T> {
    /// Checked narrowing downcast, analogous to the reference engine's
    /// `NodeRef::downcast_ref`.
    pub fn downcast_ref<U: Any>(&self) -> Option<&U> {
        self.0.as_any().downcast_ref::<U>()
    }
}

impl<T: ?Sized> Clone for Ref<T> {
    fn clone(&self) -> Self {
        Ref(Arc::clone(&self.0))
    }
}

impl<T: ?Sized> Deref for Ref<T> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized> PartialEq for Ref<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: ?Sized> Eq for Ref<T> {}

impl<T: ?Sized + fmt::Debug> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::any::Any;

    trait Shape: AsAny + Send + Sync {
        fn area(&self) -> f64;
    }

    struct Square(f64);
    impl Shape for Square {
        fn area(&self) -> f64 {
            self.0 * self.0
        }
    }

    #[test]
    fn unique_and_shared() {
        let r: Ref<Square> = Ref::new(Square(2.0));
        assert!(Ref::is_unique(&r));
        let r2 = r.clone();
        assert!(!Ref::is_unique(&r));
        assert_eq!(Ref::strong_count(&r), 2);
        assert!(Ref::ptr_eq(&r, &r2));
    }

    #[test]
    fn downcast_trait_object() {
        let r: Ref<dyn Shape> = Ref::from_arc(Arc::new(Square(3.0)) as Arc<dyn Shape>);
        assert!(r.downcast_ref::<Square>().is_some());
        assert_eq!(r.downcast_ref::<Square>().unwrap().area(), 9.0);
    }
}
