// Copyright 2018 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

///
/// The payload half of a Value: an opaque, type-erased result owned by a NodeEntry. Blanket-
/// implemented for any `Eq + Debug` type, mirroring `KeyPayload`. A per-kind Function downcasts its
/// own dependencies' payloads back to their concrete type; the Engine itself only ever needs
/// `dyn_eq` to decide whether a freshly computed value differs from the one it replaces.
///
pub trait Payload: Any + Send + Sync + fmt::Debug {
    fn dyn_eq(&self, other: &dyn Payload) -> bool;
    fn as_any(&self) -> &dyn Any;
}

impl<T> Payload for T
where
    T: Any + Send + Sync + fmt::Debug + Eq,
{
    fn dyn_eq(&self, other: &dyn Payload) -> bool {
        other.as_any().downcast_ref::<T>().is_some_and(|o| self == o)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

///
/// The opaque result of a computation. Wraps either a successful payload or an ErrorInfo, never
/// both. `Value`s are cheap to clone (an `Arc` underneath) and compare by value
/// (`dyn_eq`/`PartialEq`), but a no-change rebuild (`set_value` finding the new value equal to the
/// old one) retains the original `Arc`, so reference equality also survives across rebuilds that
/// produced an unchanged value.
///
#[derive(Clone)]
pub struct Value(Arc<dyn Payload>);

impl Value {
    pub fn new<T: Payload>(payload: T) -> Value {
        Value(Arc::new(payload))
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref::<T>()
    }

    /// True if `self` and `other` wrap the exact same allocation (not just `==` payloads).
    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.0.dyn_eq(&*other.0)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}
