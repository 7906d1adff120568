// Copyright 2018 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

///
/// The payload half of a Key: an opaque, type-erased, hashable, equatable value that identifies
/// a particular computation within a kind. Blanket-implemented for any type that is already
/// `Eq + Hash + Debug`, so host code defines an ordinary Rust struct or enum for its payload and
/// gets `KeyPayload` for free.
///
pub trait KeyPayload: Any + Send + Sync + fmt::Debug {
    fn dyn_eq(&self, other: &dyn KeyPayload) -> bool;
    fn dyn_hash(&self, state: &mut dyn Hasher);
    fn as_any(&self) -> &dyn Any;
}

impl<T> KeyPayload for T
where
    T: Any + Send + Sync + fmt::Debug + Eq + Hash,
{
    fn dyn_eq(&self, other: &dyn KeyPayload) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|o| self == o)
    }

    fn dyn_hash(&self, mut state: &mut dyn Hasher) {
        self.hash(&mut state);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct KeyInner {
    kind: &'static str,
    payload: Arc<dyn KeyPayload>,
}

///
/// The identity of one computation: a (kind tag, payload) pair. `kind` selects the Function that
/// will be invoked to compute it (see `FunctionRegistry`); `payload` distinguishes computations of
/// the same kind. Keys are cheap to clone (an `Arc` underneath), hashable, and equatable.
///
#[derive(Clone)]
pub struct Key(Arc<KeyInner>);

impl Key {
    pub fn new<T: KeyPayload>(kind: &'static str, payload: T) -> Key {
        assert!(
            !kind.is_empty(),
            "Key kind must not be empty: a default/sentinel kind is not a valid identity."
        );
        Key(Arc::new(KeyInner {
            kind,
            payload: Arc::new(payload),
        }))
    }

    pub fn kind(&self) -> &'static str {
        self.0.kind
    }

    pub fn payload(&self) -> &dyn KeyPayload {
        &*self.0.payload
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.0.payload.as_any().downcast_ref::<T>()
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind == other.0.kind && self.0.payload.dyn_eq(&*other.0.payload)
    }
}

impl Eq for Key {}

impl Hash for Key {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.kind.hash(state);
        self.0.payload.dyn_hash(state);
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.0.kind, self.0.payload)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({:?})", self.0.kind, self.0.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::Key;

    #[derive(Debug, Eq, PartialEq, Hash, Clone)]
    struct Payload(u32);

    #[test]
    fn equality_is_by_kind_and_payload() {
        let a = Key::new("number", Payload(1));
        let b = Key::new("number", Payload(1));
        let c = Key::new("number", Payload(2));
        let d = Key::new("other", Payload(1));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn downcast_recovers_payload() {
        let a = Key::new("number", Payload(7));
        assert_eq!(a.downcast_ref::<Payload>(), Some(&Payload(7)));
    }

    #[test]
    #[should_panic]
    fn empty_kind_rejected() {
        Key::new("", Payload(1));
    }
}
