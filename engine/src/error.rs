// Copyright 2018 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::key::Key;

///
/// The typed payload carried by a FunctionError. Opaque to the Engine: it is only required to be
/// displayable and debuggable, since the Engine's own error reporting never inspects it, only
/// forwards it to the caller that asked for it via `get_or_throw`.
///
pub trait FunctionError: Any + fmt::Display + fmt::Debug + Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

impl<T> FunctionError for T
where
    T: Any + fmt::Display + fmt::Debug + Send + Sync,
{
    fn as_any(&self) -> &dyn Any {
        self
    }
}

///
/// The Engine's error taxonomy. These are kinds, not a single type hierarchy: a FunctionError
/// wraps whatever typed payload the host's Function returned; the rest are raised by the Engine
/// itself.
///
#[derive(Clone)]
pub enum EngineError {
    /// A registered Function reported failure.
    Function(Arc<dyn FunctionError>),
    /// A dependency failed and the requesting Function did not handle it via `get_or_throw`.
    Dep(ErrorInfo),
    /// A strongly-connected component was found among requested-but-unfinished nodes.
    Cycle(Arc<Vec<Key>>),
    /// Evaluation was cancelled, either by a fail-fast sibling error or an external interrupt.
    Cancellation,
    /// An internal invariant was violated. Fatal: surfaced so the host can abort the build.
    InvariantViolation(String),
    /// Internal-only: the Node was invalidated (raced with a concurrent dirty/clear) while a
    /// caller was awaiting it. Never escapes `Graph::get`, which retries on this kind.
    #[doc(hidden)]
    Invalidated,
}

impl EngineError {
    pub fn function(payload: impl FunctionError + 'static) -> EngineError {
        EngineError::Function(Arc::new(payload))
    }

    pub fn cyclic(path: &[Key]) -> EngineError {
        EngineError::Cycle(Arc::new(path.to_vec()))
    }

    pub(crate) fn invalidated() -> EngineError {
        EngineError::Invalidated
    }

    pub(crate) fn is_invalidated(&self) -> bool {
        matches!(self, EngineError::Invalidated)
    }
}

impl fmt::Debug for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Function(e) => write!(f, "Function({e:?})"),
            EngineError::Dep(e) => write!(f, "Dep({:?})", e.origin),
            EngineError::Cycle(path) => write!(f, "Cycle({path:?})"),
            EngineError::Cancellation => write!(f, "Cancellation"),
            EngineError::InvariantViolation(msg) => write!(f, "InvariantViolation({msg})"),
            EngineError::Invalidated => write!(f, "Invalidated"),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Function(e) => write!(f, "{e}"),
            EngineError::Dep(e) => write!(f, "dependency {} failed", e.origin),
            EngineError::Cycle(path) => {
                let rendered = path
                    .iter()
                    .map(|k| k.to_string())
                    .collect::<Vec<_>>()
                    .join(" -> ");
                write!(f, "cycle detected: {rendered}")
            }
            EngineError::Cancellation => write!(f, "evaluation was cancelled"),
            EngineError::InvariantViolation(msg) => write!(f, "invariant violation: {msg}"),
            EngineError::Invalidated => write!(f, "node was invalidated"),
        }
    }
}

impl std::error::Error for EngineError {}

impl PartialEq for EngineError {
    /// Only used to detect the internal `Invalidated` sentinel; other kinds are never compared.
    fn eq(&self, other: &Self) -> bool {
        matches!(self, EngineError::Invalidated) && matches!(other, EngineError::Invalidated)
    }
}

///
/// The first error of a failed evaluation: the key whose Function actually raised it, a cycle
/// record (when the failure is a Cycle), and the transitive set of keys whose own Functions
/// failed (the "root causes" of a fanned-out failure).
///
#[derive(Clone)]
pub struct ErrorInfo {
    pub origin: Key,
    pub cycle: Option<Arc<Vec<Key>>>,
    pub root_causes: Arc<Vec<Key>>,
    pub error: EngineError,
}

impl ErrorInfo {
    pub fn new(origin: Key, error: EngineError) -> ErrorInfo {
        let cycle = if let EngineError::Cycle(ref path) = error {
            Some(path.clone())
        } else {
            None
        };
        ErrorInfo {
            origin,
            cycle,
            root_causes: Arc::new(Vec::new()),
            error,
        }
    }

    pub fn with_root_causes(mut self, root_causes: Vec<Key>) -> ErrorInfo {
        self.root_causes = Arc::new(root_causes);
        self
    }
}

impl fmt::Debug for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ErrorInfo {{ origin: {:?}, error: {:?} }}",
            self.origin, self.error
        )
    }
}
