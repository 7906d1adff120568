// Copyright 2018 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use fnv::FnvHashMap as HashMap;

use crate::context::Environment;
use crate::error::EngineError;
use crate::key::Key;
use crate::value::Value;

///
/// The host-provided computation for one Key kind. Registered once, at Engine construction, under
/// the kind tag(s) it can compute (see `FunctionRegistry`).
///
/// `run` is handed an `Environment` bound to the Key currently being computed: it requests
/// dependencies through it (`get`/`get_group`/`get_or_throw`), and either returns a `Value` or an
/// `EngineError::Function` describing why it could not.
///
/// `cacheable`/`cacheable_item` default to `true`; a Function whose result depends on ambient,
/// non-deterministic state (wall-clock time, environment variables, a filesystem poll) should
/// override `cacheable` to return `false`, so that its result is scoped to the Run that produced
/// it (see `EntryResult::Uncacheable`).
///
#[async_trait]
pub trait Function: Send + Sync + 'static {
    async fn run(&self, key: Key, env: Environment) -> Result<Value, EngineError>;

    /// Whether this Function's output may be cached across builds at all.
    fn cacheable(&self) -> bool {
        true
    }

    /// Whether a particular computed item may be cached. Most Functions don't need to examine the
    /// item; this exists for the rare Function whose cacheability is itself data-dependent.
    fn cacheable_item(&self, _item: &Value) -> bool {
        true
    }

    /// Whether a running invocation of this Function must run to completion once started, even
    /// under invalidation, rather than being interrupted and restarted. Most Functions are
    /// restartable.
    fn restartable(&self) -> bool {
        true
    }
}

///
/// Maps a Key's `kind` tag to the Function that computes it. Built once via `FunctionRegistryBuilder`
/// and handed to the Graph at construction; immutable thereafter.
///
#[derive(Clone)]
pub struct FunctionRegistry {
    functions: Arc<HashMap<&'static str, Arc<dyn Function>>>,
}

impl FunctionRegistry {
    pub fn builder() -> FunctionRegistryBuilder {
        FunctionRegistryBuilder {
            functions: HashMap::default(),
        }
    }

    pub(crate) fn get(&self, kind: &str) -> Option<Arc<dyn Function>> {
        self.functions.get(kind).cloned()
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionRegistry({:?})", self.functions.keys())
    }
}

pub struct FunctionRegistryBuilder {
    functions: HashMap<&'static str, Arc<dyn Function>>,
}

impl FunctionRegistryBuilder {
    pub fn register(mut self, kind: &'static str, function: impl Function) -> Self {
        let prior = self.functions.insert(kind, Arc::new(function));
        assert!(prior.is_none(), "Kind {kind} was registered more than once.");
        self
    }

    pub fn build(self) -> FunctionRegistry {
        FunctionRegistry {
            functions: Arc::new(self.functions),
        }
    }
}
