// Copyright 2018 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::atomic::{self, AtomicBool};
use std::sync::Arc;

use fnv::FnvHashMap as HashMap;
use futures::future;
use parking_lot::Mutex;

use crate::error::EngineError;
use crate::graph::{EntryId, Graph};
use crate::grouped_deps::GroupedDependencies;
use crate::key::Key;
use crate::value::Value;
use crate::version::Version;

///
/// A monotonically increasing counter used to scope Uncacheable values to the Run that produced
/// them. Distinct from `Version`, which tracks
/// when a value last *changed*; `RunId` only tracks which `evaluate()` invocation is asking.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct RunId(pub(crate) u64);

#[derive(Clone, Default)]
pub(crate) struct DepState {
    pub(crate) groups: GroupedDependencies,
    pub(crate) versions: HashMap<Key, Version>,
    pub(crate) has_uncacheable_deps: bool,
}

#[derive(Default)]
pub(crate) struct Stats {
    pub ran: atomic::AtomicUsize,
    pub cleaning_succeeded: atomic::AtomicUsize,
    pub cleaning_failed: atomic::AtomicUsize,
}

struct InnerContext {
    graph: Graph,
    version: Version,
    run_id: RunId,
    stats: Stats,
    cancelled: AtomicBool,
}

///
/// Internal plumbing threaded through a single Function invocation: tracks which entry is running
/// (so dependency edges can be recorded), the build Version, and the groups of dependencies
/// requested so far. `Environment` (below) is the public-facing subset of this handed to Functions.
///
#[derive(Clone)]
pub(crate) struct Context {
    entry_id: Option<EntryId>,
    dep_state: Arc<Mutex<Option<DepState>>>,
    inner: Arc<InnerContext>,
}

impl Context {
    pub(crate) fn new(graph: Graph, version: Version) -> Context {
        let run_id = graph.next_run_id();
        Context {
            entry_id: None,
            dep_state: Arc::default(),
            inner: Arc::new(InnerContext {
                graph,
                version,
                run_id,
                stats: Stats::default(),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// Marks every clone of this Context (and everything `clone_for`'d from it) as cancelled. Used
    /// by fail-fast `evaluate()` to stop starting new work once the first error has been observed;
    /// in-flight Function invocations are not forcibly aborted, but their next `get`/`get_group`
    /// call will observe the flag and return `Cancellation` instead of recursing further.
    pub(crate) fn cancel(&self) {
        self.inner.cancelled.store(true, atomic::Ordering::SeqCst);
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(atomic::Ordering::SeqCst)
    }

    pub(crate) fn graph(&self) -> &Graph {
        &self.inner.graph
    }

    pub(crate) fn version(&self) -> Version {
        self.inner.version
    }

    pub(crate) fn run_id(&self) -> RunId {
        self.inner.run_id
    }

    pub(crate) fn stats(&self) -> &Stats {
        &self.inner.stats
    }

    pub(crate) fn entry_id(&self) -> Option<EntryId> {
        self.entry_id
    }

    /// Creates a clone of this Context scoped to a different Node (a new dep_state, tracking the
    /// running Node's own requested dependencies separately).
    pub(crate) fn clone_for(&self, entry_id: EntryId) -> Context {
        Context {
            entry_id: Some(entry_id),
            dep_state: Arc::new(Mutex::new(Some(DepState::default()))),
            inner: self.inner.clone(),
        }
    }

    /// Records a group of dependency requests (a single `get` is a group of one). `results`
    /// carries each dep's `(Key, last_changed_version, has_uncacheable_deps)`. Returns an error if
    /// the Node has already completed its run (can happen if a Node spawns background work that
    /// keeps requesting after it returns; that's a programming error in the Function).
    pub(crate) fn dep_record_group(
        &self,
        keys: Vec<Key>,
        results: &[(Version, bool)],
    ) -> Result<(), EngineError> {
        let mut guard = self.dep_state.lock();
        let Some(dep_state) = guard.as_mut() else {
            return Err(EngineError::InvariantViolation(
                "Node requested additional dependencies after completing.".to_string(),
            ));
        };
        for (key, (version, uncacheable)) in keys.iter().zip(results.iter()) {
            dep_state.versions.insert(key.clone(), *version);
            dep_state.has_uncacheable_deps |= *uncacheable;
        }
        dep_state.groups.push_group(keys);
        Ok(())
    }

    /// Completes the Context for this run, returning the recorded dependency state. May only be
    /// called once per `clone_for`.
    pub(crate) fn complete(&self) -> DepState {
        self.dep_state
            .lock()
            .take()
            .expect("Node was completed more than once.")
    }
}

///
/// The per-invocation view a Function uses to request dependencies and signal missing values (C10
/// Thinly wraps `Context`, exposing only the public operations.
///
#[derive(Clone)]
pub struct Environment {
    context: Context,
    any_error: Arc<Mutex<bool>>,
}

impl Environment {
    pub(crate) fn new(context: Context) -> Environment {
        Environment {
            context,
            any_error: Arc::new(Mutex::new(false)),
        }
    }

    /// Requests a single dependency. On success, records it as a one-element group.
    pub async fn get(&self, key: Key) -> Result<Value, EngineError> {
        let mut values = self.get_group(vec![key]).await?;
        Ok(values.pop().expect("get_group returned wrong arity"))
    }

    /// Requests a set of dependencies discovered together, as a single group. Deps are requested
    /// (and, if necessary, computed) concurrently; the call fails as soon as any of them does.
    ///
    /// A dependency's own committed failure (a `FunctionError` or `Cycle` it raised) is wrapped as
    /// a `Dep` error identifying which dependency it was; a transient `Invalidated`/`Cancellation`
    /// is passed through unwrapped, since those are retry/scheduling signals rather than node
    /// failures.
    pub async fn get_group(&self, keys: Vec<Key>) -> Result<Vec<Value>, EngineError> {
        if self.context.is_cancelled() {
            *self.any_error.lock() = true;
            return Err(EngineError::Cancellation);
        }
        let entry_id = self.context.entry_id();
        let futs = keys.iter().cloned().map(|key| {
            let context = self.context.clone();
            async move {
                let dep_key = key.clone();
                context
                    .graph()
                    .get_inner(entry_id, &context, key)
                    .await
                    .map_err(|e| {
                        if e.is_invalidated() || matches!(e, EngineError::Cancellation) {
                            e
                        } else {
                            EngineError::Dep(crate::error::ErrorInfo::new(dep_key, e))
                        }
                    })
            }
        });
        let results = match future::try_join_all(futs).await {
            Ok(results) => results,
            Err(e) => {
                *self.any_error.lock() = true;
                return Err(e);
            }
        };
        let versions: Vec<(Version, bool)> = results
            .iter()
            .map(|(_, version, uncacheable)| (*version, *uncacheable))
            .collect();
        self.context.dep_record_group(keys, &versions)?;
        Ok(results.into_iter().map(|(value, _, _)| value).collect())
    }

    /// spec.md §4.5 distinguishes `get` (a failed dep silently taints the caller) from
    /// `get_or_throw` (the dep's error surfaces to the Function directly): under the
    /// generator-style/re-invocation model that distinction assumes, `get` would return a
    /// missing-sentinel on dep failure and only the *next* invocation's `get_or_throw` would see
    /// the real error. Here a dep request is an ordinary `.await` on a `Result`, so `get` already
    /// surfaces the error to its caller; `get_or_throw` is kept as an alias for API parity with
    /// hosts written against that vocabulary.
    pub async fn get_or_throw(&self, key: Key) -> Result<Value, EngineError> {
        self.get(key).await
    }

    /// Whether any `get*` call made on this Environment so far has returned an error. Since every
    /// `get*` here suspends on its dependency via native `async`/`await` rather than returning a
    /// missing-sentinel for later re-invocation, a Function never observes a "successful but
    /// incomplete" invocation; this always just reflects whether an error has already been
    /// returned from this Environment.
    pub fn values_missing(&self) -> bool {
        *self.any_error.lock()
    }

    pub fn version(&self) -> Version {
        self.context.version()
    }
}
