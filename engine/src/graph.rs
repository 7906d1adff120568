// Copyright 2018 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fixedbitset::FixedBitSet;
use fnv::{FnvHashMap as HashMap, FnvHashSet as HashSet};
use futures::future;
use parking_lot::Mutex;
use petgraph::graph::DiGraph;
use petgraph::visit::{NodeFiltered, VisitMap};
use petgraph::Direction;

use task_executor::Executor;

use crate::context::Context;
use crate::entry::{CompletedDeps, NodeEntry};
use crate::error::EngineError;
use crate::function::{Function, FunctionRegistry};
use crate::key::Key;
use crate::test_trace_log;
use crate::value::Value;
use crate::version::Version;

/// Identifies one NodeEntry's position in the dependency graph. Entries are never removed once
/// created (only cleared/dirtied in place), so an EntryId remains valid for the Graph's lifetime.
pub type EntryId = petgraph::graph::NodeIndex<u32>;

type PGraph = DiGraph<NodeEntry, (), u32>;

/// The result of an `invalidate_from_roots` call: how many entries directly matched the
/// predicate (and were hard-cleared) versus how many were transitively dirtied as a result.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InvalidationResult {
    pub cleared: usize,
    pub dirtied: usize,
}

struct GraphData {
    pg: PGraph,
    nodes: HashMap<Key, EntryId>,
}

impl GraphData {
    fn entry(&self, id: EntryId) -> &NodeEntry {
        &self.pg[id]
    }

    /// A dense, node-count-sized visited-set walk backwards along dependency edges from `roots`:
    /// every entry that (transitively) depends on one of them. Uses a `FixedBitSet` rather than a
    /// hash set since entries are never removed, so the index space is already dense and
    /// contiguous.
    ///
    /// `stop_at` bounds the walk: an id for which it returns true is neither included in the
    /// returned set nor expanded into its own predecessors. We only dirty "through" an entry and
    /// into its dependents if it is safe to do so; a running, non-restartable entry is not, since
    /// it must be allowed to run to completion rather than being dirtied mid-flight (and until it
    /// completes, we can't yet tell whether its dependents actually need re-checking).
    fn reached_backwards(&self, roots: impl Iterator<Item = EntryId>, stop_at: impl Fn(EntryId) -> bool) -> FixedBitSet {
        let mut reached = FixedBitSet::with_capacity(self.pg.node_count());
        let mut stack: Vec<EntryId> = roots.collect();
        while let Some(id) = stack.pop() {
            if stop_at(id) {
                continue;
            }
            if reached.visit(id) {
                for pred in self.pg.neighbors_directed(id, Direction::Incoming) {
                    stack.push(pred);
                }
            }
        }
        reached
    }
}

struct InnerGraph {
    functions: FunctionRegistry,
    executor: Executor,
    data: Mutex<GraphData>,
    run_id_counter: AtomicU64,
}

///
/// The versioned dependency graph: owns every NodeEntry reachable from any key ever requested,
/// plus the edges recording which entries depend on which. Cheap to clone: every clone shares the
/// same underlying storage.
///
#[derive(Clone)]
pub struct Graph(Arc<InnerGraph>);

impl Graph {
    pub fn new(functions: FunctionRegistry, executor: Executor) -> Graph {
        Graph(Arc::new(InnerGraph {
            functions,
            executor,
            data: Mutex::new(GraphData {
                pg: DiGraph::default(),
                nodes: HashMap::default(),
            }),
            run_id_counter: AtomicU64::new(1),
        }))
    }

    /// Hands out a fresh `RunId`, unique for the lifetime of this Graph: one per `Context::new`,
    /// ie. one per `evaluate()` call. Distinguishes an Uncacheable entry's value, which is only
    /// valid within the Run that produced it, from a stale value left over from an earlier Run.
    pub(crate) fn next_run_id(&self) -> crate::context::RunId {
        crate::context::RunId(self.0.run_id_counter.fetch_add(1, Ordering::SeqCst))
    }

    /// Like `new`, but also spawns a background task that periodically scans for and terminates
    /// cycles among in-flight (Running) entries, so that a cyclic dependency chain fails instead
    /// of deadlocking forever.
    pub fn new_with_invalidation_delay(
        functions: FunctionRegistry,
        executor: Executor,
        cycle_check_interval: Duration,
    ) -> Graph {
        let graph = Graph::new(functions, executor);
        graph.spawn_cycle_check_task(cycle_check_interval);
        graph
    }

    fn spawn_cycle_check_task(&self, interval: Duration) {
        let graph = self.clone();
        let _join = self.0.executor.native_spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                graph.terminate_cycles();
            }
        });
    }

    pub fn len(&self) -> usize {
        self.0.data.lock().pg.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn executor(&self) -> &Executor {
        &self.0.executor
    }

    pub(crate) fn function_for(&self, key: &Key) -> Result<Arc<dyn Function>, EngineError> {
        self.0.functions.get(key.kind()).ok_or_else(|| {
            EngineError::InvariantViolation(format!("No Function is registered for kind {:?}.", key.kind()))
        })
    }

    fn restartable(&self, key: &Key) -> bool {
        self.function_for(key).map(|f| f.restartable()).unwrap_or(true)
    }

    /// The stop predicate for backward invalidation walks: we only dirty "through" an entry and
    /// into its dependents if it is `Function::restartable`; one that is currently running and not
    /// restartable must be left alone to finish.
    fn blocks_invalidation(&self, data: &GraphData, id: EntryId) -> bool {
        let entry = data.entry(id);
        entry.is_running() && !self.restartable(entry.key())
    }

    fn ensure_entry(&self, key: Key) -> EntryId {
        let mut data = self.0.data.lock();
        if let Some(id) = data.nodes.get(&key) {
            return *id;
        }
        let entry = NodeEntry::new(key.clone());
        let id = data.pg.add_node(entry);
        data.nodes.insert(key, id);
        id
    }

    fn add_edge(&self, src: EntryId, dst: EntryId) {
        let mut data = self.0.data.lock();
        if !data.pg.contains_edge(src, dst) {
            data.pg.add_edge(src, dst, ());
        }
    }

    fn entry_for_id(&self, id: EntryId) -> NodeEntry {
        self.0.data.lock().entry(id).clone()
    }

    /// Looks up (creating if necessary) the entry for `key`, records a dependency edge from
    /// `requester` to it if given, and returns its current (or freshly computed) value.
    ///
    /// Retries internally if the entry was invalidated out from under an in-flight request: that
    /// is a transient race (the entry was cleared/dirtied between the caller observing it Running
    /// and the result being delivered), never a caller-visible error.
    pub(crate) async fn get_inner(
        &self,
        requester: Option<EntryId>,
        context: &Context,
        key: Key,
    ) -> Result<(Value, Version, bool), EngineError> {
        let target_id = self.ensure_entry(key);
        if let Some(src) = requester {
            self.add_edge(src, target_id);
        }

        loop {
            let entry = self.entry_for_id(target_id);
            let (result, version, has_uncacheable_deps) = entry.get_node_result(context, target_id).await;
            match result {
                Err(e) if e.is_invalidated() => continue,
                Err(e) => return Err(e),
                Ok(value) => return Ok((value, version, has_uncacheable_deps)),
            }
        }
    }

    /// The entry point for a top-level request (one not made on behalf of another running Node).
    pub async fn create(&self, context: &Context, key: Key) -> Result<(Value, Version, bool), EngineError> {
        self.get_inner(None, context, key).await
    }

    /// Waits until the entry for `key` has been re-evaluated since `last_seen_version`, without
    /// itself forcing a recomputation.
    pub async fn poll(&self, context: &Context, key: Key, last_seen_version: Version) {
        let target_id = self.ensure_entry(key);
        let entry = self.entry_for_id(target_id);
        entry.poll(context, last_seen_version).await;
    }

    ///
    /// Re-verifies a previously completed entry's recorded dependency groups, in order, stopping
    /// at the first group containing a dependency whose value has changed. Re-fetching (rather
    /// than merely peeking) each dependency is what allows this to recurse: an ostensibly dirty
    /// dependency may itself turn out to be unchanged once it is re-checked.
    ///
    /// Returns `Ok(has_uncacheable_deps)` if every group was verified unchanged, or `Err(())` if
    /// cleaning failed and the entry must be recomputed from scratch.
    ///
    pub(crate) async fn attempt_cleaning(
        &self,
        entry_id: EntryId,
        previous: &CompletedDeps,
        context: &Context,
    ) -> Result<bool, ()> {
        let mut has_uncacheable_deps = previous.has_uncacheable_deps;
        for group in previous.groups.groups() {
            let futs = group.iter().cloned().map(|dep_key| {
                let graph = self.clone();
                let context = context.clone();
                async move { graph.get_inner(Some(entry_id), &context, dep_key).await }
            });
            let results = match future::try_join_all(futs).await {
                Ok(results) => results,
                Err(_) => return Err(()),
            };
            for (dep_key, (_, version, uncacheable)) in group.iter().zip(results.iter()) {
                let previous_version = previous.versions.get(dep_key).copied().unwrap_or(Version::MINIMAL);
                if *version != previous_version {
                    return Err(());
                }
                has_uncacheable_deps |= *uncacheable;
            }
        }
        Ok(has_uncacheable_deps)
    }

    ///
    /// Marks every entry matched by `predicate` as cleared (forcing a full recomputation, with no
    /// chance at dependency-based cleaning), and every entry reachable from one of those by
    /// following dependency edges backwards as dirtied (forcing only a dependency re-check).
    ///
    pub fn invalidate_from_roots(
        &self,
        log_dirtied: bool,
        predicate: impl Fn(&Key) -> bool,
    ) -> InvalidationResult {
        let mut data = self.0.data.lock();

        let roots: Vec<EntryId> = data
            .pg
            .node_indices()
            .filter(|&id| predicate(data.entry(id).key()))
            .collect();

        let reached = data.reached_backwards(roots.iter().copied(), |id| self.blocks_invalidation(&data, id));
        let roots_set: HashSet<EntryId> = roots.iter().copied().collect();

        let cleared_entries: Vec<NodeEntry> = roots.iter().map(|&id| data.entry(id).clone()).collect();
        let dirtied_entries: Vec<NodeEntry> = reached
            .ones()
            .map(petgraph::graph::NodeIndex::new)
            .filter(|id| !roots_set.contains(id))
            .map(|id| data.entry(id).clone())
            .collect();

        drop(data);

        for entry in &cleared_entries {
            entry.clear(true);
        }
        for entry in &dirtied_entries {
            entry.dirty();
        }

        if log_dirtied {
            for entry in cleared_entries.iter().chain(dirtied_entries.iter()) {
                test_trace_log!("Invalidated {:?}", entry.key());
            }
        }

        InvalidationResult {
            cleared: cleared_entries.len(),
            dirtied: dirtied_entries.len(),
        }
    }

    ///
    /// Explicit invalidation for a host that distinguishes "this value is known to have changed"
    /// from "this value might have changed, re-check it": `changed` entries are hard-cleared
    /// (forced to fully recompute next time, bypassing dependency-based cleaning even if their
    /// Function would otherwise be cacheable); `dirty` entries are soft-dirtied (eligible to clean
    /// if their recorded dependency versions turn out unchanged). Both sets, plus every entry
    /// transitively reachable from either by following dependency edges backwards, end up
    /// invalidated one way or another; an entry reachable from a `changed` root is dirtied (not
    /// cleared), since only the root itself is known to have actually changed.
    ///
    pub fn invalidate(
        &self,
        changed: impl IntoIterator<Item = Key>,
        dirty: impl IntoIterator<Item = Key>,
    ) -> InvalidationResult {
        let changed_ids: HashSet<EntryId> = changed.into_iter().map(|k| self.ensure_entry(k)).collect();
        let dirty_ids: HashSet<EntryId> = dirty.into_iter().map(|k| self.ensure_entry(k)).collect();

        let data = self.0.data.lock();

        let reached = data.reached_backwards(changed_ids.iter().chain(dirty_ids.iter()).copied(), |id| {
            self.blocks_invalidation(&data, id)
        });

        let cleared_entries: Vec<NodeEntry> = changed_ids.iter().map(|&id| data.entry(id).clone()).collect();
        let dirtied_entries: Vec<NodeEntry> = reached
            .ones()
            .map(petgraph::graph::NodeIndex::new)
            .filter(|id| !changed_ids.contains(id))
            .map(|id| data.entry(id).clone())
            .collect();

        drop(data);

        for entry in &cleared_entries {
            entry.clear(true);
        }
        for entry in &dirtied_entries {
            entry.dirty();
        }
        for entry in cleared_entries.iter().chain(dirtied_entries.iter()) {
            test_trace_log!("Invalidated {:?}", entry.key());
        }

        InvalidationResult {
            cleared: cleared_entries.len(),
            dirtied: dirtied_entries.len(),
        }
    }

    /// Drops every entry's cached value, without removing entries or edges from the graph. Used
    /// between independent test runs; not exposed as a normal evaluation operation.
    pub fn clear(&self) {
        let data = self.0.data.lock();
        let entries: Vec<NodeEntry> = data.pg.node_weights().cloned().collect();
        drop(data);
        for entry in entries {
            entry.clear(true);
        }
    }

    /// Forces an immediate cycle-detection pass, rather than waiting for the background task
    /// spawned by `new_with_invalidation_delay` (or not spawned at all, for a `Graph` built via
    /// plain `new`). Safe to call at any time; a no-op if nothing is currently stuck in a cycle.
    pub fn check_for_cycles(&self) {
        self.terminate_cycles();
    }

    /// Scans the subgraph of currently Running entries for strongly connected components (ie:
    /// cycles) and terminates every entry in one with a `Cycle` error, unblocking whoever was
    /// awaiting it.
    fn terminate_cycles(&self) {
        let data = self.0.data.lock();
        let running = NodeFiltered::from_fn(&data.pg, |id| data.entry(id).is_running());
        let sccs = petgraph::algo::kosaraju_scc(&running);

        let mut to_terminate: Vec<(NodeEntry, Vec<Key>)> = Vec::new();
        for scc in sccs {
            let is_cycle = scc.len() > 1
                || scc
                    .first()
                    .is_some_and(|&id| data.pg.contains_edge(id, id));
            if !is_cycle {
                continue;
            }
            let path: Vec<Key> = scc.iter().map(|&id| data.entry(id).key().clone()).collect();
            for &id in &scc {
                to_terminate.push((data.entry(id).clone(), path.clone()));
            }
        }
        drop(data);

        for (entry, path) in to_terminate {
            entry.terminate(EngineError::cyclic(&path));
        }
    }

    /// Renders the graph's current shape as Graphviz dot, for debugging.
    pub fn visualize(&self) -> String {
        let data = self.0.data.lock();
        let mut out = String::new();
        let _ = writeln!(out, "digraph engine_graph {{");
        for id in data.pg.node_indices() {
            let entry = data.entry(id);
            let _ = writeln!(out, "  \"{}\" [label=\"{}\"];", id.index(), entry.key());
        }
        for edge in data.pg.edge_indices() {
            if let Some((src, dst)) = data.pg.edge_endpoints(edge) {
                let _ = writeln!(out, "  \"{}\" -> \"{}\";", src.index(), dst.index());
            }
        }
        let _ = writeln!(out, "}}");
        out
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Graph(len={})", self.len())
    }
}
