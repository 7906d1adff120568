// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//!
//! Integration-style tests built on a small `TFunction` fixture: a family of Function kinds
//! ("t", "t-uncacheable", "t-nonrestartable") sharing one `TContext`, which records every
//! invocation and lets a test override a node's base value, its dependency groups, an injected
//! delay, or an injected failure. Grounded in the teacher's own `TNode`/`TContext` fixture
//! (`graph/src/tests.rs`), adapted to this crate's per-kind (rather than per-node-instance)
//! `Function` dispatch: variations that the teacher expresses as fields on a `TNode` instance
//! (restartable, cacheable) are expressed here as distinct registered kinds sharing one fixture.
//!

use std::collections::{HashMap as StdHashMap, HashSet as StdHashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::context::Context;
use crate::{Engine, EngineError, EvaluateOptions, Function, FunctionRegistry, Graph, Key, Value, Version};

const KIND: &str = "t";
const KIND_UNCACHEABLE: &str = "t-uncacheable";
const KIND_NONRESTARTABLE: &str = "t-nonrestartable";

fn t(id: usize) -> Key {
    Key::new(KIND, id)
}

fn t_uncacheable(id: usize) -> Key {
    Key::new(KIND_UNCACHEABLE, id)
}

fn t_nonrestartable(id: usize) -> Key {
    Key::new(KIND_NONRESTARTABLE, id)
}

#[derive(Clone, Debug, Eq, PartialEq)]
struct TValue(usize);

#[derive(Debug)]
struct TError(Key);

impl std::fmt::Display for TError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "T node {:?} was configured to fail", self.0)
    }
}

/// Shared fixture state: every registered `TFunction` kind reads and records against the same
/// `TContext`, so a test can reconfigure the graph's shape and inspect run history regardless of
/// which kind each key was registered under.
#[derive(Default)]
struct TContext {
    bases: Mutex<StdHashMap<Key, usize>>,
    edges: Mutex<StdHashMap<Key, Vec<Key>>>,
    groups: Mutex<StdHashMap<Key, Vec<Vec<Key>>>>,
    errors: Mutex<StdHashSet<Key>>,
    delays: Mutex<StdHashMap<Key, Duration>>,
    runs: Mutex<Vec<Key>>,
}

impl TContext {
    fn set_base(&self, key: Key, base: usize) {
        self.bases.lock().insert(key, base);
    }

    fn base_of(&self, key: &Key) -> usize {
        self.bases.lock().get(key).copied().unwrap_or(1)
    }

    fn set_edges(&self, key: Key, deps: Vec<Key>) {
        self.edges.lock().insert(key, deps);
    }

    fn set_groups(&self, key: Key, groups: Vec<Vec<Key>>) {
        self.groups.lock().insert(key, groups);
    }

    fn set_error(&self, key: Key) {
        self.errors.lock().insert(key);
    }

    fn set_delay(&self, key: Key, delay: Duration) {
        self.delays.lock().insert(key, delay);
    }

    fn run_count(&self, key: &Key) -> usize {
        self.runs.lock().iter().filter(|k| *k == key).count()
    }

    /// A leaf (id 0) has no default deps; everything else defaults to depending on `id - 1` of
    /// its own kind, unless overridden via `set_edges`.
    fn dependencies_of(&self, key: &Key) -> Vec<Key> {
        if let Some(deps) = self.edges.lock().get(key) {
            return deps.clone();
        }
        let id = *key
            .downcast_ref::<usize>()
            .expect("T-family key payloads are always usize node ids");
        if id == 0 {
            Vec::new()
        } else {
            vec![Key::new(key.kind(), id - 1)]
        }
    }

    fn groups_of(&self, key: &Key) -> Vec<Vec<Key>> {
        if let Some(groups) = self.groups.lock().get(key) {
            return groups.clone();
        }
        let deps = self.dependencies_of(key);
        if deps.is_empty() {
            Vec::new()
        } else {
            vec![deps]
        }
    }
}

struct TFunction {
    context: Arc<TContext>,
    cacheable: bool,
    restartable: bool,
}

#[async_trait]
impl Function for TFunction {
    async fn run(&self, key: Key, env: crate::Environment) -> Result<Value, EngineError> {
        self.context.runs.lock().push(key.clone());

        if let Some(delay) = self.context.delays.lock().get(&key).copied() {
            tokio::time::sleep(delay).await;
        }

        if self.context.errors.lock().contains(&key) {
            return Err(EngineError::function(TError(key.clone())));
        }

        let mut sum = self.context.base_of(&key);
        for group in self.context.groups_of(&key) {
            let values = env.get_group(group).await?;
            for value in values {
                sum += value.downcast_ref::<TValue>().expect("T deps are always TValue").0;
            }
        }
        Ok(Value::new(TValue(sum)))
    }

    fn cacheable(&self) -> bool {
        self.cacheable
    }

    fn restartable(&self) -> bool {
        self.restartable
    }
}

fn init_logging() {
    let _ = env_logger::try_init();
}

fn test_registry(context: Arc<TContext>) -> FunctionRegistry {
    FunctionRegistry::builder()
        .register(
            KIND,
            TFunction {
                context: context.clone(),
                cacheable: true,
                restartable: true,
            },
        )
        .register(
            KIND_UNCACHEABLE,
            TFunction {
                context: context.clone(),
                cacheable: false,
                restartable: true,
            },
        )
        .register(
            KIND_NONRESTARTABLE,
            TFunction {
                context,
                cacheable: true,
                restartable: false,
            },
        )
        .build()
}

fn test_engine(context: Arc<TContext>) -> Engine {
    Engine::new(test_registry(context), task_executor::Executor::new())
}

fn value_of(result: &crate::EvaluateResult, key: &Key) -> usize {
    result
        .values
        .get(key)
        .unwrap_or_else(|| panic!("no value recorded for {key:?}: errors were {:?}", result.errors))
        .downcast_ref::<TValue>()
        .unwrap()
        .0
}

/// Scenario A: a 3-node chain `a -> b -> c`, `c` a leaf. Invalidating `c` with a changed value
/// recomputes every node in the chain, each landing on the next build's Version.
#[tokio::test]
async fn chain_rebuild_recomputes_changed_values() {
    init_logging();
    let context = Arc::new(TContext::default());
    let (c, b, a) = (t(0), t(1), t(2));
    context.set_base(c.clone(), 10);

    let engine = test_engine(context.clone());
    let result = engine.evaluate(vec![a.clone()], EvaluateOptions::default()).await;
    assert!(result.success);
    assert_eq!(value_of(&result, &c), 10);
    assert_eq!(value_of(&result, &b), 11);
    assert_eq!(value_of(&result, &a), 12);
    assert_eq!(context.run_count(&a), 1);
    assert_eq!(context.run_count(&b), 1);
    assert_eq!(context.run_count(&c), 1);

    context.set_base(c.clone(), 20);
    engine.invalidate(vec![c.clone()], vec![], Version::new(2));
    let result = engine.evaluate(vec![a.clone()], EvaluateOptions::default()).await;
    assert!(result.success);
    assert_eq!(value_of(&result, &c), 20);
    assert_eq!(value_of(&result, &b), 21);
    assert_eq!(value_of(&result, &a), 22);
    assert_eq!(context.run_count(&a), 2);
    assert_eq!(context.run_count(&b), 2);
    assert_eq!(context.run_count(&c), 2);
}

/// Scenario B / P2 / P3: re-invalidating a leaf whose value doesn't actually change causes it to
/// re-run (it was explicitly marked changed) but its dependents are dirty-checked and cleaned
/// without ever re-invoking their Functions.
#[tokio::test]
async fn unchanged_leaf_short_circuits_dependents() {
    init_logging();
    let context = Arc::new(TContext::default());
    let (c, b, a) = (t(0), t(1), t(2));
    context.set_base(c.clone(), 10);

    let engine = test_engine(context.clone());
    let first = engine.evaluate(vec![a.clone()], EvaluateOptions::default()).await;
    assert!(first.success);
    assert_eq!(value_of(&first, &a), 12);

    // No-op change: c's base is set back to the same value it already had.
    context.set_base(c.clone(), 10);
    engine.invalidate(vec![c.clone()], vec![], Version::new(2));
    let second = engine.evaluate(vec![a.clone()], EvaluateOptions::default()).await;
    assert!(second.success);
    assert_eq!(value_of(&second, &a), 12);

    // c re-ran (it was the explicit invalidation root) but b and a were cleaned, not re-run.
    assert_eq!(context.run_count(&c), 2);
    assert_eq!(context.run_count(&b), 1);
    assert_eq!(context.run_count(&a), 1);
}

/// Scenario C: a diamond `top = left + right`, `left = base + 1`, `right = base + 2`. Changing
/// `base` causes exactly one re-invocation per node; no node runs twice in the same build.
#[tokio::test]
async fn diamond_rebuild_runs_each_node_once() {
    init_logging();
    let context = Arc::new(TContext::default());
    let (base, left, right, top) = (t(0), t(1), t(2), t(3));
    context.set_base(base.clone(), 5);
    context.set_base(left.clone(), 1);
    context.set_base(right.clone(), 2);
    context.set_base(top.clone(), 0);
    context.set_edges(right.clone(), vec![base.clone()]);
    context.set_edges(top.clone(), vec![left.clone(), right.clone()]);

    let engine = test_engine(context.clone());
    let first = engine.evaluate(vec![top.clone()], EvaluateOptions::default()).await;
    assert!(first.success);
    assert_eq!(value_of(&first, &base), 5);
    assert_eq!(value_of(&first, &left), 6);
    assert_eq!(value_of(&first, &right), 7);
    assert_eq!(value_of(&first, &top), 13);
    for key in [&base, &left, &right, &top] {
        assert_eq!(context.run_count(key), 1, "{key:?} should have run exactly once");
    }

    context.set_base(base.clone(), 50);
    engine.invalidate(vec![base.clone()], vec![], Version::new(2));
    let second = engine.evaluate(vec![top.clone()], EvaluateOptions::default()).await;
    assert!(second.success);
    assert_eq!(value_of(&second, &top), 103);
    for key in [&base, &left, &right, &top] {
        assert_eq!(
            context.run_count(key),
            2,
            "{key:?} should have run exactly twice across both builds"
        );
    }
}

/// Scenario D: a two-node cycle is detected and reported as a `Cycle` error for both members,
/// without deadlocking. Since cycle reaping only runs when requested, the test polls
/// `check_for_cycles` until either the evaluation resolves or a generous timeout elapses.
#[tokio::test]
async fn cyclic_dependency_reports_cycle_error() {
    init_logging();
    let context = Arc::new(TContext::default());
    let (x, y) = (t(100), t(101));
    context.set_edges(x.clone(), vec![y.clone()]);
    context.set_edges(y.clone(), vec![x.clone()]);

    let graph = Engine::new(test_registry(context), task_executor::Executor::new());
    let graph = graph.graph().clone();
    let request_context = Context::new(graph.clone(), Version::new(1));

    let graph2 = graph.clone();
    let request_context2 = request_context.clone();
    let handle = tokio::spawn(async move { graph2.create(&request_context2, x).await });

    let outcome = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            graph.check_for_cycles();
            if handle.is_finished() {
                break handle.await.unwrap();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("cycle was never detected within the timeout");

    match outcome {
        Err(EngineError::Cycle(path)) => assert_eq!(path.len(), 2),
        other => panic!("expected a Cycle error, got {other:?}"),
    }
}

/// Scenario E / P8: once a Context has been cancelled (what fail-fast `evaluate()` does after its
/// first error), any further dependency request on that Context returns `Cancellation`
/// immediately, without starting the Function that would have computed it.
#[tokio::test]
async fn fail_fast_cancellation_stops_further_work() {
    init_logging();
    let context = Arc::new(TContext::default());
    let (root_fail, root_slow, slow_inner) = (t_uncacheable(0), t(1), t(2));
    context.set_edges(root_fail.clone(), vec![]);
    context.set_error(root_fail.clone());
    context.set_edges(slow_inner.clone(), vec![]);
    context.set_edges(root_slow.clone(), vec![slow_inner.clone()]);

    let graph = Graph::new(test_registry(context.clone()), task_executor::Executor::new());
    let request_context = Context::new(graph.clone(), Version::new(1));

    let failure = graph.create(&request_context, root_fail.clone()).await;
    assert!(matches!(failure, Err(EngineError::Function(_))));

    request_context.cancel();

    let cancelled = graph.create(&request_context, root_slow.clone()).await;
    assert!(matches!(cancelled, Err(EngineError::Cancellation)));
    assert_eq!(
        context.run_count(&slow_inner),
        0,
        "a dependency request made after cancellation must never start its Function"
    );
}

/// `keep_going = true` aggregates: an independent failing root does not prevent a sibling root
/// from completing successfully in the same `evaluate()` call.
#[tokio::test]
async fn keep_going_aggregates_independent_root_failures() {
    init_logging();
    let context = Arc::new(TContext::default());
    let (good, bad) = (t(0), t_uncacheable(0));
    context.set_base(good.clone(), 7);
    context.set_error(bad.clone());

    let engine = test_engine(context.clone());
    let result = engine
        .evaluate(vec![good.clone(), bad.clone()], EvaluateOptions { keep_going: true, parallelism: 4 })
        .await;

    assert!(!result.success);
    assert_eq!(value_of(&result, &good), 7);
    assert!(result.errors.contains_key(&bad));
}

/// Scenario F: a node that requests two dependency groups in sequence re-requests group 0 first
/// during dirty-checking. Behaviorally: after invalidating a member of group 0, the node re-runs
/// and its final value reflects the new dependency graph; the untouched group-1 dependency is
/// never re-executed.
#[tokio::test]
async fn grouped_dependency_request_rebuilds_correctly() {
    init_logging();
    let context = Arc::new(TContext::default());
    let (x, y, z, top) = (t(0), t(1), t(2), t(3));
    for leaf in [&x, &y, &z] {
        context.set_edges((*leaf).clone(), vec![]);
    }
    context.set_base(x.clone(), 1);
    context.set_base(y.clone(), 2);
    context.set_base(z.clone(), 3);
    context.set_groups(top.clone(), vec![vec![x.clone(), y.clone()], vec![z.clone()]]);

    let engine = test_engine(context.clone());
    let first = engine.evaluate(vec![top.clone()], EvaluateOptions::default()).await;
    assert!(first.success);
    assert_eq!(value_of(&first, &top), 1 + 1 + 2 + 3); // base(top)=1 + x + y + z

    context.set_base(y.clone(), 20);
    engine.invalidate(vec![y.clone()], vec![], Version::new(2));
    let second = engine.evaluate(vec![top.clone()], EvaluateOptions::default()).await;
    assert!(second.success);
    assert_eq!(value_of(&second, &top), 1 + 1 + 20 + 3);
    assert_eq!(context.run_count(&top), 2);
    assert_eq!(context.run_count(&z), 1, "z's own Function should never re-execute");
}

/// Supplemented feature: a Function that opts out of caching (`cacheable() == false`) re-runs on
/// every `evaluate()` call even with no invalidation in between, since its result is scoped to
/// the Run that produced it rather than being reusable across Runs.
#[tokio::test]
async fn uncacheable_node_reruns_every_build() {
    init_logging();
    let context = Arc::new(TContext::default());
    let key = t_uncacheable(0);
    context.set_edges(key.clone(), vec![]);
    context.set_base(key.clone(), 1);

    let engine = test_engine(context.clone());
    for expected_runs in 1..=3 {
        let result = engine.evaluate(vec![key.clone()], EvaluateOptions::default()).await;
        assert!(result.success);
        assert_eq!(context.run_count(&key), expected_runs);
    }
}

/// Supplemented feature: `Graph::poll` blocks until a key's recorded value actually changes,
/// rather than merely being re-evaluated.
#[tokio::test]
async fn poll_blocks_until_value_changes() {
    init_logging();
    let context = Arc::new(TContext::default());
    let key = t(0);
    context.set_base(key.clone(), 1);

    let engine = test_engine(context.clone());
    let first = engine.evaluate(vec![key.clone()], EvaluateOptions::default()).await;
    assert!(first.success);
    let last_seen = Version::new(1);

    let graph = engine.graph().clone();
    let poll_context = Context::new(graph.clone(), Version::new(2));
    let key_for_poll = key.clone();
    let poll_handle = tokio::spawn(async move { graph.poll(&poll_context, key_for_poll, last_seen).await });

    // Give the poller a chance to register before the value actually changes.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!poll_handle.is_finished());

    context.set_base(key.clone(), 2);
    engine.invalidate(vec![key.clone()], vec![], Version::new(2));
    let _ = engine.evaluate(vec![key.clone()], EvaluateOptions::default()).await;

    tokio::time::timeout(Duration::from_secs(2), poll_handle)
        .await
        .expect("poll should have returned once the value changed")
        .unwrap();
}

/// A longer randomized chain: repeatedly perturbing a random node's base value and rebuilding
/// always converges on the value an independent, direct recomputation would produce. Grounded in
/// the teacher's own `invalidate_randomly` test, which exercises the same property by fuzzing
/// which node gets invalidated each round.
#[tokio::test]
async fn randomized_chain_stays_consistent() {
    init_logging();
    use rand::Rng;

    const CHAIN_LEN: usize = 8;
    let context = Arc::new(TContext::default());
    let keys: Vec<Key> = (0..CHAIN_LEN).map(t).collect();
    let mut bases: Vec<usize> = (0..CHAIN_LEN).map(|i| i + 1).collect();
    for (key, base) in keys.iter().zip(bases.iter()) {
        context.set_base(key.clone(), *base);
    }

    let engine = test_engine(context.clone());
    let head = keys.last().unwrap().clone();

    let expected = |bases: &[usize]| -> usize { bases.iter().sum() };

    let mut version = 1u64;
    let mut rng = rand::rng();
    for _ in 0..10 {
        let result = engine.evaluate(vec![head.clone()], EvaluateOptions::default()).await;
        assert!(result.success);
        assert_eq!(value_of(&result, &head), expected(&bases));

        let idx = rng.random_range(0..CHAIN_LEN);
        let new_base = rng.random_range(1..100);
        bases[idx] = new_base;
        context.set_base(keys[idx].clone(), new_base);
        version += 1;
        engine.invalidate(vec![keys[idx].clone()], vec![], Version::new(version));
    }

    let last = engine.evaluate(vec![head.clone()], EvaluateOptions::default()).await;
    assert!(last.success);
    assert_eq!(value_of(&last, &head), expected(&bases));
}

/// A Function error from a dependency is wrapped as a `Dep` error identifying the dependency that
/// actually failed, rather than being reported as the requester's own `Function` error.
#[tokio::test]
async fn dependency_failure_is_wrapped_with_origin() {
    init_logging();
    let context = Arc::new(TContext::default());
    let (leaf, root) = (t(0), t(1));
    context.set_error(leaf.clone());

    let engine = test_engine(context);
    let result = engine.evaluate(vec![root.clone()], EvaluateOptions::default()).await;
    assert!(!result.success);
    match result.errors.get(&root) {
        Some(EngineError::Dep(info)) => assert_eq!(info.origin, leaf),
        other => panic!("expected a Dep error wrapping {leaf:?}, got {other:?}"),
    }
}

/// A non-restartable node's Function is configured separately from a restartable one purely via
/// kind registration here (see module docs); this just confirms both kinds compute correctly.
/// The races that the `restartable` flag actually changes the handling of are covered by the two
/// tests below.
#[tokio::test]
async fn nonrestartable_kind_computes_like_any_other() {
    init_logging();
    let context = Arc::new(TContext::default());
    let key = t_nonrestartable(0);
    context.set_base(key.clone(), 42);

    let engine = test_engine(context);
    let result = engine.evaluate(vec![key.clone()], EvaluateOptions::default()).await;
    assert!(result.success);
    assert_eq!(value_of(&result, &key), 42);
}

/// A non-restartable node dirtied while its first run is still in flight must absorb the dirty and
/// run to completion, rather than being cancelled: the interrupt channel backing it only ever
/// delivers once, so the spawned task must stop selecting on it once the dirty is absorbed.
#[tokio::test]
async fn nonrestartable_dirtied_while_running_completes_instead_of_cancelling() {
    init_logging();
    let context = Arc::new(TContext::default());
    let key = t_nonrestartable(0);
    context.set_base(key.clone(), 42);
    context.set_delay(key.clone(), Duration::from_millis(100));

    let graph = Graph::new(test_registry(context.clone()), task_executor::Executor::new());
    let request_context = Context::new(graph.clone(), Version::new(1));

    let graph2 = graph.clone();
    let request_context2 = request_context.clone();
    let key2 = key.clone();
    let handle = tokio::spawn(async move { graph2.create(&request_context2, key2).await });

    // Give the run a chance to actually start before dirtying it mid-flight.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!handle.is_finished(), "the run should still be in flight at this point");
    graph.invalidate(vec![], vec![key.clone()]);

    let (value, _, _) = handle
        .await
        .unwrap()
        .expect("a dirtied-while-running non-restartable node should still complete, not be cancelled");
    assert_eq!(value.downcast_ref::<TValue>().unwrap().0, 42);
    assert_eq!(
        context.run_count(&key),
        1,
        "absorbing a dirty mid-flight must not cancel or restart the in-flight run"
    );
}

/// Invalidation must not dirty "through" a running, non-restartable node and into its dependents:
/// since the node hasn't settled, its dependents' eventual correctness can't yet be determined.
/// Grounded in the teacher's `Walk::stop_walking_predicate` in `graph/src/lib.rs`.
#[tokio::test]
async fn invalidation_does_not_propagate_past_a_running_nonrestartable_node() {
    init_logging();
    let context = Arc::new(TContext::default());
    let (a, b) = (t_nonrestartable(0), t(1));
    context.set_edges(b.clone(), vec![a.clone()]);
    context.set_base(a.clone(), 1);

    let graph = Graph::new(test_registry(context.clone()), task_executor::Executor::new());
    let request_context = Context::new(graph.clone(), Version::new(1));
    graph.create(&request_context, b.clone()).await.expect("initial build should succeed");

    context.set_delay(a.clone(), Duration::from_millis(100));
    graph.invalidate(vec![a.clone()], vec![]);

    let graph2 = graph.clone();
    let request_context2 = request_context.clone();
    let a2 = a.clone();
    let handle = tokio::spawn(async move { graph2.create(&request_context2, a2).await });

    // Give the re-run a chance to actually start before invalidating it again mid-flight.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!handle.is_finished(), "the re-run should still be in flight at this point");

    let result = graph.invalidate(vec![], vec![a.clone()]);
    assert_eq!(
        result.dirtied, 0,
        "a dirty hitting a running, non-restartable node (and its dependent) must not propagate"
    );

    handle.await.unwrap().expect("the in-flight run should still complete normally");
}
