// Copyright 2022 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::mem;
use std::sync::atomic;
use std::sync::Arc;

use fnv::FnvHashMap as HashMap;
use futures::channel::oneshot;
use futures::future::{self, BoxFuture, FutureExt};
use parking_lot::Mutex;

use crate::context::{Context, Environment, RunId};
use crate::error::EngineError;
use crate::graph::EntryId;
use crate::grouped_deps::GroupedDependencies;
use crate::key::Key;
use crate::test_trace_log;
use crate::value::Value;
use crate::version::Version;

use async_value::{AsyncValue, AsyncValueReceiver, AsyncValueSender};

/// The result of running (or attempting to clean) a Key's Function: success or a cached
/// `EngineError`, never both.
pub(crate) type NodeValue = Result<Value, EngineError>;

///
/// A token that uniquely identifies one run of a NodeEntry. Each run has a different RunToken;
/// when a run completes, if the current RunToken of its entry no longer matches the RunToken of
/// the spawned work (because the entry was `clear`ed in the meantime), the work is discarded. See
/// `NodeEntry::complete`.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) struct RunToken(u32);

impl RunToken {
    fn initial() -> RunToken {
        RunToken(0)
    }

    fn next(self) -> RunToken {
        RunToken(self.0 + 1)
    }
}

#[derive(Debug)]
pub(crate) enum NodeInterrupt {
    Dirtied,
    Aborted(NodeOutcome),
}

/// `(result, last_changed_version, has_uncacheable_deps)`, delivered to every caller awaiting
/// this Node's completion.
pub(crate) type NodeOutcome = (NodeValue, Version, bool);

#[derive(Clone, Debug)]
pub(crate) struct CompletedDeps {
    pub(crate) groups: GroupedDependencies,
    pub(crate) versions: HashMap<Key, Version>,
    pub(crate) has_uncacheable_deps: bool,
}

impl CompletedDeps {
    fn empty() -> CompletedDeps {
        CompletedDeps {
            groups: GroupedDependencies::new(),
            versions: HashMap::default(),
            has_uncacheable_deps: false,
        }
    }
}

///
/// A result from running (or cleaning) a NodeEntry.
///
#[derive(Clone, Debug)]
enum EntryResult {
    /// Immediately readable by any consumer, with no constraints.
    Clean(NodeValue),
    /// A consumer should dirty-check this entry's dependencies before reusing it.
    Dirty(NodeValue),
    /// Like Clean, but only within the Run that produced it.
    Uncacheable(NodeValue, RunId),
    /// Computed from an Uncacheable dependency; clean only within the same Run.
    UncacheableDependencies(NodeValue, RunId),
}

impl EntryResult {
    fn new(value: NodeValue, run_id: RunId, cacheable: bool, has_uncacheable_deps: bool) -> EntryResult {
        if !cacheable {
            EntryResult::Uncacheable(value, run_id)
        } else if has_uncacheable_deps {
            EntryResult::UncacheableDependencies(value, run_id)
        } else {
            EntryResult::Clean(value)
        }
    }

    fn is_clean(&self, run_id: RunId) -> bool {
        match self {
            EntryResult::Clean(..) => true,
            EntryResult::Uncacheable(_, id) => run_id == *id,
            EntryResult::UncacheableDependencies(_, id) => run_id == *id,
            EntryResult::Dirty(..) => false,
        }
    }

    fn has_uncacheable_deps(&self) -> bool {
        matches!(
            self,
            EntryResult::Uncacheable(..) | EntryResult::UncacheableDependencies(..)
        )
    }

    /// Whether this result should make a poller block (there's no pending work to clean it).
    fn poll_should_wait(&self, run_id: RunId) -> bool {
        match self {
            EntryResult::Uncacheable(_, id) => run_id == *id,
            EntryResult::Dirty(..) => false,
            EntryResult::Clean(..) | EntryResult::UncacheableDependencies(..) => true,
        }
    }

    fn peek(&self, run_id: RunId) -> Option<NodeValue> {
        if self.is_clean(run_id) {
            Some(self.as_ref().clone())
        } else {
            None
        }
    }

    fn as_ref(&self) -> &NodeValue {
        match self {
            EntryResult::Clean(v)
            | EntryResult::Dirty(v)
            | EntryResult::Uncacheable(v, _)
            | EntryResult::UncacheableDependencies(v, _) => v,
        }
    }

    fn dirty(&mut self) {
        match self {
            EntryResult::Clean(v)
            | EntryResult::UncacheableDependencies(v, _)
            | EntryResult::Uncacheable(v, _) => {
                *self = EntryResult::Dirty(v.clone());
            }
            EntryResult::Dirty(_) => {}
        }
    }

    fn clean(&mut self, run_id: RunId, cacheable: bool, has_uncacheable_deps: bool) {
        let value = match self {
            EntryResult::Dirty(v) => v.clone(),
            EntryResult::UncacheableDependencies(v, _) => v.clone(),
            x => unreachable!("An entry in state {:?} should not have been cleaned.", x),
        };
        *self = EntryResult::new(value, run_id, cacheable, has_uncacheable_deps);
    }
}

#[derive(Debug)]
enum EntryState {
    // Not yet started, or explicitly cleared. `previous_result` is not a valid value to read: it
    // is preserved only to decide, on the next completion, whether the value actually changed.
    NotStarted {
        run_token: RunToken,
        last_changed_version: Version,
        last_evaluated_version: Version,
        pollers: Vec<oneshot::Sender<()>>,
        previous_result: Option<(EntryResult, CompletedDeps)>,
    },
    // Running. A Running entry that is marked dirty re-runs rather than completing with a stale
    // value; see `dirty`.
    Running {
        run_token: RunToken,
        pending_value: AsyncValue<NodeOutcome, NodeInterrupt>,
        last_changed_version: Version,
        last_evaluated_version: Version,
        previous_result: Option<(EntryResult, CompletedDeps)>,
        is_cleaning: bool,
    },
    // Completed, and possibly since marked dirty (in which case it stays in this state, holding
    // a Dirty EntryResult, until a caller moves it back to Running).
    Completed {
        run_token: RunToken,
        last_changed_version: Version,
        last_evaluated_version: Version,
        pollers: Vec<oneshot::Sender<()>>,
        result: EntryResult,
        deps: CompletedDeps,
    },
}

impl EntryState {
    fn initial() -> EntryState {
        EntryState::NotStarted {
            run_token: RunToken::initial(),
            last_changed_version: Version::MINIMAL,
            last_evaluated_version: Version::MINIMAL,
            pollers: Vec::new(),
            previous_result: None,
        }
    }
}

enum RunOutcome {
    /// Dependencies were re-checked and none had changed: the previous result is still valid.
    Cleaned { has_uncacheable_deps: bool },
    /// The Function ran (or was aborted/invalidated) and produced a fresh outcome.
    Ran {
        result: NodeValue,
        deps: CompletedDeps,
    },
}

///
/// Per-key storage: the NodeEntry holds the full lifecycle (NotStarted/Running/Completed) for one
/// Key. A cheap handle: cloning a NodeEntry shares the same underlying state, so the Graph and a
/// spawned run can each hold their own handle to the same entry.
///
#[derive(Clone)]
pub(crate) struct NodeEntry {
    key: Key,
    state: Arc<Mutex<EntryState>>,
    /// I6: sticky until the entry is actually re-evaluated (not merely re-dirtied or cancelled).
    /// `clear()` is only ever called for entries the host asserted are "changed" (see
    /// `Graph::invalidate`); calling it a second time before the first mark was ever observed by a
    /// completed run means the host marked the same entry changed twice in one invalidation pass,
    /// which spec.md §3 (I6) calls a fatal programming error. `dirty()` is the soft "might have
    /// changed" marking and never touches this flag.
    changed_pending: Arc<atomic::AtomicBool>,
}

impl NodeEntry {
    pub(crate) fn new(key: Key) -> NodeEntry {
        NodeEntry {
            key,
            state: Arc::new(Mutex::new(EntryState::initial())),
            changed_pending: Arc::new(atomic::AtomicBool::new(false)),
        }
    }

    pub(crate) fn key(&self) -> &Key {
        &self.key
    }

    fn cacheable_with_output(&self, context: &Context, output: Option<&Value>) -> bool {
        let Ok(function) = context.graph().function_for(&self.key) else {
            return false;
        };
        match output {
            Some(item) => function.cacheable() && function.cacheable_item(item),
            None => false,
        }
    }

    fn restartable(&self, context: &Context) -> bool {
        context
            .graph()
            .function_for(&self.key)
            .map(|f| f.restartable())
            .unwrap_or(true)
    }

    ///
    /// If this entry is currently Completed and clean with the given Version, waits for it to be
    /// dirtied or otherwise invalidated. Otherwise returns immediately.
    ///
    pub(crate) async fn poll(&self, context: &Context, last_seen_version: Version) {
        let recv = {
            let mut state = self.state.lock();
            let pollers = match &mut *state {
                EntryState::Completed {
                    result,
                    last_evaluated_version,
                    pollers,
                    ..
                } if *last_evaluated_version == last_seen_version
                    && result.poll_should_wait(context.run_id()) =>
                {
                    pollers
                }
                EntryState::NotStarted {
                    last_evaluated_version,
                    pollers,
                    ..
                } if *last_evaluated_version == last_seen_version => pollers,
                _ => return,
            };
            let (send, recv) = oneshot::channel();
            pollers.push(send);
            recv
        };
        let _ = recv.await;
    }

    /// If this entry is Completed and clean, returns a clone of its cached result.
    pub(crate) fn peek(&self, context: &Context) -> Option<NodeValue> {
        let state = self.state.lock();
        match &*state {
            EntryState::Completed { result, .. } => result.peek(context.run_id()),
            _ => None,
        }
    }

    pub(crate) fn has_uncacheable_deps(&self) -> bool {
        match &*self.state.lock() {
            EntryState::Completed { result, .. } => result.has_uncacheable_deps(),
            _ => false,
        }
    }

    pub(crate) fn last_changed_version(&self) -> Option<Version> {
        match &*self.state.lock() {
            EntryState::Completed {
                last_changed_version,
                ..
            } => Some(*last_changed_version),
            _ => None,
        }
    }

    ///
    /// Spawns execution of this entry on the Graph's Executor: either an attempt to clean it (if
    /// previous dependency versions are available) falling back to a fresh run, or a fresh run
    /// outright.
    ///
    /// `attempt_cleaning` distinguishes the two ways a node can reach this point: a node that was
    /// explicitly `clear`ed or `cancel`ed (NotStarted) must fully re-run regardless of what its
    /// stale dependency groups say, since those groups describe a run we've discarded; a node that
    /// was `dirty`ed while still Completed is eligible to have its old groups re-verified. Without
    /// this distinction, a zero-dependency (leaf) node would "clean" trivially on every rebuild
    /// (an empty group list always compares equal) and never actually re-invoke its Function.
    ///
    #[allow(clippy::too_many_arguments)]
    fn spawn_node_execution(
        context_factory: &Context,
        entry: NodeEntry,
        entry_id: EntryId,
        run_token: RunToken,
        last_changed_version: Version,
        last_evaluated_version: Version,
        previous: Option<(EntryResult, CompletedDeps)>,
        attempt_cleaning: bool,
    ) -> (EntryState, AsyncValueReceiver<NodeOutcome>) {
        let run_token = run_token.next();
        let context = context_factory.clone_for(entry_id);
        let context2 = context.clone();
        let entry2 = entry.clone();
        let (value, mut sender, receiver) = AsyncValue::<NodeOutcome, NodeInterrupt>::new();
        let is_cleaning = attempt_cleaning && previous.is_some();
        let previous_deps = if attempt_cleaning {
            previous.as_ref().map(|(_, deps)| deps.clone())
        } else {
            None
        };

        let run_or_clean: BoxFuture<'static, RunOutcome> = async move {
            if let Some(previous_deps) = previous_deps {
                match context
                    .graph()
                    .attempt_cleaning(entry_id, &previous_deps, &context)
                    .await
                {
                    Ok(has_uncacheable_deps) => {
                        context
                            .stats()
                            .cleaning_succeeded
                            .fetch_add(1, atomic::Ordering::SeqCst);
                        return RunOutcome::Cleaned { has_uncacheable_deps };
                    }
                    Err(()) => {
                        context
                            .stats()
                            .cleaning_failed
                            .fetch_add(1, atomic::Ordering::SeqCst);
                    }
                }
            }

            let function = match context.graph().function_for(entry.key()) {
                Ok(function) => function,
                Err(e) => {
                    return RunOutcome::Ran {
                        result: Err(e),
                        deps: CompletedDeps::empty(),
                    };
                }
            };
            let environment = Environment::new(context.clone());
            let result = function.run(entry.key().clone(), environment).await;
            context.stats().ran.fetch_add(1, atomic::Ordering::SeqCst);
            let dep_state = context.complete();
            RunOutcome::Ran {
                result,
                deps: CompletedDeps {
                    groups: dep_state.groups,
                    versions: dep_state.versions,
                    has_uncacheable_deps: dep_state.has_uncacheable_deps,
                },
            }
        }
        .boxed();

        let _join = context2.graph().executor().native_spawn(async move {
            let mut run_or_clean = run_or_clean;
            let outcome = loop {
                tokio::select! {
                  interrupt = sender.interrupted() => {
                    match interrupt {
                      Some(NodeInterrupt::Aborted(res)) => {
                          break RunOutcome::Ran { result: res.0, deps: CompletedDeps::empty() };
                      }
                      Some(NodeInterrupt::Dirtied) => {
                          if entry2.restartable(&context2) {
                              entry2.cancel(run_token);
                              return;
                          }
                          // Not restartable: let the in-flight run finish rather than looping back
                          // into `sender.interrupted()`. The interrupt oneshot only ever fires once
                          // (`AsyncValueSender::interrupted` consumes it), so re-selecting on it here
                          // would just observe a closed channel and fall through to the `None` arm,
                          // canceling a run we just decided to let finish. Its result will be
                          // dirty-checked again on the next access.
                          break run_or_clean.await;
                      }
                      None => {
                          entry2.cancel(run_token);
                          return;
                      }
                    }
                  }
                  outcome = &mut run_or_clean => {
                      break outcome;
                  }
                }
            };
            entry2.complete(&context2, run_token, sender, outcome);
        });

        (
            EntryState::Running {
                run_token,
                pending_value: value,
                last_changed_version,
                last_evaluated_version,
                previous_result: previous,
                is_cleaning,
            },
            receiver,
        )
    }

    ///
    /// Returns a Future for this entry's NodeOutcome, starting or restarting a run if needed.
    ///
    pub(crate) fn get_node_result(&self, context: &Context, entry_id: EntryId) -> BoxFuture<'static, NodeOutcome> {
        let mut state = self.state.lock();

        match &*state {
            EntryState::Running {
                pending_value,
                last_changed_version,
                ..
            } => {
                if let Some(receiver) = pending_value.receiver() {
                    let last_changed_version = *last_changed_version;
                    return async move {
                        receiver.recv().await.unwrap_or_else(|| {
                            (Err(EngineError::invalidated()), last_changed_version, true)
                        })
                    }
                    .boxed();
                }
            }
            EntryState::Completed {
                result,
                last_changed_version,
                ..
            } if result.is_clean(context.run_id()) => {
                let value = result.as_ref().clone();
                let has_uncacheable_deps = result.has_uncacheable_deps();
                let last_changed_version = *last_changed_version;
                return future::ready((value, last_changed_version, has_uncacheable_deps)).boxed();
            }
            _ => (),
        }

        let (next_state, receiver) = match mem::replace(&mut *state, EntryState::initial()) {
            EntryState::NotStarted {
                run_token,
                last_changed_version,
                last_evaluated_version,
                previous_result,
                ..
            }
            | EntryState::Running {
                run_token,
                last_changed_version,
                last_evaluated_version,
                previous_result,
                ..
            } => Self::spawn_node_execution(
                context,
                self.clone(),
                entry_id,
                run_token,
                last_changed_version,
                last_evaluated_version,
                previous_result,
                false,
            ),
            EntryState::Completed {
                run_token,
                last_changed_version,
                last_evaluated_version,
                result,
                deps,
                ..
            } => {
                test_trace_log!("Re-starting entry {:?}. It was: {:?}", self.key, result);
                assert!(
                    !result.is_clean(context.run_id()),
                    "A clean entry should not reach this point: {result:?}"
                );
                let cacheable = self.cacheable_with_output(context, result.as_ref().as_ref().ok());
                Self::spawn_node_execution(
                    context,
                    self.clone(),
                    entry_id,
                    run_token,
                    last_changed_version,
                    last_evaluated_version,
                    Some((result, deps)),
                    cacheable,
                )
            }
        };

        *state = next_state;
        let last_changed_version = match &*state {
            EntryState::Running { last_changed_version, .. } => *last_changed_version,
            _ => unreachable!(),
        };
        async move {
            receiver
                .recv()
                .await
                .unwrap_or_else(|| (Err(EngineError::invalidated()), last_changed_version, true))
        }
        .boxed()
    }

    /// Called when the Executor observes that a run was cancelled (all receivers dropped).
    pub(crate) fn cancel(&self, result_run_token: RunToken) {
        let mut state = self.state.lock();
        match &*state {
            EntryState::Running { run_token, .. } if *run_token == result_run_token => {}
            _ => return,
        }
        *state = match mem::replace(&mut *state, EntryState::initial()) {
            EntryState::Running {
                run_token,
                last_changed_version,
                last_evaluated_version,
                previous_result,
                ..
            } => {
                test_trace_log!("Canceling {:?} of {}.", run_token, self.key);
                EntryState::NotStarted {
                    run_token: run_token.next(),
                    last_changed_version,
                    last_evaluated_version,
                    pollers: Vec::new(),
                    previous_result,
                }
            }
            s => s,
        };
    }

    /// Called when a run (or cleaning attempt) completes.
    fn complete(
        &self,
        context: &Context,
        result_run_token: RunToken,
        sender: AsyncValueSender<NodeOutcome, NodeInterrupt>,
        outcome: RunOutcome,
    ) {
        let mut state = self.state.lock();
        match &*state {
            EntryState::Running { run_token, .. } if *run_token == result_run_token => {}
            _ => {
                test_trace_log!("Not completing {:?}: it was invalidated.", self.key);
                return;
            }
        }

        *state = match mem::replace(&mut *state, EntryState::initial()) {
            EntryState::Running {
                run_token,
                mut last_changed_version,
                mut last_evaluated_version,
                mut previous_result,
                ..
            } => {
                last_evaluated_version = Version::max(last_evaluated_version, context.version());
                match outcome {
                    RunOutcome::Ran {
                        result: Err(e),
                        ..
                    } if e.is_invalidated() || matches!(e, EngineError::Cancellation) => {
                        // Transient: revert to NotStarted so the next request retries cleanly.
                        if let Some((ref mut prev, _)) = previous_result {
                            prev.dirty();
                        }
                        sender.send((Err(e), last_changed_version, true));
                        EntryState::NotStarted {
                            run_token: run_token.next(),
                            last_changed_version,
                            last_evaluated_version,
                            pollers: Vec::new(),
                            previous_result,
                        }
                    }
                    RunOutcome::Ran { result, deps } => {
                        self.changed_pending.store(false, atomic::Ordering::SeqCst);
                        let cacheable = match &result {
                            Ok(v) => self.cacheable_with_output(context, Some(v)),
                            Err(_) => true,
                        };
                        let has_uncacheable_deps = deps.has_uncacheable_deps;
                        let next_result =
                            EntryResult::new(result, context.run_id(), cacheable, has_uncacheable_deps);
                        let changed = previous_result
                            .as_ref()
                            .map(|(prev, _)| prev.as_ref() != next_result.as_ref())
                            .unwrap_or(true);
                        if changed {
                            last_changed_version = context.version();
                        }
                        let value = next_result.as_ref().clone();
                        sender.send((value, last_changed_version, next_result.has_uncacheable_deps()));
                        EntryState::Completed {
                            run_token,
                            last_changed_version,
                            last_evaluated_version,
                            pollers: Vec::new(),
                            result: next_result,
                            deps,
                        }
                    }
                    RunOutcome::Cleaned { has_uncacheable_deps } => {
                        let (mut result, deps) = previous_result
                            .expect("An entry cannot be cleaned without a previous result.");
                        let cacheable = match result.as_ref() {
                            Ok(v) => self.cacheable_with_output(context, Some(v)),
                            Err(_) => true,
                        };
                        result.clean(context.run_id(), cacheable, has_uncacheable_deps);
                        let value = result.as_ref().clone();
                        sender.send((value, last_changed_version, result.has_uncacheable_deps()));
                        EntryState::Completed {
                            run_token,
                            last_changed_version,
                            last_evaluated_version,
                            pollers: Vec::new(),
                            result,
                            deps,
                        }
                    }
                }
            }
            s => s,
        };
    }

    /// Clears this entry's state, forcing recomputation. If `graph_still_contains_edges` is
    /// false, the caller has already removed this entry's outbound edges from the graph.
    pub(crate) fn clear(&self, graph_still_contains_edges: bool) {
        let already_marked_changed = self.changed_pending.swap(true, atomic::Ordering::SeqCst);
        debug_assert!(
            !already_marked_changed,
            "Entry {:?} was marked changed a second time before ever being re-evaluated; see I6.",
            self.key
        );

        let mut state = self.state.lock();
        let (run_token, last_changed_version, last_evaluated_version, mut previous_result) =
            match mem::replace(&mut *state, EntryState::initial()) {
                EntryState::NotStarted {
                    run_token,
                    last_changed_version,
                    last_evaluated_version,
                    previous_result,
                    ..
                } => (run_token, last_changed_version, last_evaluated_version, previous_result),
                EntryState::Running {
                    run_token,
                    pending_value,
                    last_changed_version,
                    last_evaluated_version,
                    previous_result,
                    ..
                } => {
                    std::mem::drop(pending_value);
                    (run_token, last_changed_version, last_evaluated_version, previous_result)
                }
                EntryState::Completed {
                    run_token,
                    last_changed_version,
                    last_evaluated_version,
                    result,
                    deps,
                    ..
                } => (run_token, last_changed_version, last_evaluated_version, Some((result, deps))),
            };

        test_trace_log!("Clearing entry {:?}", self.key);
        if graph_still_contains_edges {
            if let Some((ref mut prev, _)) = previous_result {
                prev.dirty();
            }
        }

        *state = EntryState::NotStarted {
            run_token: run_token.next(),
            last_changed_version,
            last_evaluated_version,
            pollers: Vec::new(),
            previous_result,
        };
    }

    /// Dirties this entry: it will dirty-check its dependencies the next time it is requested.
    pub(crate) fn dirty(&self) {
        let mut state = self.state.lock();
        test_trace_log!("Dirtying entry {:?}", self.key);
        match &mut *state {
            EntryState::Completed { result, pollers, .. } => {
                pollers.clear();
                result.dirty();
                return;
            }
            EntryState::NotStarted { pollers, .. } => {
                pollers.clear();
                return;
            }
            EntryState::Running { pending_value, .. } => {
                if pending_value.try_interrupt(NodeInterrupt::Dirtied).is_ok() {
                    return;
                }
            }
        }

        *state = match mem::replace(&mut *state, EntryState::initial()) {
            EntryState::Running {
                run_token,
                pending_value,
                last_changed_version,
                last_evaluated_version,
                previous_result,
                ..
            } => {
                test_trace_log!(
                    "Failed to interrupt {:?} while running: canceling instead.",
                    self.key
                );
                std::mem::drop(pending_value);
                EntryState::NotStarted {
                    run_token,
                    last_changed_version,
                    last_evaluated_version,
                    pollers: Vec::new(),
                    previous_result,
                }
            }
            _ => unreachable!(),
        };
    }

    /// Terminates this entry with the given error iff it is Running (used by cycle detection).
    pub(crate) fn terminate(&self, err: EngineError) {
        let mut state = self.state.lock();
        test_trace_log!("Terminating entry {:?} with {:?}", self.key, err);
        if let EntryState::Running {
            pending_value,
            last_changed_version,
            ..
        } = &mut *state
        {
            let _ = pending_value.try_interrupt(NodeInterrupt::Aborted((Err(err), *last_changed_version, true)));
        }
    }

    pub(crate) fn is_started(&self) -> bool {
        !matches!(&*self.state.lock(), EntryState::NotStarted { .. })
    }

    pub(crate) fn is_running(&self) -> bool {
        matches!(&*self.state.lock(), EntryState::Running { .. })
    }

    pub(crate) fn is_cleaning(&self) -> bool {
        matches!(&*self.state.lock(), EntryState::Running { is_cleaning: true, .. })
    }

    pub(crate) fn format(&self, context: &Context) -> String {
        let state = match self.peek(context) {
            Some(nr) => format!("{nr:?}"),
            None => "<None>".to_string(),
        };
        format!("{} == {}", self.key, state)
    }
}

impl std::fmt::Debug for NodeEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NodeEntry({:?})", self.key)
    }
}
