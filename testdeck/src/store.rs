// Copyright (c) The testdeck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The authoritative collection of test case results.
//!
//! [`ResultStore`] is cheap to clone and safe to share across tasks and threads. Every mutation
//! and every aggregation read happens under a single lock, and change events are published while
//! that lock is held, so subscribers see events in exactly the order mutations happened.

use crate::{
    aggregate::{AggregateSummary, TestCounts},
    errors::{OutcomeError, StoreError},
    results::{TestCaseId, TestCaseResult, TestOutcome},
};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::debug;

/// The default capacity of the change event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// A change to the [`ResultStore`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreEvent {
    /// The store generation after this change. Generations increase by one per change.
    pub generation: u64,

    /// Per-state counts after this change.
    pub counts: TestCounts,

    /// The kind of change.
    pub kind: StoreEventKind,
}

/// The kind of change described by a [`StoreEvent`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StoreEventKind {
    /// A result was added.
    Added(TestCaseResult),

    /// A result was removed.
    Removed(TestCaseResult),

    /// A result changed state.
    Updated {
        /// The result before the change.
        before: TestCaseResult,

        /// The result after the change.
        after: TestCaseResult,
    },
}

/// A consistent, point-in-time copy of the [`ResultStore`] contents.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    generation: u64,
    results: Vec<TestCaseResult>,
}

impl StoreSnapshot {
    /// Returns the store generation this snapshot was taken at.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the results in store order.
    pub fn results(&self) -> &[TestCaseResult] {
        &self.results
    }

    /// Returns the number of results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns true if the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Returns the identities in store order.
    pub fn ids(&self) -> impl Iterator<Item = &TestCaseId> + '_ {
        self.results.iter().map(|result| result.id())
    }
}

/// The authoritative, ordered collection of test case results.
#[derive(Clone, Debug)]
pub struct ResultStore {
    shared: Arc<StoreShared>,
}

#[derive(Debug)]
struct StoreShared {
    state: Mutex<StoreState>,
    events: broadcast::Sender<StoreEvent>,
}

#[derive(Debug, Default)]
struct StoreState {
    results: IndexMap<TestCaseId, TestCaseResult>,
    counts: TestCounts,
    generation: u64,
    next_ordinal: u64,
}

impl ResultStore {
    /// Creates an empty store with the default event capacity.
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// Creates an empty store whose change channel buffers `capacity` events per subscriber.
    ///
    /// Subscribers that fall further behind than this observe a lag and must resynchronize from
    /// a [`snapshot`](Self::snapshot).
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            shared: Arc::new(StoreShared {
                state: Mutex::new(StoreState::default()),
                events,
            }),
        }
    }

    /// Creates a store holding `results`, in order.
    ///
    /// Fails if two results share an identity. No events are published for the initial contents.
    pub fn from_results(
        results: impl IntoIterator<Item = TestCaseResult>,
        capacity: usize,
    ) -> Result<Self, StoreError> {
        let store = Self::with_event_capacity(capacity);
        for result in results {
            store.add(result)?;
        }
        Ok(store)
    }

    /// Subscribes to change events.
    ///
    /// Only changes made after this call are delivered.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.shared.events.subscribe()
    }

    /// Subscribes to change events and takes a snapshot atomically.
    ///
    /// Every event delivered to the receiver has a generation greater than the snapshot's.
    pub fn snapshot_and_subscribe(&self) -> (StoreSnapshot, broadcast::Receiver<StoreEvent>) {
        let state = self.lock();
        let receiver = self.shared.events.subscribe();
        (state.snapshot(), receiver)
    }

    /// Adds a result to the end of the store.
    pub fn add(&self, result: TestCaseResult) -> Result<(), StoreError> {
        let mut state = self.lock();
        if state.results.contains_key(result.id()) {
            return Err(StoreError::DuplicateTestCase(result.id().clone()));
        }

        let mut result = result;
        result.ordinal = state.next_ordinal;
        state.next_ordinal += 1;
        state.counts.add(result.state());
        state
            .results
            .insert(result.id().clone(), result.clone());
        self.publish(&mut state, StoreEventKind::Added(result));
        Ok(())
    }

    /// Removes a result, returning it if it was present.
    pub fn remove(&self, id: &TestCaseId) -> Option<TestCaseResult> {
        let mut state = self.lock();
        let removed = state.results.shift_remove(id)?;
        state.counts.remove(removed.state());
        self.publish(&mut state, StoreEventKind::Removed(removed.clone()));
        Some(removed)
    }

    /// Returns a copy of the result for `id`, if present.
    pub fn get(&self, id: &TestCaseId) -> Option<TestCaseResult> {
        self.lock().results.get(id).cloned()
    }

    /// Returns true if a result for `id` is present.
    pub fn contains(&self, id: &TestCaseId) -> bool {
        self.lock().results.contains_key(id)
    }

    /// Returns the number of results.
    pub fn len(&self) -> usize {
        self.lock().results.len()
    }

    /// Returns true if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().results.is_empty()
    }

    /// Returns the current generation.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Returns a consistent copy of the store contents.
    pub fn snapshot(&self) -> StoreSnapshot {
        self.lock().snapshot()
    }

    /// Computes the aggregate summary while holding the store lock.
    pub fn summarize(&self) -> AggregateSummary {
        let state = self.lock();
        let summary = AggregateSummary::from_results(state.results.values());
        debug_assert_eq!(
            summary.counts, state.counts,
            "incremental counts drifted from the store contents"
        );
        summary
    }

    /// Returns the per-state counts maintained alongside the results.
    pub fn counts(&self) -> TestCounts {
        self.lock().counts
    }

    /// Resets the given results to not run, publishing an update for each one that changed.
    ///
    /// Unknown identities are ignored. Returns the number of results that changed.
    pub(crate) fn reset<'a>(&self, ids: impl IntoIterator<Item = &'a TestCaseId>) -> usize {
        let mut state = self.lock();
        let mut changed = 0;
        for id in ids {
            let Some(result) = state.results.get_mut(id) else {
                continue;
            };
            if !result.state().is_terminal() {
                continue;
            }
            let before = result.clone();
            result.reset();
            let after = result.clone();
            state.counts.transition(before.state(), after.state());
            self.publish(&mut state, StoreEventKind::Updated { before, after });
            changed += 1;
        }
        if changed > 0 {
            debug!("reset {changed} results to not run");
        }
        changed
    }

    /// Moves a not-run result into the terminal state described by `outcome`.
    pub(crate) fn record_outcome(
        &self,
        outcome: TestOutcome,
    ) -> Result<TestCaseResult, OutcomeError> {
        let mut state = self.lock();
        let Some(result) = state.results.get_mut(&outcome.id) else {
            return Err(OutcomeError::UnknownTestCase(outcome.id));
        };
        if result.state().is_terminal() {
            return Err(OutcomeError::AlreadyFinished {
                id: outcome.id,
                state: result.state(),
            });
        }

        let before = result.clone();
        result.apply(outcome);
        let after = result.clone();
        state.counts.transition(before.state(), after.state());
        self.publish(
            &mut state,
            StoreEventKind::Updated {
                before,
                after: after.clone(),
            },
        );
        Ok(after)
    }

    fn lock(&self) -> MutexGuard<'_, StoreState> {
        // Every mutation leaves the state consistent before anything that can panic, so a
        // poisoned lock still guards valid data.
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &mut StoreState, kind: StoreEventKind) {
        state.generation += 1;
        let event = StoreEvent {
            generation: state.generation,
            counts: state.counts,
            kind,
        };
        // An error only means there are no subscribers right now.
        let _ = self.shared.events.send(event);
    }
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreState {
    fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            generation: self.generation,
            results: self.results.values().cloned().collect(),
        }
    }
}
