// Copyright (c) The testdeck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Running tests against an external executor.
//!
//! The main structure in this module is [`RunCoordinator`], created by a
//! [`RunCoordinatorBuilder`]. It serializes run requests behind a busy-gate, hands them to a
//! [`TestExecutor`], and applies the outcomes the executor reports through an
//! [`OutcomeReporter`] to the [`ResultStore`].

use crate::{
    errors::{DiscoveryError, DisplayErrorChain, ExecutorError, OutcomeError, RunError},
    results::{AssemblyInfo, TestCaseId, TestCaseResult, TestOutcome, TestState},
    store::{DEFAULT_EVENT_CAPACITY, ResultStore},
};
use indexmap::IndexSet;
use std::{
    future::Future,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{sync::broadcast, time::Instant};
use tracing::{debug, info, warn};

/// Supplies the test cases contained in an assembly.
pub trait TestDiscovery {
    /// Returns the test cases in `assembly`, in discovery order.
    fn discover(
        &self,
        assembly: &AssemblyInfo,
    ) -> impl Future<Output = Result<Vec<TestCaseResult>, DiscoveryError>> + Send;
}

/// Executes test cases.
///
/// Implementations may run tests in parallel or sequentially, and may report outcomes from any
/// task or thread by cloning the [`OutcomeReporter`]. The run is considered complete when the
/// returned future resolves; outcomes reported after that are ignored.
pub trait TestExecutor: Send + Sync + 'static {
    /// Executes the tests in `request`.
    ///
    /// Returns an error only for infrastructure failures. A failing test is reported as a
    /// [`TestOutcome`], not as an error.
    fn execute(
        &self,
        request: RunRequest,
        reporter: OutcomeReporter,
    ) -> impl Future<Output = Result<(), ExecutorError>> + Send;
}

/// An ordered, de-duplicated set of test cases to run.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunRequest {
    ids: IndexSet<TestCaseId>,
}

impl RunRequest {
    /// Creates a request for `ids`, in order. Duplicates are dropped.
    pub fn new(ids: impl IntoIterator<Item = TestCaseId>) -> Self {
        Self {
            ids: ids.into_iter().collect(),
        }
    }

    /// Creates a request for a single test.
    pub fn single(id: TestCaseId) -> Self {
        Self::new([id])
    }

    /// Returns the number of tests requested.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Returns true if no tests are requested.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Returns true if `id` is part of this request.
    pub fn contains(&self, id: &TestCaseId) -> bool {
        self.ids.contains(id)
    }

    /// Iterates over the requested identities in order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &TestCaseId> + '_ {
        self.ids.iter()
    }
}

impl FromIterator<TestCaseId> for RunRequest {
    fn from_iter<I: IntoIterator<Item = TestCaseId>>(iter: I) -> Self {
        Self::new(iter)
    }
}

/// Which command started a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunKind {
    /// Every test in the store.
    All,

    /// The tests currently visible through the filter.
    Filtered,

    /// A single test.
    Single,

    /// An explicit request.
    Custom,
}

impl RunKind {
    pub(crate) fn to_static_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Filtered => "filtered",
            Self::Single => "single",
            Self::Custom => "custom",
        }
    }
}

/// Statistics for a run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    /// The number of tests requested.
    pub initial_run_count: usize,

    /// The number of tests that reached a terminal state.
    pub finished_count: usize,

    /// The number of tests that passed.
    pub passed: usize,

    /// The number of tests that failed.
    pub failed: usize,

    /// The number of tests that were skipped.
    pub skipped: usize,

    /// The number of reported outcomes that could not be applied.
    pub ignored_outcomes: usize,
}

impl RunStats {
    /// Returns the number of requested tests that never reported an outcome.
    pub fn not_run(&self) -> usize {
        self.initial_run_count.saturating_sub(self.finished_count)
    }

    /// Returns true if every requested test finished and none failed.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.not_run() == 0
    }

    fn on_finished(&mut self, state: TestState) {
        self.finished_count += 1;
        match state {
            TestState::Passed => self.passed += 1,
            TestState::Failed => self.failed += 1,
            TestState::Skipped => self.skipped += 1,
            TestState::NotRun => {}
        }
    }
}

/// An event produced by a [`RunCoordinator`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunEvent {
    /// The busy-gate was acquired or released. Run commands are enabled when this is false.
    BusyChanged(bool),

    /// A run started.
    RunStarted {
        /// The unique ID for this run within the coordinator.
        run_id: u64,

        /// The command that started the run.
        kind: RunKind,

        /// The number of tests requested.
        test_count: usize,
    },

    /// A test reached a terminal state.
    TestFinished {
        /// The run the test belongs to.
        run_id: u64,

        /// The result after the outcome was applied.
        result: TestCaseResult,

        /// Statistics for the run so far.
        current_stats: RunStats,
    },

    /// A diagnostic message from the executor.
    Diagnostic {
        /// The run the message belongs to.
        run_id: u64,

        /// The message, prefixed with the assembly name.
        message: String,
    },

    /// A run finished, successfully or not.
    RunFinished {
        /// The run that finished.
        run_id: u64,

        /// How long the run took.
        elapsed: Duration,

        /// Final statistics.
        run_stats: RunStats,

        /// True if the executor failed outright.
        executor_failed: bool,

        /// True if the run future was dropped before the executor returned. Tests without an
        /// outcome stay not run.
        cancelled: bool,
    },

    /// A run request was refused because another run was in flight.
    RunRejected {
        /// The command that was refused.
        kind: RunKind,
    },

    /// A single-test run completed; consumers may navigate to this result.
    ResultSelected(TestCaseResult),
}

/// A builder for [`RunCoordinator`] instances.
#[derive(Clone, Debug)]
pub struct RunCoordinatorBuilder {
    assembly_name: String,
    show_diagnostics: bool,
    event_capacity: usize,
}

impl Default for RunCoordinatorBuilder {
    fn default() -> Self {
        Self {
            assembly_name: String::new(),
            show_diagnostics: false,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl RunCoordinatorBuilder {
    /// Sets the assembly name used to prefix diagnostic messages.
    pub fn set_assembly_name(&mut self, name: impl Into<String>) -> &mut Self {
        self.assembly_name = name.into();
        self
    }

    /// Sets whether diagnostic messages from the executor are logged and published.
    pub fn set_show_diagnostics(&mut self, show: bool) -> &mut Self {
        self.show_diagnostics = show;
        self
    }

    /// Sets the capacity of the run event channel.
    pub fn set_event_capacity(&mut self, capacity: usize) -> &mut Self {
        self.event_capacity = capacity;
        self
    }

    /// Creates a new coordinator.
    pub fn build<E: TestExecutor>(&self, store: ResultStore, executor: E) -> RunCoordinator<E> {
        let (events, _) = broadcast::channel(self.event_capacity.max(1));
        RunCoordinator {
            shared: Arc::new(CoordinatorShared {
                store,
                executor,
                busy: AtomicBool::new(false),
                next_run_id: AtomicU64::new(1),
                events,
                assembly_name: self.assembly_name.clone(),
                show_diagnostics: self.show_diagnostics,
            }),
        }
    }
}

/// Serializes run requests and applies their outcomes to the [`ResultStore`].
///
/// Only one run is in flight at a time. A request made while busy fails with
/// [`RunError::AlreadyInProgress`] and publishes [`RunEvent::RunRejected`]; it is never queued.
/// In-flight runs cannot be aborted through the coordinator. Dropping a run future cancels the
/// executor, publishes [`RunEvent::RunFinished`] with `cancelled` set, and releases the gate.
#[derive(Debug)]
pub struct RunCoordinator<E> {
    shared: Arc<CoordinatorShared<E>>,
}

impl<E> Clone for RunCoordinator<E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

#[derive(Debug)]
struct CoordinatorShared<E> {
    store: ResultStore,
    executor: E,
    busy: AtomicBool,
    next_run_id: AtomicU64,
    events: broadcast::Sender<RunEvent>,
    assembly_name: String,
    show_diagnostics: bool,
}

impl<E: TestExecutor> RunCoordinator<E> {
    /// Returns the store this coordinator applies outcomes to.
    pub fn store(&self) -> &ResultStore {
        &self.shared.store
    }

    /// Returns the executor.
    pub fn executor(&self) -> &E {
        &self.shared.executor
    }

    /// Returns true if a run is in flight.
    pub fn is_busy(&self) -> bool {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// Returns true if run commands are currently enabled.
    pub fn can_run(&self) -> bool {
        !self.is_busy()
    }

    /// Subscribes to run events.
    pub fn subscribe(&self) -> broadcast::Receiver<RunEvent> {
        self.shared.events.subscribe()
    }

    /// Runs every test in the store, in store order.
    pub async fn run_all(&self) -> Result<RunStats, RunError> {
        let gate = self.acquire(RunKind::All)?;
        let request = self.shared.store.snapshot().ids().cloned().collect();
        self.execute(&gate, RunKind::All, request).await
    }

    /// Runs the given tests, typically the ones currently visible through the filter.
    pub async fn run_filtered(
        &self,
        ids: impl IntoIterator<Item = TestCaseId>,
    ) -> Result<RunStats, RunError> {
        let gate = self.acquire(RunKind::Filtered)?;
        self.execute(&gate, RunKind::Filtered, RunRequest::new(ids))
            .await
    }

    /// Runs an explicit request.
    pub async fn run(&self, request: RunRequest) -> Result<RunStats, RunError> {
        let gate = self.acquire(RunKind::Custom)?;
        self.execute(&gate, RunKind::Custom, request).await
    }

    /// Runs a single test and publishes [`RunEvent::ResultSelected`] with its final result.
    pub async fn run_one(&self, id: &TestCaseId) -> Result<TestCaseResult, RunError> {
        let gate = self.acquire(RunKind::Single)?;
        if !self.shared.store.contains(id) {
            return Err(RunError::UnknownTestCase(id.clone()));
        }

        self.execute(&gate, RunKind::Single, RunRequest::single(id.clone()))
            .await?;

        let result = self
            .shared
            .store
            .get(id)
            .ok_or_else(|| RunError::UnknownTestCase(id.clone()))?;
        self.send(RunEvent::ResultSelected(result.clone()));
        Ok(result)
    }

    fn acquire(&self, kind: RunKind) -> Result<BusyGuard<'_, E>, RunError> {
        if self
            .shared
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(
                "rejecting {} run request: a test run is already in progress",
                kind.to_static_str()
            );
            self.send(RunEvent::RunRejected { kind });
            return Err(RunError::AlreadyInProgress);
        }

        debug!("acquired busy-gate for {} run", kind.to_static_str());
        self.send(RunEvent::BusyChanged(true));
        Ok(BusyGuard { coordinator: self })
    }

    async fn execute(
        &self,
        _gate: &BusyGuard<'_, E>,
        kind: RunKind,
        request: RunRequest,
    ) -> Result<RunStats, RunError> {
        if request.is_empty() {
            debug!("{} run requested no tests, nothing to do", kind.to_static_str());
            return Ok(RunStats::default());
        }

        let run_id = self.shared.next_run_id.fetch_add(1, Ordering::Relaxed);
        let test_count = request.len();

        // Results start the run as not run so every transition within it is monotonic.
        self.shared.store.reset(request.iter());

        let reporter = OutcomeReporter::new(run_id, &request, self.shared.clone());

        info!(
            "starting {} run {run_id} with {test_count} tests",
            kind.to_static_str()
        );
        self.send(RunEvent::RunStarted {
            run_id,
            kind,
            test_count,
        });

        let mut finish = FinishOnDrop::new(&reporter);
        let res = self.shared.executor.execute(request, reporter.clone()).await;
        let (run_stats, elapsed) = finish.finish(res.is_err());

        match res {
            Ok(()) => {
                info!(
                    "run {run_id} finished in {elapsed:?}: {} passed, {} failed, {} skipped, {} not run",
                    run_stats.passed,
                    run_stats.failed,
                    run_stats.skipped,
                    run_stats.not_run(),
                );
                Ok(run_stats)
            }
            Err(source) => {
                let error = RunError::RunnerFailure {
                    stats: run_stats,
                    source,
                };
                warn!("run {run_id}: {}", DisplayErrorChain::new(&error));
                Err(error)
            }
        }
    }

    fn send(&self, event: RunEvent) {
        self.shared.send(event);
    }
}

impl<E> CoordinatorShared<E> {
    fn send(&self, event: RunEvent) {
        // An error only means there are no subscribers right now.
        let _ = self.events.send(event);
    }
}

/// Holds the busy-gate for the duration of a run and releases it on every exit path.
#[derive(Debug)]
struct BusyGuard<'a, E> {
    coordinator: &'a RunCoordinator<E>,
}

impl<E> Drop for BusyGuard<'_, E> {
    fn drop(&mut self) {
        let shared = &self.coordinator.shared;
        shared.busy.store(false, Ordering::Release);
        debug!("released busy-gate");
        shared.send(RunEvent::BusyChanged(false));
    }
}

/// Closes the reporter and publishes [`RunEvent::RunFinished`] exactly once, including when the
/// run future is dropped mid-flight.
struct FinishOnDrop<'a> {
    reporter: &'a OutcomeReporter,
    start: Instant,
    finished: bool,
}

impl<'a> FinishOnDrop<'a> {
    fn new(reporter: &'a OutcomeReporter) -> Self {
        Self {
            reporter,
            start: Instant::now(),
            finished: false,
        }
    }

    fn finish(&mut self, executor_failed: bool) -> (RunStats, Duration) {
        self.finished = true;
        self.publish(executor_failed, false)
    }

    fn publish(&self, executor_failed: bool, cancelled: bool) -> (RunStats, Duration) {
        let run_stats = self.reporter.close();
        let elapsed = self.start.elapsed();
        self.reporter.inner.sink.send(RunEvent::RunFinished {
            run_id: self.reporter.inner.run_id,
            elapsed,
            run_stats,
            executor_failed,
            cancelled,
        });
        (run_stats, elapsed)
    }
}

impl Drop for FinishOnDrop<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let (run_stats, elapsed) = self.publish(false, true);
        warn!(
            "run {} cancelled after {elapsed:?}: {} of {} tests finished",
            self.reporter.inner.run_id, run_stats.finished_count, run_stats.initial_run_count,
        );
    }
}

/// The channel through which a [`TestExecutor`] reports outcomes for one run.
///
/// Cheap to clone and safe to use from any task or thread.
#[derive(Clone)]
pub struct OutcomeReporter {
    inner: Arc<ReporterInner>,
}

struct ReporterInner {
    run_id: u64,
    requested: IndexSet<TestCaseId>,
    state: Mutex<ReporterState>,
    sink: Arc<dyn OutcomeSink>,
}

#[derive(Debug, Default)]
struct ReporterState {
    stats: RunStats,
    closed: bool,
}

// Erases the executor type so reporters don't carry it.
trait OutcomeSink: Send + Sync {
    fn store(&self) -> &ResultStore;
    fn send(&self, event: RunEvent);
    fn assembly_name(&self) -> &str;
    fn show_diagnostics(&self) -> bool;
}

impl<E: Send + Sync> OutcomeSink for CoordinatorShared<E> {
    fn store(&self) -> &ResultStore {
        &self.store
    }

    fn send(&self, event: RunEvent) {
        CoordinatorShared::send(self, event);
    }

    fn assembly_name(&self) -> &str {
        &self.assembly_name
    }

    fn show_diagnostics(&self) -> bool {
        self.show_diagnostics
    }
}

impl std::fmt::Debug for OutcomeReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeReporter")
            .field("run_id", &self.inner.run_id)
            .field("requested", &self.inner.requested.len())
            .finish_non_exhaustive()
    }
}

impl OutcomeReporter {
    fn new<E: Send + Sync + 'static>(
        run_id: u64,
        request: &RunRequest,
        shared: Arc<CoordinatorShared<E>>,
    ) -> Self {
        Self {
            inner: Arc::new(ReporterInner {
                run_id,
                requested: request.ids.clone(),
                state: Mutex::new(ReporterState {
                    stats: RunStats {
                        initial_run_count: request.len(),
                        ..RunStats::default()
                    },
                    closed: false,
                }),
                sink: shared,
            }),
        }
    }

    /// Returns the run this reporter belongs to.
    pub fn run_id(&self) -> u64 {
        self.inner.run_id
    }

    /// Reports the terminal outcome of a test.
    ///
    /// Outcomes for tests outside the request, for tests that already finished in this run, or
    /// arriving after the run completed are not applied. They are logged and counted in
    /// [`RunStats::ignored_outcomes`], and the reason is returned.
    pub fn report(&self, outcome: TestOutcome) -> Result<TestCaseResult, OutcomeError> {
        let mut state = self.lock();
        let res = if state.closed {
            Err(OutcomeError::RunFinished(outcome.id))
        } else if !self.inner.requested.contains(&outcome.id) {
            Err(OutcomeError::NotRequested(outcome.id))
        } else {
            self.inner.sink.store().record_outcome(outcome)
        };

        match res {
            Ok(result) => {
                state.stats.on_finished(result.state());
                let current_stats = state.stats;
                debug!(
                    "run {}: {} {}",
                    self.inner.run_id,
                    result.id(),
                    result.state()
                );
                self.inner.sink.send(RunEvent::TestFinished {
                    run_id: self.inner.run_id,
                    result: result.clone(),
                    current_stats,
                });
                Ok(result)
            }
            Err(error) => {
                state.stats.ignored_outcomes += 1;
                warn!("run {}: ignoring outcome: {error}", self.inner.run_id);
                Err(error)
            }
        }
    }

    /// Reports a diagnostic message from the executor.
    ///
    /// Messages are only logged and published if diagnostics are enabled.
    pub fn diagnostic(&self, message: impl AsRef<str>) {
        let sink = &self.inner.sink;
        if !sink.show_diagnostics() {
            return;
        }
        let message = format!("{}: {}", sink.assembly_name(), message.as_ref());
        info!("{message}");
        sink.send(RunEvent::Diagnostic {
            run_id: self.inner.run_id,
            message,
        });
    }

    /// Returns statistics for the run so far.
    pub fn stats(&self) -> RunStats {
        self.lock().stats
    }

    fn close(&self) -> RunStats {
        let mut state = self.lock();
        state.closed = true;
        state.stats
    }

    fn lock(&self) -> MutexGuard<'_, ReporterState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
