// Copyright (c) The testdeck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The dashboard for a single test assembly.
//!
//! [`Dashboard`] owns the [`ResultStore`], a [`RunCoordinator`] and a background view task. The
//! view task is the only place the [`FilterView`], the [`Aggregator`] and the [`Debouncer`]
//! live. It consumes store events in order and publishes a [`ViewState`] through a watch
//! channel, so a consumer always sees visible results, counters and caption as of the same store
//! generation.

use crate::{
    aggregate::{AggregateSummary, Aggregator},
    config::DashboardConfig,
    debounce::Debouncer,
    errors::{DiscoveryError, RunError, ViewError},
    filter::{FilterCriteria, FilterView, FilterViewEvent},
    results::{AssemblyInfo, TestCaseId, TestCaseResult},
    runner::{
        RunCoordinator, RunCoordinatorBuilder, RunEvent, RunStats, TestDiscovery, TestExecutor,
    },
    store::{ResultStore, StoreEvent},
};
use std::{pin::pin, sync::Arc, time::Duration};
use tokio::{
    sync::{
        broadcast::{self, error::RecvError},
        mpsc, oneshot, watch,
    },
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// What a consumer renders: the visible results and the summary, as of one store generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewState {
    generation: u64,
    criteria: FilterCriteria,
    visible: Arc<[TestCaseResult]>,
    summary: AggregateSummary,
}

impl ViewState {
    /// Returns the store generation this state reflects.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the criteria in effect.
    pub fn criteria(&self) -> &FilterCriteria {
        &self.criteria
    }

    /// Returns the visible results, sorted by display name.
    pub fn visible(&self) -> &[TestCaseResult] {
        &self.visible
    }

    /// Returns the number of visible results.
    pub fn visible_count(&self) -> usize {
        self.visible.len()
    }

    /// Returns the identities of the visible results, in display order.
    pub fn visible_ids(&self) -> impl ExactSizeIterator<Item = &TestCaseId> + '_ {
        self.visible.iter().map(|result| result.id())
    }

    /// Returns the summary for the whole assembly.
    pub fn summary(&self) -> &AggregateSummary {
        &self.summary
    }

    /// Returns the summary caption.
    pub fn caption(&self) -> &str {
        &self.summary.caption
    }
}

/// An incremental change to the dashboard view.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ViewEvent {
    /// The visible results changed.
    Filter(FilterViewEvent),

    /// The summary changed.
    SummaryChanged(AggregateSummary),
}

#[derive(Debug)]
enum ViewCommand {
    Schedule(FilterCriteria),
    ApplyNow(FilterCriteria, oneshot::Sender<()>),
    Shutdown,
}

/// The dashboard for one test assembly.
#[derive(Debug)]
pub struct Dashboard<E> {
    assembly: AssemblyInfo,
    store: ResultStore,
    coordinator: RunCoordinator<E>,
    view: watch::Receiver<ViewState>,
    view_events: broadcast::Sender<ViewEvent>,
    commands: mpsc::UnboundedSender<ViewCommand>,
    task: JoinHandle<()>,
}

impl<E: TestExecutor> Dashboard<E> {
    /// Discovers the tests in `assembly` and creates a dashboard for them.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn load<D: TestDiscovery>(
        assembly: AssemblyInfo,
        discovery: &D,
        executor: E,
        config: &DashboardConfig,
    ) -> Result<Self, DiscoveryError> {
        let results = discovery.discover(&assembly).await?;
        debug!(
            "discovered {} tests in {}",
            results.len(),
            assembly.display_name()
        );

        let store = ResultStore::with_event_capacity(config.events.capacity);
        for result in results {
            if let Err(error) = store.add(result) {
                warn!("{}: skipping discovered test: {error}", assembly.display_name());
            }
        }

        Ok(Self::new(assembly, store, executor, config))
    }

    /// Creates a dashboard over an existing store and spawns its view task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        assembly: AssemblyInfo,
        store: ResultStore,
        executor: E,
        config: &DashboardConfig,
    ) -> Self {
        let coordinator = RunCoordinatorBuilder::default()
            .set_assembly_name(assembly.display_name())
            .set_show_diagnostics(config.diagnostics.show)
            .set_event_capacity(config.events.capacity)
            .build(store.clone(), executor);

        let (snapshot, store_events) = store.snapshot_and_subscribe();
        let view = FilterView::new(FilterCriteria::default(), &snapshot);
        let mut aggregator = Aggregator::new();
        aggregator.recompute(&snapshot);

        let initial = ViewState {
            generation: view.generation(),
            criteria: view.criteria().clone(),
            visible: view.results().cloned().collect(),
            summary: aggregator.current().clone(),
        };
        let (state_tx, state_rx) = watch::channel(initial);
        let (view_events, _) = broadcast::channel(config.events.capacity.max(1));
        let (commands, command_rx) = mpsc::unbounded_channel();

        let task = ViewTask {
            store: store.clone(),
            view,
            aggregator,
            state_tx,
            view_events: view_events.clone(),
            visible_dirty: false,
        };
        let task = tokio::spawn(task.run(store_events, command_rx, config.filter.debounce));

        info!(
            "dashboard for {} ready with {} tests",
            assembly.display_name(),
            snapshot.len()
        );

        Self {
            assembly,
            store,
            coordinator,
            view: state_rx,
            view_events,
            commands,
            task,
        }
    }

    /// Returns the assembly this dashboard shows.
    pub fn assembly(&self) -> &AssemblyInfo {
        &self.assembly
    }

    /// Returns the assembly's display name.
    pub fn display_name(&self) -> &str {
        self.assembly.display_name()
    }

    /// Returns the result store.
    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Returns the run coordinator.
    pub fn coordinator(&self) -> &RunCoordinator<E> {
        &self.coordinator
    }

    /// Returns a receiver for the published view state.
    pub fn view(&self) -> watch::Receiver<ViewState> {
        self.view.clone()
    }

    /// Returns a copy of the latest view state.
    pub fn state(&self) -> ViewState {
        self.view.borrow().clone()
    }

    /// Subscribes to incremental view changes.
    pub fn subscribe_view_events(&self) -> broadcast::Receiver<ViewEvent> {
        self.view_events.subscribe()
    }

    /// Subscribes to run events.
    pub fn subscribe_run_events(&self) -> broadcast::Receiver<RunEvent> {
        self.coordinator.subscribe()
    }

    /// Returns true if run commands are enabled.
    pub fn can_run(&self) -> bool {
        self.coordinator.can_run()
    }

    /// Returns true if a run is in flight.
    pub fn is_busy(&self) -> bool {
        self.coordinator.is_busy()
    }

    /// Schedules `criteria` to be applied once filter input has been quiet for the debounce
    /// period. A later call before then replaces it.
    pub fn set_filter(&self, criteria: FilterCriteria) -> Result<(), ViewError> {
        self.commands
            .send(ViewCommand::Schedule(criteria))
            .map_err(|_| ViewError::Closed)
    }

    /// Parses a status string and query, then schedules them like [`set_filter`](Self::set_filter).
    ///
    /// An unrecognized status is rejected and the current criteria stay in effect.
    pub fn set_filter_str(&self, status: &str, query: impl Into<String>) -> Result<(), ViewError> {
        let criteria = FilterCriteria::parse(status, query).inspect_err(|error| {
            warn!("{}: rejecting filter: {error}", self.display_name());
        })?;
        self.set_filter(criteria)
    }

    /// Applies `criteria` immediately, cancelling any pending debounced filter.
    ///
    /// Returns once the new view state is published.
    pub async fn apply_filter_now(&self, criteria: FilterCriteria) -> Result<(), ViewError> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.commands
            .send(ViewCommand::ApplyNow(criteria, ack_tx))
            .map_err(|_| ViewError::Closed)?;
        ack_rx.await.map_err(|_| ViewError::Closed)
    }

    /// Waits until the view state reflects every store change made before this call.
    pub async fn settled(&self) -> Result<ViewState, ViewError> {
        let target = self.store.generation();
        let mut view = self.view.clone();
        let state = view
            .wait_for(|state| state.generation >= target)
            .await
            .map_err(|_| ViewError::Closed)?
            .clone();
        Ok(state)
    }

    /// Runs every test in the assembly.
    pub async fn run_all(&self) -> Result<RunStats, RunError> {
        self.coordinator.run_all().await
    }

    /// Runs the tests currently visible through the filter.
    pub async fn run_filtered(&self) -> Result<RunStats, RunError> {
        let ids: Vec<TestCaseId> = self.view.borrow().visible_ids().cloned().collect();
        self.coordinator.run_filtered(ids).await
    }

    /// Runs a single test and returns its final result.
    pub async fn run_one(&self, id: &TestCaseId) -> Result<TestCaseResult, RunError> {
        self.coordinator.run_one(id).await
    }

    /// Stops the view task and waits for it to exit.
    ///
    /// A run in flight is not aborted; it keeps its own handle on the store.
    pub async fn shutdown(self) {
        // An error means the task already exited.
        let _ = self.commands.send(ViewCommand::Shutdown);
        if let Err(error) = self.task.await {
            warn!("{}: view task failed: {error}", self.assembly.display_name());
        }
        debug!("dashboard for {} shut down", self.assembly.display_name());
    }
}

struct ViewTask {
    store: ResultStore,
    view: FilterView,
    aggregator: Aggregator,
    state_tx: watch::Sender<ViewState>,
    view_events: broadcast::Sender<ViewEvent>,
    visible_dirty: bool,
}

impl ViewTask {
    async fn run(
        mut self,
        mut store_events: broadcast::Receiver<StoreEvent>,
        mut commands: mpsc::UnboundedReceiver<ViewCommand>,
        debounce: Duration,
    ) {
        let mut debouncer = pin!(Debouncer::new(debounce));

        loop {
            tokio::select! {
                // Store events first, so a filter is never applied against a view that is
                // behind events already queued.
                biased;

                res = store_events.recv() => {
                    match res {
                        Ok(event) => {
                            self.on_store_event(&event);
                            self.drain(&mut store_events);
                        }
                        Err(RecvError::Lagged(skipped)) => self.resync(skipped),
                        Err(RecvError::Closed) => break,
                    }
                }
                command = commands.recv() => {
                    match command {
                        Some(ViewCommand::Schedule(criteria)) => {
                            if let Some(replaced) = debouncer.as_mut().schedule(criteria) {
                                debug!("replaced pending filter {replaced:?}");
                            }
                        }
                        Some(ViewCommand::ApplyNow(criteria, ack)) => {
                            debouncer.as_mut().cancel();
                            self.apply_criteria(criteria);
                            self.publish();
                            // The caller may have stopped waiting.
                            let _ = ack.send(());
                        }
                        Some(ViewCommand::Shutdown) | None => break,
                    }
                }
                criteria = debouncer.as_mut(), if debouncer.is_pending() => {
                    self.apply_criteria(criteria);
                }
            }

            self.publish();
        }

        debug!("view task exiting");
    }

    fn drain(&mut self, store_events: &mut broadcast::Receiver<StoreEvent>) {
        loop {
            match store_events.try_recv() {
                Ok(event) => self.on_store_event(&event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => self.resync(skipped),
                Err(_) => break,
            }
        }
    }

    fn on_store_event(&mut self, event: &StoreEvent) {
        // Already covered by a rebuild from a later snapshot.
        if event.generation <= self.view.generation() {
            return;
        }
        if let Some(change) = self.view.apply(event) {
            self.visible_dirty = true;
            self.send(ViewEvent::Filter(change));
        }
        if let Some(summary) = self.aggregator.observe(event.counts) {
            let summary = summary.clone();
            self.send(ViewEvent::SummaryChanged(summary));
        }
    }

    fn resync(&mut self, skipped: u64) {
        warn!("view fell behind by {skipped} store events, resynchronizing");
        let snapshot = self.store.snapshot();
        let change = self.view.resync(&snapshot);
        self.visible_dirty = true;
        self.send(ViewEvent::Filter(change));
        if let Some(summary) = self.aggregator.recompute(&snapshot) {
            let summary = summary.clone();
            self.send(ViewEvent::SummaryChanged(summary));
        }
    }

    fn apply_criteria(&mut self, criteria: FilterCriteria) {
        if criteria == *self.view.criteria() {
            debug!("filter unchanged, nothing to apply");
            return;
        }
        debug!("applying filter {criteria:?}");
        let snapshot = self.store.snapshot();
        if let Some(change) = self.view.set_criteria(criteria, &snapshot) {
            self.visible_dirty = true;
            self.send(ViewEvent::Filter(change));
        }
        // The rebuild may have moved the view ahead of queued events.
        if let Some(summary) = self.aggregator.recompute(&snapshot) {
            let summary = summary.clone();
            self.send(ViewEvent::SummaryChanged(summary));
        }
    }

    fn publish(&mut self) {
        let visible_dirty = std::mem::take(&mut self.visible_dirty);
        let view = &self.view;
        let summary = self.aggregator.current();
        self.state_tx.send_if_modified(|state| {
            let mut modified = false;
            if visible_dirty {
                state.criteria = view.criteria().clone();
                state.visible = view.results().cloned().collect();
                modified = true;
            }
            if state.generation != view.generation() {
                state.generation = view.generation();
                modified = true;
            }
            if state.summary != *summary {
                state.summary = summary.clone();
                modified = true;
            }
            modified
        });
    }

    fn send(&self, event: ViewEvent) {
        // An error only means there are no subscribers right now.
        let _ = self.view_events.send(event);
    }
}
