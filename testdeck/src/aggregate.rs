// Copyright (c) The testdeck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Rollup counters and the summary caption for an assembly.
//!
//! The main types here are [`TestCounts`] (a tally per [`TestState`]) and [`AggregateSummary`]
//! (the counts plus the derived [`RunStatus`] and caption). [`Aggregator`] remembers the last
//! summary so callers can tell whether a recompute changed anything.

use crate::{
    results::{TestCaseResult, TestState},
    store::StoreSnapshot,
};
use std::fmt;

/// The caption shown when the assembly contains no tests.
pub const NO_TESTS_CAPTION: &str = "no test was found inside this assembly";

const PASSED_GLYPH: &str = "✔";
const FAILED_GLYPH: &str = "⛔";
const SKIPPED_GLYPH: &str = "⚠";
const NOT_RUN_GLYPH: &str = "🔷";

/// A tally of test cases per [`TestState`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TestCounts {
    /// The number of passed tests.
    pub passed: usize,

    /// The number of failed tests.
    pub failed: usize,

    /// The number of skipped tests.
    pub skipped: usize,

    /// The number of tests that have not run.
    pub not_run: usize,
}

impl TestCounts {
    /// Tallies the states of `results`.
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a TestCaseResult>) -> Self {
        let mut counts = Self::default();
        for result in results {
            counts.add(result.state());
        }
        counts
    }

    /// Returns the total number of tests counted.
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.not_run
    }

    /// Returns the count for `state`.
    pub fn get(&self, state: TestState) -> usize {
        match state {
            TestState::NotRun => self.not_run,
            TestState::Passed => self.passed,
            TestState::Failed => self.failed,
            TestState::Skipped => self.skipped,
        }
    }

    pub(crate) fn add(&mut self, state: TestState) {
        *self.slot(state) += 1;
    }

    pub(crate) fn remove(&mut self, state: TestState) {
        let slot = self.slot(state);
        debug_assert!(*slot > 0, "removing {state} from an empty tally");
        *slot = slot.saturating_sub(1);
    }

    pub(crate) fn transition(&mut self, before: TestState, after: TestState) {
        if before != after {
            self.remove(before);
            self.add(after);
        }
    }

    fn slot(&mut self, state: TestState) -> &mut usize {
        match state {
            TestState::NotRun => &mut self.not_run,
            TestState::Passed => &mut self.passed,
            TestState::Failed => &mut self.failed,
            TestState::Skipped => &mut self.skipped,
        }
    }
}

/// The overall health of an assembly, derived from its [`TestCounts`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunStatus {
    /// The assembly contains no tests.
    NoTests,

    /// Nothing has run, or only not-run tests remain to decide the status.
    NotRun,

    /// No test failed and at least one passed, or everything ran without failures.
    Ok,

    /// At least one test failed.
    Failed,

    /// Some tests were skipped, none failed and none passed.
    Skipped,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTests => write!(f, "NoTests"),
            Self::NotRun => write!(f, "NotRun"),
            Self::Ok => write!(f, "Ok"),
            Self::Failed => write!(f, "Failed"),
            Self::Skipped => write!(f, "Skipped"),
        }
    }
}

/// Counters, status and caption for an assembly.
///
/// This is always a pure function of the result store's contents; it is never stored as an
/// authoritative value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateSummary {
    /// Per-state counts.
    pub counts: TestCounts,

    /// The derived run status.
    pub status: RunStatus,

    /// The overall result of the assembly, as a single test state.
    pub result: TestState,

    /// The human-readable caption.
    pub caption: String,
}

impl AggregateSummary {
    /// Derives the summary for a set of results.
    pub fn from_results<'a>(results: impl IntoIterator<Item = &'a TestCaseResult>) -> Self {
        Self::from_counts(TestCounts::from_results(results))
    }

    /// Derives the summary from counts.
    ///
    /// Failure takes priority over passed, passed over skipped, and skipped over not run: a
    /// single failing test always decides the status.
    pub fn from_counts(counts: TestCounts) -> Self {
        let TestCounts {
            passed,
            failed,
            skipped,
            not_run,
        } = counts;
        let total = counts.total();

        if total == 0 {
            return Self {
                counts,
                status: RunStatus::NoTests,
                result: TestState::NotRun,
                caption: NO_TESTS_CAPTION.to_owned(),
            };
        }

        let prefix = if not_run == 0 { "Complete - " } else { "" };

        if failed == 0 && not_run == 0 {
            // Everything ran and nothing failed.
            Self {
                counts,
                status: RunStatus::Ok,
                result: TestState::Passed,
                caption: format!("{prefix}{PASSED_GLYPH} {passed}"),
            }
        } else if failed > 0 || not_run < total {
            let caption = format!(
                "{prefix}{PASSED_GLYPH} {passed}, {FAILED_GLYPH} {failed}, \
                 {SKIPPED_GLYPH} {skipped}, {NOT_RUN_GLYPH} {not_run}"
            );
            let (status, result) = if failed > 0 {
                (RunStatus::Failed, TestState::Failed)
            } else if passed > 0 {
                (RunStatus::Ok, TestState::Passed)
            } else if skipped > 0 {
                (RunStatus::Skipped, TestState::Skipped)
            } else {
                (RunStatus::NotRun, TestState::NotRun)
            };
            Self {
                counts,
                status,
                result,
                caption,
            }
        } else {
            // Nothing has run yet.
            Self {
                counts,
                status: RunStatus::NotRun,
                result: TestState::NotRun,
                caption: format!("{NOT_RUN_GLYPH} {total}, {}", TestState::NotRun),
            }
        }
    }

    /// Returns the total number of tests.
    pub fn total(&self) -> usize {
        self.counts.total()
    }
}

impl Default for AggregateSummary {
    fn default() -> Self {
        Self::from_counts(TestCounts::default())
    }
}

/// Tracks the latest [`AggregateSummary`] and reports changes.
#[derive(Clone, Debug, Default)]
pub struct Aggregator {
    current: AggregateSummary,
}

impl Aggregator {
    /// Creates a new aggregator for an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the latest summary.
    pub fn current(&self) -> &AggregateSummary {
        &self.current
    }

    /// Recomputes the summary from a store snapshot.
    ///
    /// Returns the new summary if it differs from the previous one.
    pub fn recompute(&mut self, snapshot: &StoreSnapshot) -> Option<&AggregateSummary> {
        self.observe(TestCounts::from_results(snapshot.results()))
    }

    /// Updates the summary from counts already tallied by the store.
    ///
    /// Returns the new summary if it differs from the previous one.
    pub fn observe(&mut self, counts: TestCounts) -> Option<&AggregateSummary> {
        if counts == self.current.counts {
            return None;
        }
        self.current = AggregateSummary::from_counts(counts);
        Some(&self.current)
    }
}
