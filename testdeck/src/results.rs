// Copyright (c) The testdeck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test case results and the assembly they belong to.

use camino::{Utf8Path, Utf8PathBuf};
use smol_str::SmolStr;
use std::{fmt, time::Duration};

/// The identity of a test case: its assembly-qualified name.
///
/// Identities are unique within a [`ResultStore`](crate::store::ResultStore) and stable across
/// filter and run cycles.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TestCaseId(SmolStr);

impl TestCaseId {
    /// Creates a new identity.
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(SmolStr::new(id))
    }

    /// Returns the identity as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestCaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TestCaseId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// The state of a single test case.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
pub enum TestState {
    /// The test has not run, or was reset at the start of a run.
    #[default]
    NotRun,

    /// The test passed.
    Passed,

    /// The test failed.
    Failed,

    /// The test was skipped.
    Skipped,
}

impl TestState {
    /// Returns true if this is a terminal state for a run.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::NotRun)
    }
}

impl fmt::Display for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRun => write!(f, "NotRun"),
            Self::Passed => write!(f, "Passed"),
            Self::Failed => write!(f, "Failed"),
            Self::Skipped => write!(f, "Skipped"),
        }
    }
}

/// Details about why a test failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureDetail {
    /// The failure message.
    pub message: String,

    /// The stack trace, if the executor captured one.
    pub stack_trace: Option<String>,
}

impl FailureDetail {
    /// Creates a failure with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack_trace: None,
        }
    }

    /// Attaches a stack trace.
    pub fn with_stack_trace(mut self, stack_trace: impl Into<String>) -> Self {
        self.stack_trace = Some(stack_trace.into());
        self
    }
}

/// The terminal outcome of a single test, as reported by a
/// [`TestExecutor`](crate::runner::TestExecutor).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestOutcome {
    /// The test this outcome is for.
    pub id: TestCaseId,

    /// What happened.
    pub kind: TestOutcomeKind,

    /// How long the test took, if known.
    pub duration: Option<Duration>,
}

impl TestOutcome {
    /// A passing outcome.
    pub fn passed(id: impl Into<TestCaseId>) -> Self {
        Self {
            id: id.into(),
            kind: TestOutcomeKind::Passed,
            duration: None,
        }
    }

    /// A failing outcome.
    pub fn failed(id: impl Into<TestCaseId>, detail: FailureDetail) -> Self {
        Self {
            id: id.into(),
            kind: TestOutcomeKind::Failed(detail),
            duration: None,
        }
    }

    /// A skipped outcome.
    pub fn skipped(id: impl Into<TestCaseId>, reason: Option<String>) -> Self {
        Self {
            id: id.into(),
            kind: TestOutcomeKind::Skipped { reason },
            duration: None,
        }
    }

    /// Sets the duration.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }
}

/// The kind of a [`TestOutcome`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TestOutcomeKind {
    /// The test passed.
    Passed,

    /// The test failed.
    Failed(FailureDetail),

    /// The test was skipped, optionally with a reason.
    Skipped {
        /// The reason given for skipping, if any.
        reason: Option<String>,
    },
}

impl TestOutcomeKind {
    /// Returns the state this outcome moves a test into.
    pub fn state(&self) -> TestState {
        match self {
            Self::Passed => TestState::Passed,
            Self::Failed(_) => TestState::Failed,
            Self::Skipped { .. } => TestState::Skipped,
        }
    }
}

/// The current result of a test case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestCaseResult {
    id: TestCaseId,
    display_name: String,
    state: TestState,
    failure: Option<FailureDetail>,
    skip_reason: Option<String>,
    duration: Option<Duration>,
    // Insertion order within the store, used to keep sorting stable for equal names.
    pub(crate) ordinal: u64,
}

impl TestCaseResult {
    /// Creates a new result in the [`TestState::NotRun`] state.
    pub fn new(id: impl Into<TestCaseId>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            state: TestState::NotRun,
            failure: None,
            skip_reason: None,
            duration: None,
            ordinal: 0,
        }
    }

    /// Returns the identity of this test case.
    pub fn id(&self) -> &TestCaseId {
        &self.id
    }

    /// Returns the name shown to users.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Returns the current state.
    pub fn state(&self) -> TestState {
        self.state
    }

    /// Returns failure details, if the test failed.
    pub fn failure(&self) -> Option<&FailureDetail> {
        self.failure.as_ref()
    }

    /// Returns the skip reason, if the test was skipped with one.
    pub fn skip_reason(&self) -> Option<&str> {
        self.skip_reason.as_deref()
    }

    /// Returns how long the test took, if known.
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub(crate) fn reset(&mut self) {
        self.state = TestState::NotRun;
        self.failure = None;
        self.skip_reason = None;
        self.duration = None;
    }

    pub(crate) fn apply(&mut self, outcome: TestOutcome) {
        self.state = outcome.kind.state();
        self.duration = outcome.duration;
        match outcome.kind {
            TestOutcomeKind::Passed => {}
            TestOutcomeKind::Failed(detail) => self.failure = Some(detail),
            TestOutcomeKind::Skipped { reason } => self.skip_reason = reason,
        }
    }
}

/// The test assembly a dashboard is showing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssemblyInfo {
    path: Utf8PathBuf,
}

impl AssemblyInfo {
    /// Creates a new `AssemblyInfo` for the assembly at `path`.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Returns the path to the assembly.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Returns the name shown to users: the file name without its extension.
    pub fn display_name(&self) -> &str {
        self.path.file_stem().unwrap_or(self.path.as_str())
    }
}
