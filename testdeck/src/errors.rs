// Copyright (c) The testdeck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced by testdeck.

use crate::{
    filter::StatusFilter,
    results::{TestCaseId, TestState},
    runner::RunStats,
};
use camino::Utf8PathBuf;
use std::{error::Error as StdError, fmt};
use thiserror::Error;

/// An error that occurs while parsing a [`StatusFilter`] value from a string.
///
/// This is the only way an unrecognized status filter can reach the engine: the
/// filter application is rejected and the current criteria stay in effect.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error(
    "unrecognized value for status filter: {input}\n(known values: {})",
    StatusFilter::variants().join(", "),
)]
pub struct InvalidFilterState {
    input: String,
}

impl InvalidFilterState {
    pub(crate) fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
        }
    }

    /// Returns the input that failed to parse.
    pub fn input(&self) -> &str {
        &self.input
    }
}

/// An error returned by [`ResultStore`](crate::store::ResultStore) mutations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreError {
    /// A result with this identity is already present.
    #[error("test case `{0}` is already present in the result store")]
    DuplicateTestCase(TestCaseId),
}

/// An outcome reported by a test executor that could not be applied.
///
/// These are logged and counted, never fatal to the run.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum OutcomeError {
    /// The test case is not present in the result store.
    #[error("test case `{0}` is not present in the result store")]
    UnknownTestCase(TestCaseId),

    /// The test case was not part of the run request.
    #[error("test case `{0}` was not requested in this run")]
    NotRequested(TestCaseId),

    /// The test case already reached a terminal state in this run.
    #[error("test case `{id}` already finished in this run (state: {state})")]
    AlreadyFinished {
        /// The identity of the test case.
        id: TestCaseId,

        /// The state the test case is already in.
        state: TestState,
    },

    /// The run this outcome belongs to has already completed.
    #[error("outcome for test case `{0}` arrived after the run completed")]
    RunFinished(TestCaseId),
}

/// An error returned by a [`TestDiscovery`](crate::runner::TestDiscovery) implementation.
#[derive(Debug, Error)]
#[error("failed to discover tests in `{assembly}`")]
pub struct DiscoveryError {
    assembly: Utf8PathBuf,
    #[source]
    source: Box<dyn StdError + Send + Sync>,
}

impl DiscoveryError {
    /// Creates a new `DiscoveryError`.
    pub fn new(
        assembly: impl Into<Utf8PathBuf>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            assembly: assembly.into(),
            source: source.into(),
        }
    }
}

/// An infrastructure failure reported by a [`TestExecutor`](crate::runner::TestExecutor).
///
/// This is distinct from a test failing, which is a normal outcome.
#[derive(Debug, Error)]
#[error("test executor failed: {message}")]
pub struct ExecutorError {
    message: String,
    #[source]
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl ExecutorError {
    /// Creates a new `ExecutorError` with a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new `ExecutorError` with a message and an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns the message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// An error returned by the run commands on
/// [`RunCoordinator`](crate::runner::RunCoordinator) and
/// [`Dashboard`](crate::dashboard::Dashboard).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RunError {
    /// Another run is in flight. The request was not started.
    #[error("a test run is already in progress")]
    AlreadyInProgress,

    /// The requested test case is not present in the result store.
    #[error("test case `{0}` is not present in the result store")]
    UnknownTestCase(TestCaseId),

    /// The test executor failed outright.
    ///
    /// Tests that did not report an outcome before the failure remain not run.
    #[error("test run failed after {} of {} tests finished", .stats.finished_count, .stats.initial_run_count)]
    RunnerFailure {
        /// Statistics for the portion of the run that completed.
        stats: RunStats,

        /// The underlying executor error.
        #[source]
        source: ExecutorError,
    },
}

/// An error returned by the filter commands on [`Dashboard`](crate::dashboard::Dashboard).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum ViewError {
    /// The status filter could not be parsed. The current criteria stay in effect.
    #[error(transparent)]
    InvalidFilterState(#[from] InvalidFilterState),

    /// The view task is no longer running.
    #[error("the dashboard view task has stopped")]
    Closed,
}

/// An error that occurred while loading a [`DashboardConfig`](crate::config::DashboardConfig).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config at `{path}`")]
    Read {
        /// The path to the config file.
        path: Utf8PathBuf,

        /// The underlying I/O error.
        #[source]
        error: std::io::Error,
    },

    /// The config file could not be parsed.
    #[error("failed to parse config at `{path}`")]
    Parse {
        /// The path to the config file.
        path: Utf8PathBuf,

        /// The underlying TOML error.
        #[source]
        error: toml::de::Error,
    },
}

/// Displays an error along with its chain of sources, one per line.
pub struct DisplayErrorChain<E>(E);

impl<E: StdError> DisplayErrorChain<E> {
    /// Wraps an error for display.
    pub fn new(error: E) -> Self {
        Self(error)
    }
}

impl<E: StdError> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)?;

        let mut source = self.0.source();
        while let Some(error) = source {
            write!(f, "\n  caused by:\n  - {error}")?;
            source = error.source();
        }

        Ok(())
    }
}
