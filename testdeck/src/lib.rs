// Copyright (c) The testdeck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Live state for a test-run dashboard.
//!
//! testdeck keeps the results of one test assembly in a [`ResultStore`](store::ResultStore),
//! derives summary counters and a caption from it, maintains a filtered and sorted view that
//! follows store changes, and serializes test runs against an external
//! [`TestExecutor`](runner::TestExecutor).
//!
//! The entry point for most users is [`Dashboard`](dashboard::Dashboard), which ties these
//! pieces together behind a single background view task.

pub mod aggregate;
pub mod config;
pub mod dashboard;
pub mod debounce;
pub mod errors;
pub mod filter;
pub mod results;
pub mod runner;
pub mod store;
