// Copyright (c) The testdeck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests for the dashboard against fixture discovery and execution.

mod fixtures;
mod lifecycle;
