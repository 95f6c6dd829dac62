// Copyright (c) The testdeck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Once},
};
use testdeck::{
    errors::{DiscoveryError, ExecutorError},
    results::{AssemblyInfo, FailureDetail, TestCaseId, TestCaseResult, TestOutcome},
    runner::{OutcomeReporter, RunRequest, TestDiscovery, TestExecutor},
};
use tokio::sync::Notify;

pub(crate) const CALC_ASSEMBLY: &str = "bin/Debug/Calc.Tests.dll";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum FixtureStatus {
    Pass,
    Fail,
    Skip,
    /// The executor never reports an outcome.
    Silent,
}

#[derive(Copy, Clone, Debug)]
pub(crate) struct TestFixture {
    pub(crate) name: &'static str,
    pub(crate) status: FixtureStatus,
}

impl TestFixture {
    pub(crate) fn id(&self) -> TestCaseId {
        fixture_id(self.name)
    }
}

pub(crate) fn fixture_id(name: &str) -> TestCaseId {
    TestCaseId::new(format!("Calc.Tests.{name}"))
}

pub(crate) static CALC_TESTS: &[TestFixture] = &[
    TestFixture {
        name: "Subtract",
        status: FixtureStatus::Pass,
    },
    TestFixture {
        name: "add_overflow",
        status: FixtureStatus::Fail,
    },
    TestFixture {
        name: "Add",
        status: FixtureStatus::Pass,
    },
    TestFixture {
        name: "DivideByZero",
        status: FixtureStatus::Fail,
    },
    TestFixture {
        name: "Sqrt",
        status: FixtureStatus::Skip,
    },
];

pub(crate) fn test_init() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        // Another test binary may have installed a subscriber already.
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init();
    });
}

pub(crate) enum FixtureDiscovery {
    Tests(&'static [TestFixture]),
    Broken,
}

impl TestDiscovery for FixtureDiscovery {
    async fn discover(
        &self,
        assembly: &AssemblyInfo,
    ) -> Result<Vec<TestCaseResult>, DiscoveryError> {
        match self {
            Self::Tests(tests) => Ok(tests
                .iter()
                .map(|test| TestCaseResult::new(test.id(), test.name))
                .collect()),
            Self::Broken => Err(DiscoveryError::new(
                assembly.path(),
                "assembly is not a valid test container",
            )),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub(crate) struct FixtureExecutor {
    statuses: HashMap<TestCaseId, FixtureStatus>,
    requests: Arc<Mutex<Vec<Vec<String>>>>,
    gate: Option<Arc<Notify>>,
    fail_after: Option<usize>,
}

impl FixtureExecutor {
    pub(crate) fn new(tests: &[TestFixture]) -> Self {
        Self {
            statuses: tests.iter().map(|test| (test.id(), test.status)).collect(),
            ..Self::default()
        }
    }

    /// Waits for the returned handle to be notified before running anything.
    pub(crate) fn with_gate(mut self) -> (Self, Arc<Notify>) {
        let gate = Arc::new(Notify::new());
        self.gate = Some(gate.clone());
        (self, gate)
    }

    /// Fails the run after reporting `count` outcomes.
    pub(crate) fn with_failure_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Returns the display names requested by each run so far.
    pub(crate) fn requests(&self) -> Arc<Mutex<Vec<Vec<String>>>> {
        self.requests.clone()
    }
}

impl TestExecutor for FixtureExecutor {
    async fn execute(
        &self,
        request: RunRequest,
        reporter: OutcomeReporter,
    ) -> Result<(), ExecutorError> {
        self.requests.lock().unwrap().push(
            request
                .iter()
                .map(|id| id.as_str().trim_start_matches("Calc.Tests.").to_owned())
                .collect(),
        );
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        reporter.diagnostic(format!("running {} tests", request.len()));
        for (index, id) in request.iter().enumerate() {
            if self.fail_after == Some(index) {
                return Err(ExecutorError::with_source(
                    "test host exited unexpectedly",
                    std::io::Error::other("exit code 0xE0434352"),
                ));
            }

            let outcome = match self.statuses.get(id).copied() {
                Some(FixtureStatus::Pass) => TestOutcome::passed(id.clone()),
                Some(FixtureStatus::Fail) => TestOutcome::failed(
                    id.clone(),
                    FailureDetail::new("Assert.AreEqual failed")
                        .with_stack_trace("at Calc.Tests.Run() in CalcTests.cs:line 42"),
                ),
                Some(FixtureStatus::Skip) => {
                    TestOutcome::skipped(id.clone(), Some("requires hardware FPU".to_owned()))
                }
                Some(FixtureStatus::Silent) | None => continue,
            };
            // Outcomes the coordinator refuses are logged on its side.
            let _ = reporter.report(outcome);
            tokio::task::yield_now().await;
        }
        Ok(())
    }
}
