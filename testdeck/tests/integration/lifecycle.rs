// Copyright (c) The testdeck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::fixtures::*;
use camino_tempfile::Utf8TempDir;
use indoc::indoc;
use pretty_assertions::assert_eq;
use std::time::Duration;
use testdeck::{
    aggregate::RunStatus,
    config::DashboardConfig,
    dashboard::{Dashboard, ViewState},
    errors::{DisplayErrorChain, RunError},
    filter::{FilterCriteria, StatusFilter},
    results::{AssemblyInfo, TestState},
    runner::RunEvent,
};
use tokio::sync::broadcast;

async fn load(executor: FixtureExecutor) -> Dashboard<FixtureExecutor> {
    load_with_config(executor, &DashboardConfig::default()).await
}

async fn load_with_config(
    executor: FixtureExecutor,
    config: &DashboardConfig,
) -> Dashboard<FixtureExecutor> {
    test_init();
    Dashboard::load(
        AssemblyInfo::new(CALC_ASSEMBLY),
        &FixtureDiscovery::Tests(CALC_TESTS),
        executor,
        config,
    )
    .await
    .expect("fixture discovery succeeds")
}

fn visible_names(state: &ViewState) -> Vec<&str> {
    state
        .visible()
        .iter()
        .map(|result| result.display_name())
        .collect()
}

fn drain(events: &mut broadcast::Receiver<RunEvent>) -> Vec<RunEvent> {
    std::iter::from_fn(|| events.try_recv().ok()).collect()
}

#[tokio::test]
async fn load_discovers_tests() {
    let dashboard = load(FixtureExecutor::new(CALC_TESTS)).await;

    assert_eq!(dashboard.display_name(), "Calc.Tests");
    assert_eq!(dashboard.assembly().path().as_str(), CALC_ASSEMBLY);
    assert_eq!(dashboard.store().len(), CALC_TESTS.len());
    assert!(dashboard.can_run());

    let state = dashboard.state();
    assert_eq!(state.caption(), "🔷 5, NotRun");
    assert_eq!(state.summary().status, RunStatus::NotRun);
    // Sorted case-insensitively by display name.
    assert_eq!(
        visible_names(&state),
        ["Add", "add_overflow", "DivideByZero", "Sqrt", "Subtract"]
    );

    dashboard.shutdown().await;
}

#[tokio::test]
async fn discovery_failure_is_reported() {
    test_init();
    let error = Dashboard::load(
        AssemblyInfo::new("bin/Debug/Missing.Tests.dll"),
        &FixtureDiscovery::Broken,
        FixtureExecutor::default(),
        &DashboardConfig::default(),
    )
    .await
    .unwrap_err();

    assert_eq!(
        DisplayErrorChain::new(&error).to_string(),
        "failed to discover tests in `bin/Debug/Missing.Tests.dll`\n  \
         caused by:\n  - assembly is not a valid test container",
    );
}

#[tokio::test]
async fn run_all_then_rerun_failures() {
    let dashboard = load(FixtureExecutor::new(CALC_TESTS)).await;
    let requests = dashboard.coordinator().executor().requests();

    let stats = dashboard.run_all().await.unwrap();
    assert_eq!(stats.passed, 2);
    assert_eq!(stats.failed, 2);
    assert_eq!(stats.skipped, 1);

    let state = dashboard.settled().await.unwrap();
    assert_eq!(state.caption(), "Complete - ✔ 2, ⛔ 2, ⚠ 1, 🔷 0");
    assert_eq!(state.summary().result, TestState::Failed);

    dashboard
        .apply_filter_now(FilterCriteria::new(StatusFilter::Failed, ""))
        .await
        .unwrap();
    assert_eq!(
        visible_names(&dashboard.state()),
        ["add_overflow", "DivideByZero"]
    );

    let stats = dashboard.run_filtered().await.unwrap();
    assert_eq!(stats.initial_run_count, 2);
    assert_eq!(
        *requests.lock().unwrap(),
        [
            vec!["Subtract", "add_overflow", "Add", "DivideByZero", "Sqrt"],
            vec!["add_overflow", "DivideByZero"],
        ]
    );

    let failure = dashboard
        .store()
        .get(&fixture_id("DivideByZero"))
        .unwrap()
        .failure()
        .cloned()
        .unwrap();
    assert_eq!(failure.message, "Assert.AreEqual failed");

    dashboard.shutdown().await;
}

#[tokio::test]
async fn run_requests_while_busy_are_rejected() {
    let (executor, gate) = FixtureExecutor::new(CALC_TESTS).with_gate();
    let requests = executor.requests();
    let dashboard = load(executor).await;
    let mut events = dashboard.subscribe_run_events();

    let (first, second) = tokio::join!(dashboard.run_all(), async {
        // The first future acquired the gate when it was polled.
        assert!(!dashboard.can_run());
        let rejected = dashboard.run_one(&fixture_id("Add")).await;
        gate.notify_one();
        rejected
    });

    assert_eq!(first.unwrap().finished_count, 5);
    assert!(matches!(second, Err(RunError::AlreadyInProgress)));
    assert!(dashboard.can_run());
    assert_eq!(requests.lock().unwrap().len(), 1);

    let events = drain(&mut events);
    assert!(events.contains(&RunEvent::RunRejected {
        kind: testdeck::runner::RunKind::Single
    }));
    let busy: Vec<_> = events
        .iter()
        .filter_map(|event| match event {
            RunEvent::BusyChanged(busy) => Some(*busy),
            _ => None,
        })
        .collect();
    assert_eq!(busy, [true, false]);

    dashboard.shutdown().await;
}

#[tokio::test]
async fn executor_failure_leaves_remaining_tests_not_run() {
    let executor = FixtureExecutor::new(CALC_TESTS).with_failure_after(2);
    let dashboard = load(executor).await;

    let error = dashboard.run_all().await.unwrap_err();
    let RunError::RunnerFailure { stats, .. } = &error else {
        panic!("expected runner failure, found {error:?}");
    };
    assert_eq!(stats.finished_count, 2);
    assert_eq!(stats.not_run(), 3);
    assert!(dashboard.can_run());

    let state = dashboard.settled().await.unwrap();
    assert_eq!(state.caption(), "✔ 1, ⛔ 1, ⚠ 0, 🔷 3");
    assert_eq!(state.summary().status, RunStatus::Failed);

    dashboard.shutdown().await;
}

#[tokio::test]
async fn silent_tests_stay_not_run() {
    static TESTS: &[TestFixture] = &[
        TestFixture {
            name: "Add",
            status: FixtureStatus::Pass,
        },
        TestFixture {
            name: "Hangs",
            status: FixtureStatus::Silent,
        },
    ];
    test_init();
    let dashboard = Dashboard::load(
        AssemblyInfo::new(CALC_ASSEMBLY),
        &FixtureDiscovery::Tests(TESTS),
        FixtureExecutor::new(TESTS),
        &DashboardConfig::default(),
    )
    .await
    .unwrap();

    let stats = dashboard.run_all().await.unwrap();
    assert_eq!(stats.not_run(), 1);
    assert!(!stats.is_success());

    let state = dashboard.settled().await.unwrap();
    assert_eq!(state.caption(), "✔ 1, ⛔ 0, ⚠ 0, 🔷 1");
    assert_eq!(state.summary().status, RunStatus::Ok);

    dashboard.shutdown().await;
}

#[tokio::test]
async fn run_one_selects_the_result() {
    let dashboard = load(FixtureExecutor::new(CALC_TESTS)).await;
    let mut events = dashboard.subscribe_run_events();

    let result = dashboard.run_one(&fixture_id("Sqrt")).await.unwrap();
    assert_eq!(result.state(), TestState::Skipped);
    assert_eq!(result.skip_reason(), Some("requires hardware FPU"));

    let selected: Vec<_> = drain(&mut events)
        .into_iter()
        .filter(|event| matches!(event, RunEvent::ResultSelected(_)))
        .collect();
    assert_eq!(selected, [RunEvent::ResultSelected(result)]);

    let state = dashboard.settled().await.unwrap();
    assert_eq!(state.caption(), "✔ 0, ⛔ 0, ⚠ 1, 🔷 4");
    assert_eq!(state.summary().status, RunStatus::Skipped);

    dashboard.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn debounce_period_comes_from_config() {
    let dir = Utf8TempDir::new().unwrap();
    let path = dir.path().join("testdeck.toml");
    std::fs::write(
        &path,
        indoc! {r#"
            [filter]
            debounce = "100ms"

            [diagnostics]
            show = true
        "#},
    )
    .unwrap();
    let config = DashboardConfig::from_path(&path).unwrap();
    let dashboard = load_with_config(FixtureExecutor::new(CALC_TESTS), &config).await;

    dashboard.set_filter_str("All", "DIV").unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(visible_names(&dashboard.state()), ["DivideByZero"]);

    let mut events = dashboard.subscribe_run_events();
    dashboard.run_filtered().await.unwrap();
    let diagnostics: Vec<_> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            RunEvent::Diagnostic { message, .. } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(diagnostics, ["Calc.Tests: running 1 tests"]);

    dashboard.shutdown().await;
}
