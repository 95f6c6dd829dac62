// Copyright (c) The testdeck Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Filtering results by status and free-text query.
//!
//! [`FilterCriteria`] is the predicate; [`FilterView`] is the sorted projection of the
//! [`ResultStore`](crate::store::ResultStore) that it selects, kept in sync from store events.

use crate::{
    errors::InvalidFilterState,
    results::{TestCaseId, TestCaseResult, TestState},
    store::{StoreEvent, StoreEventKind, StoreSnapshot},
};
use std::{fmt, str::FromStr};

/// Which states a [`FilterCriteria`] lets through.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(test, derive(test_strategy::Arbitrary))]
pub enum StatusFilter {
    /// All states.
    #[default]
    All,

    /// Only passed tests.
    Passed,

    /// Only failed tests.
    Failed,

    /// Only skipped tests.
    Skipped,

    /// Only tests that have not run.
    NotRun,
}

impl StatusFilter {
    /// Returns the string representations of all variants, in order.
    pub fn variants() -> &'static [&'static str] {
        &["all", "passed", "failed", "skipped", "not-run"]
    }

    /// Returns the single state this filter requires, or `None` for [`StatusFilter::All`].
    pub fn required_state(self) -> Option<TestState> {
        match self {
            Self::All => None,
            Self::Passed => Some(TestState::Passed),
            Self::Failed => Some(TestState::Failed),
            Self::Skipped => Some(TestState::Skipped),
            Self::NotRun => Some(TestState::NotRun),
        }
    }

    fn to_static_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Passed => "passed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::NotRun => "not-run",
        }
    }
}

impl fmt::Display for StatusFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.to_static_str())
    }
}

impl FromStr for StatusFilter {
    type Err = InvalidFilterState;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let filter = match s.trim().to_ascii_lowercase().as_str() {
            "all" => Self::All,
            "passed" => Self::Passed,
            "failed" => Self::Failed,
            "skipped" => Self::Skipped,
            "not-run" | "notrun" => Self::NotRun,
            _ => return Err(InvalidFilterState::new(s)),
        };
        Ok(filter)
    }
}

/// A status filter plus a free-text query.
///
/// Criteria are replaced wholesale on every edit, never mutated in place.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct FilterCriteria {
    status: StatusFilter,
    query: String,
    // The trimmed query, case-folded once.
    folded_query: String,
}

impl FilterCriteria {
    /// Creates new criteria.
    pub fn new(status: StatusFilter, query: impl Into<String>) -> Self {
        let query = query.into();
        let folded_query = fold_case(query.trim());
        Self {
            status,
            query,
            folded_query,
        }
    }

    /// Creates new criteria from a status string, as received from a presentation layer.
    pub fn parse(status: &str, query: impl Into<String>) -> Result<Self, InvalidFilterState> {
        Ok(Self::new(status.parse()?, query))
    }

    /// Returns the status filter.
    pub fn status(&self) -> StatusFilter {
        self.status
    }

    /// Returns the query as entered.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Returns true if `result` passes these criteria.
    ///
    /// The query is trimmed and matched as a case-insensitive substring of the display name.
    /// With a non-empty query the display name is case-folded on every call; [`FilterView`]
    /// folds each name once and reuses it.
    pub fn matches(&self, result: &TestCaseResult) -> bool {
        self.status_matches(result.state())
            && (self.folded_query.is_empty()
                || fold_case(result.display_name()).contains(&self.folded_query))
    }

    fn matches_folded(&self, state: TestState, folded_name: &str) -> bool {
        self.status_matches(state)
            && (self.folded_query.is_empty() || folded_name.contains(&self.folded_query))
    }

    fn status_matches(&self, state: TestState) -> bool {
        self.status
            .required_state()
            .is_none_or(|required| required == state)
    }
}

fn fold_case(s: &str) -> String {
    s.to_lowercase()
}

/// A change to a [`FilterView`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FilterViewEvent {
    /// A result became visible at `index`.
    Inserted {
        /// The position of the result in the view.
        index: usize,

        /// The result.
        result: TestCaseResult,
    },

    /// A result at `index` stopped being visible.
    Removed {
        /// The former position of the result in the view.
        index: usize,

        /// The result.
        result: TestCaseResult,
    },

    /// A visible result at `index` changed without moving.
    Updated {
        /// The position of the result in the view.
        index: usize,

        /// The result after the change.
        result: TestCaseResult,
    },

    /// The view was rebuilt from scratch.
    Reset {
        /// The number of visible results after the rebuild.
        len: usize,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct SortKey {
    folded_name: String,
    ordinal: u64,
}

impl SortKey {
    fn new(result: &TestCaseResult) -> Self {
        Self {
            folded_name: fold_case(result.display_name()),
            ordinal: result.ordinal,
        }
    }
}

#[derive(Clone, Debug)]
struct VisibleResult {
    key: SortKey,
    result: TestCaseResult,
}

/// The results matching the current [`FilterCriteria`], sorted by display name.
///
/// Names are compared case-insensitively; ties keep store insertion order. The view is updated
/// incrementally from [`StoreEvent`]s and rebuilt only when the criteria change or the event
/// stream has gaps.
#[derive(Clone, Debug)]
pub struct FilterView {
    criteria: FilterCriteria,
    items: Vec<VisibleResult>,
    generation: u64,
}

impl FilterView {
    /// Builds a view of `snapshot` for `criteria`.
    pub fn new(criteria: FilterCriteria, snapshot: &StoreSnapshot) -> Self {
        let mut view = Self {
            criteria,
            items: Vec::new(),
            generation: 0,
        };
        view.rebuild(snapshot);
        view
    }

    /// Returns the current criteria.
    pub fn criteria(&self) -> &FilterCriteria {
        &self.criteria
    }

    /// Returns the store generation the view reflects.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the number of visible results.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing is visible.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the visible results in order.
    pub fn results(&self) -> impl ExactSizeIterator<Item = &TestCaseResult> + '_ {
        self.items.iter().map(|item| &item.result)
    }

    /// Returns the identities of the visible results in order.
    pub fn ids(&self) -> impl ExactSizeIterator<Item = &TestCaseId> + '_ {
        self.results().map(|result| result.id())
    }

    /// Returns the position of `id` in the view, if visible.
    pub fn position(&self, id: &TestCaseId) -> Option<usize> {
        self.items.iter().position(|item| item.result.id() == id)
    }

    /// Replaces the criteria and rebuilds the view from `snapshot`.
    ///
    /// Returns `None` without touching the view if `criteria` equals the current criteria.
    pub fn set_criteria(
        &mut self,
        criteria: FilterCriteria,
        snapshot: &StoreSnapshot,
    ) -> Option<FilterViewEvent> {
        if criteria == self.criteria {
            return None;
        }
        self.criteria = criteria;
        Some(self.rebuild(snapshot))
    }

    /// Rebuilds the view from `snapshot`, discarding any incremental state.
    pub fn resync(&mut self, snapshot: &StoreSnapshot) -> FilterViewEvent {
        self.rebuild(snapshot)
    }

    /// Applies a store change.
    ///
    /// Events at or below the generation the view already reflects are ignored.
    pub fn apply(&mut self, event: &StoreEvent) -> Option<FilterViewEvent> {
        if event.generation <= self.generation {
            return None;
        }
        self.generation = event.generation;

        match &event.kind {
            StoreEventKind::Added(result) => self.insert(result),
            StoreEventKind::Removed(result) => self.remove(result),
            StoreEventKind::Updated { before, after } => {
                let key = SortKey::new(before);
                let visible = self.criteria.matches_folded(after.state(), &key.folded_name);
                match (self.find(&key), visible) {
                    (Ok(index), true) => {
                        self.items[index].result = after.clone();
                        Some(FilterViewEvent::Updated {
                            index,
                            result: after.clone(),
                        })
                    }
                    (Ok(index), false) => {
                        let item = self.items.remove(index);
                        Some(FilterViewEvent::Removed {
                            index,
                            result: item.result,
                        })
                    }
                    (Err(_), true) => self.insert(after),
                    (Err(_), false) => None,
                }
            }
        }
    }

    fn insert(&mut self, result: &TestCaseResult) -> Option<FilterViewEvent> {
        let key = SortKey::new(result);
        if !self.criteria.matches_folded(result.state(), &key.folded_name) {
            return None;
        }
        let index = match self.find(&key) {
            Ok(index) => {
                // Already visible: can only happen if the same addition is replayed.
                self.items[index].result = result.clone();
                return Some(FilterViewEvent::Updated {
                    index,
                    result: result.clone(),
                });
            }
            Err(index) => index,
        };
        self.items.insert(
            index,
            VisibleResult {
                key,
                result: result.clone(),
            },
        );
        Some(FilterViewEvent::Inserted {
            index,
            result: result.clone(),
        })
    }

    fn remove(&mut self, result: &TestCaseResult) -> Option<FilterViewEvent> {
        let index = self.find(&SortKey::new(result)).ok()?;
        let item = self.items.remove(index);
        Some(FilterViewEvent::Removed {
            index,
            result: item.result,
        })
    }

    fn find(&self, key: &SortKey) -> Result<usize, usize> {
        self.items.binary_search_by(|item| item.key.cmp(key))
    }

    fn rebuild(&mut self, snapshot: &StoreSnapshot) -> FilterViewEvent {
        let mut items: Vec<_> = snapshot
            .results()
            .iter()
            .filter_map(|result| {
                let key = SortKey::new(result);
                self.criteria
                    .matches_folded(result.state(), &key.folded_name)
                    .then(|| VisibleResult {
                        key,
                        result: result.clone(),
                    })
            })
            .collect();
        items.sort_by(|a, b| a.key.cmp(&b.key));
        self.items = items;
        self.generation = snapshot.generation();
        FilterViewEvent::Reset {
            len: self.items.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        results::{FailureDetail, TestOutcome},
        store::ResultStore,
    };
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use test_case::test_case;
    use test_strategy::proptest;

    fn store_with(names: &[&str]) -> ResultStore {
        let store = ResultStore::new();
        for name in names {
            store
                .add(TestCaseResult::new(format!("Tests.{name}").as_str(), *name))
                .unwrap();
        }
        store
    }

    fn visible_names(view: &FilterView) -> Vec<&str> {
        view.results().map(|r| r.display_name()).collect()
    }

    #[test_case("all", Ok(StatusFilter::All); "all")]
    #[test_case("Passed", Ok(StatusFilter::Passed); "mixed case")]
    #[test_case(" failed ", Ok(StatusFilter::Failed); "surrounding whitespace")]
    #[test_case("not-run", Ok(StatusFilter::NotRun); "kebab case")]
    #[test_case("NotRun", Ok(StatusFilter::NotRun); "pascal case")]
    #[test_case("flaky", Err(InvalidFilterState::new("flaky")); "unknown")]
    fn parse_status_filter(input: &str, expected: Result<StatusFilter, InvalidFilterState>) {
        assert_eq!(input.parse::<StatusFilter>(), expected);
    }

    #[test]
    fn sorts_case_insensitively_with_stable_ties() {
        let store = store_with(&["beta", "Alpha", "alpha", "Gamma"]);
        let view = FilterView::new(FilterCriteria::default(), &store.snapshot());
        assert_eq!(visible_names(&view), ["Alpha", "alpha", "beta", "Gamma"]);
    }

    #[test]
    fn query_is_trimmed_and_case_insensitive() {
        let store = store_with(&["SuccessfulTest", "FailingTest", "LongRunningSuccess"]);
        let view = FilterView::new(
            FilterCriteria::new(StatusFilter::All, "  success "),
            &store.snapshot(),
        );
        assert_eq!(
            visible_names(&view),
            ["LongRunningSuccess", "SuccessfulTest"]
        );
    }

    #[test]
    fn criteria_match_status_and_folded_query() {
        let store = store_with(&["DivideByZero", "Divide", "Add"]);
        store
            .record_outcome(TestOutcome::failed(
                "Tests.DivideByZero",
                FailureDetail::new("boom"),
            ))
            .unwrap();
        let snapshot = store.snapshot();
        let criteria = FilterCriteria::new(StatusFilter::Failed, " DIVIDE ");
        let matching: Vec<_> = snapshot
            .results()
            .iter()
            .filter(|r| criteria.matches(r))
            .map(|r| r.display_name())
            .collect();
        assert_eq!(matching, ["DivideByZero"]);

        let view = FilterView::new(criteria, &snapshot);
        assert_eq!(view.position(&TestCaseId::new("Tests.DivideByZero")), Some(0));
        assert_eq!(view.position(&TestCaseId::new("Tests.Divide")), None);

        let view = FilterView::new(FilterCriteria::default(), &snapshot);
        assert_eq!(view.position(&TestCaseId::new("Tests.Divide")), Some(1));
    }

    #[test]
    fn identical_criteria_is_a_no_op() {
        let store = store_with(&["a", "b"]);
        let snapshot = store.snapshot();
        let mut view = FilterView::new(FilterCriteria::new(StatusFilter::All, "a"), &snapshot);
        assert_eq!(
            view.set_criteria(FilterCriteria::new(StatusFilter::All, "a"), &snapshot),
            None
        );
        assert_eq!(
            view.set_criteria(FilterCriteria::new(StatusFilter::All, ""), &snapshot),
            Some(FilterViewEvent::Reset { len: 2 })
        );
    }

    #[test]
    fn incremental_updates_follow_status() {
        let store = store_with(&["b", "a"]);
        let mut events = store.subscribe();
        let mut view = FilterView::new(
            FilterCriteria::new(StatusFilter::Failed, ""),
            &store.snapshot(),
        );
        assert!(view.is_empty());

        store
            .record_outcome(TestOutcome::failed("Tests.a", FailureDetail::new("boom")))
            .unwrap();
        store.record_outcome(TestOutcome::passed("Tests.b")).unwrap();
        store.add(TestCaseResult::new("Tests.c", "c")).unwrap();
        store.reset([&TestCaseId::new("Tests.a")]);

        let applied: Vec<_> = std::iter::from_fn(|| events.try_recv().ok())
            .map(|event| view.apply(&event))
            .collect();

        assert!(matches!(
            &applied[0],
            Some(FilterViewEvent::Inserted { index: 0, result }) if result.display_name() == "a"
        ));
        assert_eq!(applied[1], None);
        assert_eq!(applied[2], None);
        assert!(matches!(
            &applied[3],
            Some(FilterViewEvent::Removed { index: 0, .. })
        ));
        assert!(view.is_empty());
        assert_eq!(view.generation(), store.generation());
    }

    #[test]
    fn stale_events_are_ignored() {
        let store = store_with(&[]);
        let mut events = store.subscribe();
        store.add(TestCaseResult::new("Tests.a", "a")).unwrap();

        let mut view = FilterView::new(FilterCriteria::default(), &store.snapshot());
        let event = events.try_recv().unwrap();
        assert_eq!(view.apply(&event), None);
        assert_eq!(view.len(), 1);
    }

    #[derive(Clone, Debug, test_strategy::Arbitrary)]
    enum Change {
        Add(#[strategy(0..6u8)] u8, #[strategy("[a-cA-C]{1,3}")] String),
        Remove(#[strategy(0..6u8)] u8),
        Pass(#[strategy(0..6u8)] u8),
        Fail(#[strategy(0..6u8)] u8),
        Reset(#[strategy(0..6u8)] u8),
    }

    #[proptest(cases = 128)]
    fn incremental_view_matches_full_scan(
        status: StatusFilter,
        #[strategy("[a-cA-C ]{0,2}")] query: String,
        changes: Vec<Change>,
    ) {
        let store = ResultStore::new();
        let mut events = store.subscribe();
        let criteria = FilterCriteria::new(status, query);
        let mut view = FilterView::new(criteria.clone(), &store.snapshot());

        for change in changes {
            match change {
                Change::Add(n, name) => {
                    let _ = store.add(TestCaseResult::new(format!("t{n}").as_str(), name));
                }
                Change::Remove(n) => {
                    store.remove(&TestCaseId::new(format!("t{n}")));
                }
                Change::Pass(n) => {
                    let _ = store.record_outcome(TestOutcome::passed(format!("t{n}").as_str()));
                }
                Change::Fail(n) => {
                    let _ = store.record_outcome(TestOutcome::failed(
                        format!("t{n}").as_str(),
                        FailureDetail::new("boom"),
                    ));
                }
                Change::Reset(n) => {
                    store.reset([&TestCaseId::new(format!("t{n}"))]);
                }
            }
            while let Ok(event) = events.try_recv() {
                view.apply(&event);
            }
        }

        let snapshot = store.snapshot();
        let mut expected: Vec<_> = snapshot
            .results()
            .iter()
            .filter(|r| criteria.matches(r))
            .collect();
        expected.sort_by_key(|r| r.display_name().to_lowercase());

        let actual: Vec<_> = view.results().collect();
        prop_assert_eq!(actual, expected);

        let rebuilt = FilterView::new(criteria.clone(), &snapshot);
        prop_assert_eq!(
            rebuilt.results().collect::<Vec<_>>(),
            view.results().collect::<Vec<_>>()
        );
        prop_assert_eq!(view.clone().set_criteria(criteria, &snapshot), None);
    }
}
