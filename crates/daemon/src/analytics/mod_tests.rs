// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::tracker::TrackerError;

fn at(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw).unwrap().with_timezone(&Utc)
}

#[derive(Default)]
struct FakeTracker {
    merged_calls: AtomicUsize,
    fail_merged: bool,
}

#[async_trait]
impl TrackerCli for FakeTracker {
    async fn pending_prs(&self, _root: &Path) -> Result<Vec<PrSummary>, TrackerError> {
        Ok(Vec::new())
    }

    async fn open_issues(&self, _root: &Path) -> Result<Vec<IssueSummary>, TrackerError> {
        Ok(Vec::new())
    }

    async fn closed_issues_since(
        &self,
        _root: &Path,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<IssueSummary>, TrackerError> {
        Ok(vec![
            IssueSummary {
                number: 1,
                title: "Crash on resize".into(),
                labels: vec!["bug".into()],
                created_at: Some(at("2026-01-01T00:00:00Z")),
                closed_at: Some(at("2026-01-02T00:00:00Z")),
            },
            IssueSummary {
                number: 2,
                title: "Feature ask".into(),
                labels: vec!["enhancement".into()],
                created_at: Some(at("2026-01-01T00:00:00Z")),
                closed_at: Some(at("2026-01-05T00:00:00Z")),
            },
        ])
    }

    async fn merged_prs_since(
        &self,
        _root: &Path,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PrSummary>, TrackerError> {
        self.merged_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_merged {
            return Err(TrackerError::Failed("tracker unreachable".into()));
        }
        Ok(vec![
            PrSummary {
                number: 10,
                title: "One hour".into(),
                author: None,
                created_at: Some(at("2026-01-01T00:00:00Z")),
                merged_at: Some(at("2026-01-01T01:00:00Z")),
            },
            PrSummary {
                number: 11,
                title: "Three hours".into(),
                author: None,
                created_at: Some(at("2026-01-01T00:00:00Z")),
                merged_at: Some(at("2026-01-01T03:00:00Z")),
            },
        ])
    }
}

#[yare::parameterized(
    day = { "1", Some("24h") },
    week = { "7", Some("7d") },
    month = { "30", Some("30d") },
    all = { "all", Some("all") },
    bogus = { "90", None },
)]
fn range_labels(raw: &str, expected: Option<&str>) {
    assert_eq!(Range::parse(raw).map(Range::label), expected);
}

#[test]
fn range_cutoffs() {
    let now = at("2026-02-10T00:00:00Z");
    assert_eq!(Range::Day.cutoff(now), Some(at("2026-02-09T00:00:00Z")));
    assert_eq!(Range::Month.cutoff(now), Some(at("2026-01-11T00:00:00Z")));
    assert_eq!(Range::All.cutoff(now), None);
}

fn seed_projects(root: &Path) {
    for (dir, contents) in [
        ("0126-retry", "protocol: spir\n"),
        ("0127-other", "protocol: spir\n"),
        ("bugfix-296-crash", "protocol: bugfix\n"),
        // No status.yaml: protocol falls back to the dir-name prefix.
        ("kanban-3-board", ""),
    ] {
        let path = root.join("codev/projects").join(dir);
        std::fs::create_dir_all(&path).unwrap();
        if !contents.is_empty() {
            std::fs::write(path.join("status.yaml"), contents).unwrap();
        }
    }
}

fn service(tracker: FakeTracker, metrics_path: PathBuf) -> AnalyticsService {
    AnalyticsService::new(Arc::new(tracker) as Arc<dyn TrackerCli>, metrics_path)
}

#[tokio::test]
async fn summary_joins_tracker_projects_and_metrics() {
    let dir = tempfile::tempdir().unwrap();
    seed_projects(dir.path());
    let service = service(FakeTracker::default(), dir.path().join("absent-metrics.db"));

    let summary = service.summary(dir.path(), Range::Week, false).await;

    assert_eq!(summary.range, "7d");
    assert_eq!(summary.prs_merged, 2);
    assert_eq!(summary.issues_closed, 2);
    assert_eq!(summary.bugs_fixed, 1);
    // Mean of 1h and 3h.
    assert_eq!(summary.avg_time_to_merge_ms, Some(2 * 3_600_000));
    // The single bug closed in 24h.
    assert_eq!(summary.avg_bug_close_ms, Some(24 * 3_600_000));
    assert_eq!(summary.projects_by_protocol.get("spir"), Some(&2));
    assert_eq!(summary.projects_by_protocol.get("bugfix"), Some(&1));
    assert_eq!(summary.projects_by_protocol.get("kanban"), Some(&1));
    // The metrics DB is absent: degraded, not fatal.
    assert_eq!(summary.consults, ConsultSummary::default());
    assert!(summary.errors.contains_key("consults"));
}

#[tokio::test]
async fn cache_hits_within_ttl_and_refresh_bypasses() {
    let dir = tempfile::tempdir().unwrap();
    let tracker = FakeTracker::default();
    let service = AnalyticsService::new(
        Arc::new(tracker) as Arc<dyn TrackerCli>,
        dir.path().join("absent.db"),
    );

    let first = service.summary(dir.path(), Range::Week, false).await;
    let second = service.summary(dir.path(), Range::Week, false).await;
    assert!(Arc::ptr_eq(&first, &second));

    let third = service.summary(dir.path(), Range::Week, true).await;
    assert!(!Arc::ptr_eq(&first, &third));
}

#[tokio::test]
async fn different_range_misses_the_cache() {
    let dir = tempfile::tempdir().unwrap();
    let service = service(FakeTracker::default(), dir.path().join("absent.db"));

    let week = service.summary(dir.path(), Range::Week, false).await;
    let month = service.summary(dir.path(), Range::Month, false).await;
    assert!(!Arc::ptr_eq(&week, &month));
    assert_eq!(month.range, "30d");
}

#[tokio::test]
async fn tracker_failure_lands_in_the_errors_map() {
    let dir = tempfile::tempdir().unwrap();
    let tracker = FakeTracker {
        fail_merged: true,
        ..FakeTracker::default()
    };
    let service = service(tracker, dir.path().join("absent.db"));

    let summary = service.summary(dir.path(), Range::All, false).await;
    assert_eq!(summary.prs_merged, 0);
    assert!(summary.errors.contains_key("mergedPrs"));
    // Closed issues still aggregated.
    assert_eq!(summary.issues_closed, 2);
}

#[test]
fn avg_interval_ignores_open_ended_pairs() {
    let result = avg_interval_ms(
        vec![
            (Some(at("2026-01-01T00:00:00Z")), Some(at("2026-01-01T02:00:00Z"))),
            (Some(at("2026-01-01T00:00:00Z")), None),
            (None, None),
        ]
        .into_iter(),
    );
    assert_eq!(result, Some(2 * 3_600_000));
    assert_eq!(avg_interval_ms(std::iter::empty()), None);
}
