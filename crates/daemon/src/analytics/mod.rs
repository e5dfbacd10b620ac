// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Delivery analytics, separate from the overview projection.
//!
//! Joins tracker history (merged PRs, closed issues) with the workspace's
//! own project directory and the consult metrics database. Results cache
//! per (root, range) for the same TTL as the overview; `refresh=true`
//! bypasses. Every source degrades into the `errors` map.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use af_storage::{ConsultMetricsDb, ConsultSummary};

use crate::overview::status::load_status_file;
use crate::tracker::{IssueSummary, PrSummary, TrackerCli};

pub const ANALYTICS_TTL: Duration = Duration::from_secs(30);

/// Supported time ranges. The API takes the day-count labels; responses
/// carry the humanized form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Range {
    Day,
    Week,
    Month,
    All,
}

impl Range {
    /// Parse the query-string label ("1" | "7" | "30" | "all").
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "1" => Some(Range::Day),
            "7" => Some(Range::Week),
            "30" => Some(Range::Month),
            "all" => Some(Range::All),
            _ => None,
        }
    }

    /// Humanized label used in responses ("24h" | "7d" | "30d" | "all").
    pub fn label(self) -> &'static str {
        match self {
            Range::Day => "24h",
            Range::Week => "7d",
            Range::Month => "30d",
            Range::All => "all",
        }
    }

    pub fn cutoff(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let days = match self {
            Range::Day => 1,
            Range::Week => 7,
            Range::Month => 30,
            Range::All => return None,
        };
        Some(now - chrono::Duration::days(days))
    }
}

/// Aggregated analytics for one range.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsSummary {
    pub range: &'static str,
    pub prs_merged: u64,
    pub issues_closed: u64,
    pub bugs_fixed: u64,
    /// Mean open→merge interval across merged PRs, when computable.
    pub avg_time_to_merge_ms: Option<u64>,
    /// Mean open→close interval across closed bug issues, when computable.
    pub avg_bug_close_ms: Option<u64>,
    pub projects_by_protocol: HashMap<String, u64>,
    pub consults: ConsultSummary,
    pub errors: HashMap<String, String>,
}

pub struct AnalyticsService {
    tracker: Arc<dyn TrackerCli>,
    metrics_db_path: PathBuf,
    ttl: Duration,
    cache: Mutex<Option<CacheEntry>>,
}

struct CacheEntry {
    root: PathBuf,
    range: Range,
    fetched_at: Instant,
    data: Arc<AnalyticsSummary>,
}

impl AnalyticsService {
    pub fn new(tracker: Arc<dyn TrackerCli>, metrics_db_path: PathBuf) -> Self {
        Self::with_ttl(tracker, metrics_db_path, ANALYTICS_TTL)
    }

    pub fn with_ttl(
        tracker: Arc<dyn TrackerCli>,
        metrics_db_path: PathBuf,
        ttl: Duration,
    ) -> Self {
        Self {
            tracker,
            metrics_db_path,
            ttl,
            cache: Mutex::new(None),
        }
    }

    pub async fn summary(
        &self,
        root: &Path,
        range: Range,
        refresh: bool,
    ) -> Arc<AnalyticsSummary> {
        if !refresh {
            let cache = self.cache.lock();
            if let Some(entry) = cache.as_ref() {
                if entry.root == root
                    && entry.range == range
                    && entry.fetched_at.elapsed() < self.ttl
                {
                    return Arc::clone(&entry.data);
                }
            }
        }

        let data = Arc::new(self.compute(root, range).await);
        *self.cache.lock() = Some(CacheEntry {
            root: root.to_path_buf(),
            range,
            fetched_at: Instant::now(),
            data: Arc::clone(&data),
        });
        data
    }

    async fn compute(&self, root: &Path, range: Range) -> AnalyticsSummary {
        let now = Utc::now();
        let cutoff = range.cutoff(now);
        let mut errors = HashMap::new();

        let (merged, closed) = tokio::join!(
            self.tracker.merged_prs_since(root, cutoff),
            self.tracker.closed_issues_since(root, cutoff),
        );

        let merged = merged.unwrap_or_else(|e| {
            errors.insert("mergedPrs".to_string(), e.to_string());
            Vec::new()
        });
        let closed = closed.unwrap_or_else(|e| {
            errors.insert("closedIssues".to_string(), e.to_string());
            Vec::new()
        });

        let bugs: Vec<&IssueSummary> = closed.iter().filter(|i| i.is_bug()).collect();

        let consults = match ConsultMetricsDb::open(&self.metrics_db_path) {
            Ok(db) => match db.summary(cutoff.map(|c| c.timestamp_millis())) {
                Ok(summary) => summary,
                Err(e) => {
                    errors.insert("consults".to_string(), e.to_string());
                    ConsultSummary::default()
                }
            },
            Err(e) => {
                errors.insert("consults".to_string(), e.to_string());
                ConsultSummary::default()
            }
        };

        AnalyticsSummary {
            range: range.label(),
            prs_merged: merged.len() as u64,
            issues_closed: closed.len() as u64,
            bugs_fixed: bugs.len() as u64,
            avg_time_to_merge_ms: avg_interval_ms(
                merged.iter().map(|pr| (pr.created_at, pr.merged_at)),
            ),
            avg_bug_close_ms: avg_interval_ms(
                bugs.iter().map(|issue| (issue.created_at, issue.closed_at)),
            ),
            projects_by_protocol: count_projects_by_protocol(root),
            consults,
            errors,
        }
    }
}

/// Mean of the (start, end) intervals that have both endpoints.
fn avg_interval_ms(
    intervals: impl Iterator<Item = (Option<DateTime<Utc>>, Option<DateTime<Utc>>)>,
) -> Option<u64> {
    let mut total: i64 = 0;
    let mut count: u32 = 0;
    for (start, end) in intervals {
        if let (Some(start), Some(end)) = (start, end) {
            total += (end - start).num_milliseconds().max(0);
            count += 1;
        }
    }
    if count == 0 {
        return None;
    }
    Some((total / i64::from(count)).max(0) as u64)
}

/// Count projects in `<root>/codev/projects` by their status-file protocol,
/// falling back to the directory-name prefix.
fn count_projects_by_protocol(root: &Path) -> HashMap<String, u64> {
    let mut counts = HashMap::new();
    let projects = root.join("codev").join("projects");
    let Ok(entries) = std::fs::read_dir(projects) else {
        return counts;
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let protocol = load_status_file(&path.join("status.yaml"))
            .and_then(|status| status.protocol)
            .or_else(|| {
                let name = path.file_name()?.to_string_lossy().into_owned();
                let prefix = name.split('-').next()?.to_string();
                // Numeric prefixes (e.g. `0126-retry-loop`) are legacy spir
                // project dirs.
                if prefix.chars().all(|c| c.is_ascii_digit()) {
                    Some("spir".to_string())
                } else {
                    Some(prefix)
                }
            });
        if let Some(protocol) = protocol {
            *counts.entry(protocol).or_insert(0) += 1;
        }
    }
    counts
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
