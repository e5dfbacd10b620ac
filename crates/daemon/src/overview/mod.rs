// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The overview aggregator: a TTL-bounded, read-mostly projection over the
//! builder worktrees, the issue tracker, and the PR queue.
//!
//! The four external sources are fetched concurrently. Successes cache for
//! the TTL; failures are reported in the `errors` map and retried on the
//! next call. Builders come from the local filesystem and are always
//! present, even when every external source fails.

pub mod builders;
pub mod progress;
pub mod status;

pub use builders::{derive_project_id, discover_builders, BuilderOverview};
pub use status::{parse_status, PendingGate, StatusFile};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;

use crate::tracker::{IssueSummary, PrSummary, TrackerCli};

/// How long a successful fetch stays fresh.
pub const OVERVIEW_TTL: Duration = Duration::from_secs(30);

/// Aggregated overview for one workspace root.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverviewResponse {
    pub workspace_root: String,
    pub builders: Vec<BuilderOverview>,
    #[serde(rename = "pendingPRs")]
    pub pending_prs: Vec<PrSummary>,
    /// Open issues.
    pub backlog: Vec<IssueSummary>,
    pub recently_closed: Vec<IssueSummary>,
    pub recently_merged: Vec<PrSummary>,
    /// Per-source failure messages (keys: prs, issues, recentlyClosed,
    /// recentlyMerged).
    pub errors: HashMap<String, String>,
}

struct SourceCache<T> {
    fetched_at: Instant,
    data: T,
}

impl<T: Clone> SourceCache<T> {
    fn fresh(&self, ttl: Duration) -> Option<T> {
        (self.fetched_at.elapsed() < ttl).then(|| self.data.clone())
    }
}

/// Cache for one workspace root. Switching roots drops it wholesale.
#[derive(Default)]
struct RootCache {
    prs: Option<SourceCache<Vec<PrSummary>>>,
    backlog: Option<SourceCache<Vec<IssueSummary>>>,
    recently_closed: Option<SourceCache<Vec<IssueSummary>>>,
    recently_merged: Option<SourceCache<Vec<PrSummary>>>,
    /// Assembled response, kept only while every source above is a cached
    /// success; identical calls inside the TTL return this same Arc.
    assembled: Option<SourceCache<Arc<OverviewResponse>>>,
}

pub struct OverviewService {
    tracker: Arc<dyn TrackerCli>,
    ttl: Duration,
    cache: Mutex<Option<(PathBuf, RootCache)>>,
}

impl OverviewService {
    pub fn new(tracker: Arc<dyn TrackerCli>) -> Self {
        Self::with_ttl(tracker, OVERVIEW_TTL)
    }

    pub fn with_ttl(tracker: Arc<dyn TrackerCli>, ttl: Duration) -> Self {
        Self {
            tracker,
            ttl,
            cache: Mutex::new(None),
        }
    }

    /// Build (or reuse) the overview for a workspace root.
    pub async fn fetch(&self, root: &Path, refresh: bool) -> Arc<OverviewResponse> {
        // Root switch invalidates the previous root's cache entirely.
        {
            let mut cache = self.cache.lock();
            match cache.as_ref() {
                Some((cached_root, _)) if cached_root == root => {}
                _ => *cache = Some((root.to_path_buf(), RootCache::default())),
            }

            if !refresh {
                if let Some((_, root_cache)) = cache.as_ref() {
                    if let Some(assembled) =
                        root_cache.assembled.as_ref().and_then(|a| a.fresh(self.ttl))
                    {
                        return assembled;
                    }
                }
            }
        }

        let (cached_prs, cached_backlog, cached_closed, cached_merged) = if refresh {
            (None, None, None, None)
        } else {
            let cache = self.cache.lock();
            match cache.as_ref() {
                Some((_, c)) => (
                    c.prs.as_ref().and_then(|s| s.fresh(self.ttl)),
                    c.backlog.as_ref().and_then(|s| s.fresh(self.ttl)),
                    c.recently_closed.as_ref().and_then(|s| s.fresh(self.ttl)),
                    c.recently_merged.as_ref().and_then(|s| s.fresh(self.ttl)),
                ),
                None => (None, None, None, None),
            }
        };

        let now = Utc::now();
        let since = now - chrono::Duration::days(7);

        // Fetch only what is not fresh, all concurrently.
        let prs_fut = fetch_unless(cached_prs, || self.tracker.pending_prs(root));
        let backlog_fut = fetch_unless(cached_backlog, || self.tracker.open_issues(root));
        let closed_fut = fetch_unless(cached_closed, || {
            self.tracker.closed_issues_since(root, Some(since))
        });
        let merged_fut = fetch_unless(cached_merged, || {
            self.tracker.merged_prs_since(root, Some(since))
        });
        let (prs, backlog, closed, merged) =
            tokio::join!(prs_fut, backlog_fut, closed_fut, merged_fut);

        let mut errors = HashMap::new();
        record_error(&mut errors, "prs", &prs);
        record_error(&mut errors, "issues", &backlog);
        record_error(&mut errors, "recentlyClosed", &closed);
        record_error(&mut errors, "recentlyMerged", &merged);

        let response = Arc::new(OverviewResponse {
            workspace_root: root.display().to_string(),
            builders: discover_builders(root, now),
            pending_prs: prs.clone().unwrap_or_default(),
            backlog: backlog.clone().unwrap_or_default(),
            recently_closed: closed.clone().unwrap_or_default(),
            recently_merged: merged.clone().unwrap_or_default(),
            errors,
        });

        // Cache successes; failed sources stay empty so the next call
        // retries them.
        let mut cache = self.cache.lock();
        if let Some((cached_root, root_cache)) = cache.as_mut() {
            if cached_root.as_path() == root {
                let at = Instant::now();
                store_success(&mut root_cache.prs, at, &prs);
                store_success(&mut root_cache.backlog, at, &backlog);
                store_success(&mut root_cache.recently_closed, at, &closed);
                store_success(&mut root_cache.recently_merged, at, &merged);
                root_cache.assembled = response.errors.is_empty().then(|| SourceCache {
                    fetched_at: at,
                    data: Arc::clone(&response),
                });
            }
        }

        response
    }
}

/// Reuse the cached value or run the fetch, normalizing the error to a
/// display string.
async fn fetch_unless<T, E, F, Fut>(cached: Option<T>, fetch: F) -> Result<T, String>
where
    E: std::fmt::Display,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
{
    match cached {
        Some(value) => Ok(value),
        None => fetch().await.map_err(|e| e.to_string()),
    }
}

fn record_error<T>(
    errors: &mut HashMap<String, String>,
    key: &str,
    outcome: &Result<T, String>,
) {
    if let Err(message) = outcome {
        errors.insert(key.to_string(), message.clone());
    }
}

fn store_success<T: Clone>(
    slot: &mut Option<SourceCache<T>>,
    at: Instant,
    outcome: &Result<T, String>,
) {
    if let Ok(data) = outcome {
        *slot = Some(SourceCache {
            fetched_at: at,
            data: data.clone(),
        });
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
