// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External issue-tracker CLI adapter.
//!
//! The overview and analytics aggregators shell out to the tracker CLI
//! (`gh` unless `TOWER_TRACKER_BIN` overrides it) with `--json` output.
//! Every invocation is bounded by a generous timeout and the child is
//! killed when the caller gives up. A failure here is never fatal: callers
//! fold it into their per-source `errors` map.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("tracker CLI timed out")]
    Timeout,

    #[error("tracker CLI failed: {0}")]
    Failed(String),

    #[error("failed to run tracker CLI: {0}")]
    Io(#[from] std::io::Error),

    #[error("tracker CLI returned malformed JSON: {0}")]
    Parse(String),
}

/// A pull request as the aggregators see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrSummary {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
}

/// An issue as the aggregators see it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueSummary {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl IssueSummary {
    pub fn is_bug(&self) -> bool {
        self.labels.iter().any(|l| l.eq_ignore_ascii_case("bug"))
    }
}

/// Seam over the tracker CLI. The production implementation shells out;
/// tests substitute canned results and failure injection.
#[async_trait]
pub trait TrackerCli: Send + Sync {
    async fn pending_prs(&self, root: &Path) -> Result<Vec<PrSummary>, TrackerError>;
    async fn open_issues(&self, root: &Path) -> Result<Vec<IssueSummary>, TrackerError>;
    async fn closed_issues_since(
        &self,
        root: &Path,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<IssueSummary>, TrackerError>;
    async fn merged_prs_since(
        &self,
        root: &Path,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PrSummary>, TrackerError>;
}

/// Production adapter over the `gh`-compatible CLI.
pub struct CliTracker {
    bin: String,
    timeout: Duration,
}

impl CliTracker {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    pub fn from_env() -> Self {
        Self::new(crate::env::tracker_bin(), crate::env::tracker_timeout())
    }

    async fn run_json(&self, root: &Path, args: &[&str]) -> Result<serde_json::Value, TrackerError> {
        let mut command = Command::new(&self.bin);
        command.args(args).current_dir(root).kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| TrackerError::Timeout)??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(TrackerError::Failed(stderr.trim().to_string()));
        }
        serde_json::from_slice(&output.stdout).map_err(|e| TrackerError::Parse(e.to_string()))
    }

    fn search_arg(since: Option<DateTime<Utc>>, field: &str) -> Option<String> {
        since.map(|at| format!("{field}:>={}", at.format("%Y-%m-%d")))
    }
}

#[async_trait]
impl TrackerCli for CliTracker {
    async fn pending_prs(&self, root: &Path) -> Result<Vec<PrSummary>, TrackerError> {
        let value = self
            .run_json(
                root,
                &["pr", "list", "--state", "open", "--json", "number,title,author,createdAt"],
            )
            .await?;
        parse_prs(value)
    }

    async fn open_issues(&self, root: &Path) -> Result<Vec<IssueSummary>, TrackerError> {
        let value = self
            .run_json(
                root,
                &["issue", "list", "--state", "open", "--json", "number,title,labels,createdAt"],
            )
            .await?;
        parse_issues(value)
    }

    async fn closed_issues_since(
        &self,
        root: &Path,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<IssueSummary>, TrackerError> {
        let mut args = vec![
            "issue".to_string(),
            "list".to_string(),
            "--state".to_string(),
            "closed".to_string(),
            "--json".to_string(),
            "number,title,labels,createdAt,closedAt".to_string(),
        ];
        if let Some(search) = Self::search_arg(since, "closed") {
            args.push("--search".to_string());
            args.push(search);
        }
        let borrowed: Vec<&str> = args.iter().map(String::as_str).collect();
        parse_issues(self.run_json(root, &borrowed).await?)
    }

    async fn merged_prs_since(
        &self,
        root: &Path,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PrSummary>, TrackerError> {
        let mut args = vec![
            "pr".to_string(),
            "list".to_string(),
            "--state".to_string(),
            "merged".to_string(),
            "--json".to_string(),
            "number,title,author,createdAt,mergedAt".to_string(),
        ];
        if let Some(search) = Self::search_arg(since, "merged") {
            args.push("--search".to_string());
            args.push(search);
        }
        let borrowed: Vec<&str> = args.iter().map(String::as_str).collect();
        parse_prs(self.run_json(root, &borrowed).await?)
    }
}

fn parse_prs(value: serde_json::Value) -> Result<Vec<PrSummary>, TrackerError> {
    let items = value
        .as_array()
        .ok_or_else(|| TrackerError::Parse("expected a JSON array".to_string()))?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(PrSummary {
            number: item["number"].as_u64().unwrap_or(0),
            title: item["title"].as_str().unwrap_or_default().to_string(),
            // gh nests the author; accept both shapes.
            author: item["author"]["login"]
                .as_str()
                .or_else(|| item["author"].as_str())
                .map(str::to_string),
            created_at: parse_time(&item["createdAt"]),
            merged_at: parse_time(&item["mergedAt"]),
        });
    }
    Ok(out)
}

fn parse_issues(value: serde_json::Value) -> Result<Vec<IssueSummary>, TrackerError> {
    let items = value
        .as_array()
        .ok_or_else(|| TrackerError::Parse("expected a JSON array".to_string()))?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let labels = match item["labels"].as_array() {
            Some(raw) => raw
                .iter()
                .filter_map(|l| l["name"].as_str().or_else(|| l.as_str()))
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        };
        out.push(IssueSummary {
            number: item["number"].as_u64().unwrap_or(0),
            title: item["title"].as_str().unwrap_or_default().to_string(),
            labels,
            created_at: parse_time(&item["createdAt"]),
            closed_at: parse_time(&item["closedAt"]),
        });
    }
    Ok(out)
}

fn parse_time(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    value
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
#[path = "tracker_tests.rs"]
mod tests;
