// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Builder worktree discovery.
//!
//! Builders live under `.builders/<worktree>/` in the workspace root; each
//! carries its project state at `codev/projects/<project>/status.yaml`.
//! Worktrees inherit unrelated project directories through version control,
//! so strict discovery insists on the directory whose name matches the
//! project id derived from the worktree name. When nothing matches, a soft
//! entry is emitted from the worktree name alone.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::progress::progress;
use super::status::{idle_ms, load_status_file, pending_gate, PendingGate};

/// One builder in the overview projection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderOverview {
    /// Worktree name, e.g. `spir-126-retry-loop`.
    pub name: String,
    /// Registry role id for this builder's terminal.
    pub role_id: String,
    pub protocol: Option<String>,
    pub project_id: Option<String>,
    pub title: Option<String>,
    pub phase: Option<String>,
    pub progress: u8,
    pub blocked: Option<PendingGate>,
    pub idle_ms: u64,
    /// True when no matching status.yaml was found and only the worktree
    /// name informed this entry.
    pub soft: bool,
}

/// Derive (protocol, project id) from a worktree name.
///
/// `spir-126-retry-loop` → ("spir", "0126"); `bugfix-296-fix-crash` →
/// ("bugfix", "bugfix-296"). Numeric zero-padding applies to the legacy
/// protocols only.
pub fn derive_project_id(worktree: &str) -> Option<(String, String)> {
    let mut parts = worktree.splitn(3, '-');
    let protocol = parts.next()?;
    let number: u32 = parts.next()?.parse().ok()?;
    if protocol.is_empty() {
        return None;
    }
    let id = match protocol {
        "spir" | "aspir" | "spider" => format!("{number:04}"),
        _ => format!("{protocol}-{number}"),
    };
    Some((protocol.to_string(), id))
}

/// Discover all builders under `<root>/.builders`.
pub fn discover_builders(root: &Path, now: DateTime<Utc>) -> Vec<BuilderOverview> {
    let builders_dir = root.join(".builders");
    let Ok(entries) = std::fs::read_dir(&builders_dir) else {
        return Vec::new();
    };

    let mut worktrees: Vec<_> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    worktrees.sort();

    worktrees
        .into_iter()
        .map(|name| builder_for_worktree(&builders_dir.join(&name), &name, now))
        .collect()
}

fn builder_for_worktree(worktree_dir: &Path, name: &str, now: DateTime<Utc>) -> BuilderOverview {
    let derived = derive_project_id(name);
    let (protocol, project_id) = match &derived {
        Some((p, id)) => (Some(p.clone()), Some(id.clone())),
        None => (None, None),
    };

    // Strict mode: status.yaml from the project dir whose name matches the
    // derived id.
    if let Some((_, id)) = &derived {
        if let Some(status) = matching_status(worktree_dir, id) {
            let blocked = pending_gate(&status);
            return BuilderOverview {
                name: name.to_string(),
                role_id: format!("builder-{name}"),
                protocol: status.protocol.clone().or(protocol),
                project_id: status.id.clone().or(project_id),
                title: status.title.clone(),
                phase: status.phase.clone(),
                progress: progress(&status),
                idle_ms: idle_ms(&status, now),
                blocked,
                soft: false,
            };
        }
    }

    // Soft mode: worktree name is all we know.
    BuilderOverview {
        name: name.to_string(),
        role_id: format!("builder-{name}"),
        protocol,
        project_id,
        title: None,
        phase: None,
        progress: 0,
        blocked: None,
        idle_ms: 0,
        soft: true,
    }
}

/// Find the project directory matching the derived id and load its
/// status.yaml.
fn matching_status(worktree_dir: &Path, project_id: &str) -> Option<super::status::StatusFile> {
    let projects = worktree_dir.join("codev").join("projects");
    let mut dirs: Vec<_> = std::fs::read_dir(projects)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();

    for dir in dirs {
        let Some(dir_name) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            continue;
        };
        if dir_name == project_id || dir_name.starts_with(&format!("{project_id}-")) {
            if let Some(status) = load_status_file(&dir.join("status.yaml")) {
                return Some(status);
            }
        }
    }
    None
}

#[cfg(test)]
#[path = "builders_tests.rs"]
mod tests;
