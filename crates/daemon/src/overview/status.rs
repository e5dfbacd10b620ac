// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `status.yaml` grammar.
//!
//! Builder status files are a line-oriented YAML subset: top-level scalars,
//! a `gates:` map of gate name → { status, requested_at?, approved_at? },
//! and a `plan_phases:` list of { id, title, status }. Nothing else in YAML
//! is honored — indentation is two spaces per level, values are plain or
//! double-quoted scalars, `#` starts a comment.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One approval gate.
#[derive(Debug, Clone, PartialEq)]
pub struct Gate {
    pub name: String,
    pub status: String,
    pub requested_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl Gate {
    pub fn is_pending(&self) -> bool {
        self.status == "pending"
    }
}

/// One plan phase from the `plan_phases:` list.
#[derive(Debug, Clone, PartialEq)]
pub struct PlanPhase {
    pub id: String,
    pub title: String,
    pub status: String,
}

impl PlanPhase {
    pub fn is_complete(&self) -> bool {
        self.status == "complete"
    }
}

/// Parsed status file. Unknown keys are ignored; missing keys are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusFile {
    pub id: Option<String>,
    pub title: Option<String>,
    pub protocol: Option<String>,
    pub phase: Option<String>,
    pub current_plan_phase: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    /// Gates in file order.
    pub gates: Vec<Gate>,
    pub plan_phases: Vec<PlanPhase>,
}

impl StatusFile {
    pub fn gate(&self, name: &str) -> Option<&Gate> {
        self.gates.iter().find(|g| g.name == name)
    }

    /// Whether any gate is currently pending with a request timestamp.
    pub fn has_requested_gate(&self) -> bool {
        self.gates
            .iter()
            .any(|g| g.is_pending() && g.requested_at.is_some())
    }
}

/// A pending gate surfaced as a blocker.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingGate {
    pub gate: String,
    /// Human-readable blocker label ("spec review", "plan review", "PR review").
    pub label: String,
    pub requested_at: String,
}

/// Conventional gate order for blocker derivation.
const GATE_ORDER: &[(&str, &str)] = &[
    ("spec", "spec review"),
    ("plan", "plan review"),
    ("pr", "PR review"),
];

/// First pending gate (by conventional order) that carries `requested_at`.
pub fn pending_gate(status: &StatusFile) -> Option<PendingGate> {
    for (prefix, label) in GATE_ORDER {
        for gate in &status.gates {
            if !gate.name.starts_with(prefix) {
                continue;
            }
            if let (true, Some(at)) = (gate.is_pending(), gate.requested_at) {
                return Some(PendingGate {
                    gate: gate.name.clone(),
                    label: (*label).to_string(),
                    requested_at: at.to_rfc3339(),
                });
            }
        }
    }
    None
}

/// Total blocked time: closed intervals `[requested_at, approved_at]` per
/// gate plus `[requested_at, now]` for any still-pending gate.
pub fn idle_ms(status: &StatusFile, now: DateTime<Utc>) -> u64 {
    let mut total = 0i64;
    for gate in &status.gates {
        let Some(requested) = gate.requested_at else {
            continue;
        };
        let end = match gate.approved_at {
            Some(approved) => approved,
            None if gate.is_pending() => now,
            None => continue,
        };
        total += (end - requested).num_milliseconds().max(0);
    }
    total.max(0) as u64
}

/// First pending gate across a workspace's own projects, used as the
/// workspace-level blocker signal.
pub fn pending_gate_for_workspace(root: &Path) -> Option<PendingGate> {
    let projects = root.join("codev").join("projects");
    let mut dirs: Vec<_> = std::fs::read_dir(projects)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_dir())
        .collect();
    dirs.sort();
    for dir in dirs {
        if let Some(status) = load_status_file(&dir.join("status.yaml")) {
            if let Some(gate) = pending_gate(&status) {
                return Some(gate);
            }
        }
    }
    None
}

/// Read and parse, `None` on missing/unreadable file.
pub fn load_status_file(path: &Path) -> Option<StatusFile> {
    let raw = std::fs::read_to_string(path).ok()?;
    Some(parse_status(&raw))
}

/// Sections the parser can be inside.
#[derive(PartialEq)]
enum Section {
    Top,
    Gates,
    PlanPhases,
}

/// Parse the status-file grammar. Unknown constructs are skipped, not
/// errors: a status file is advisory data written by agents.
pub fn parse_status(raw: &str) -> StatusFile {
    let mut file = StatusFile::default();
    let mut section = Section::Top;

    for line in raw.lines() {
        let without_comment = strip_comment(line);
        if without_comment.trim().is_empty() {
            continue;
        }
        let indent = without_comment.len() - without_comment.trim_start().len();
        let trimmed = without_comment.trim_start();

        if indent == 0 {
            let Some((key, value)) = split_key_value(trimmed) else {
                continue;
            };
            match key {
                "gates" => section = Section::Gates,
                "plan_phases" => section = Section::PlanPhases,
                "id" => {
                    section = Section::Top;
                    file.id = non_empty(value);
                }
                "title" => {
                    section = Section::Top;
                    file.title = non_empty(value);
                }
                "protocol" => {
                    section = Section::Top;
                    file.protocol = non_empty(value);
                }
                "phase" => {
                    section = Section::Top;
                    file.phase = non_empty(value);
                }
                "current_plan_phase" => {
                    section = Section::Top;
                    file.current_plan_phase = non_empty(value);
                }
                "started_at" => {
                    section = Section::Top;
                    file.started_at = parse_time(value);
                }
                _ => section = Section::Top,
            }
            continue;
        }

        match section {
            Section::Gates => {
                if indent == 2 {
                    if let Some((name, _)) = split_key_value(trimmed) {
                        file.gates.push(Gate {
                            name: name.to_string(),
                            status: String::new(),
                            requested_at: None,
                            approved_at: None,
                        });
                    }
                } else if indent >= 4 {
                    let Some(gate) = file.gates.last_mut() else {
                        continue;
                    };
                    if let Some((key, value)) = split_key_value(trimmed) {
                        match key {
                            "status" => gate.status = value.to_string(),
                            "requested_at" => gate.requested_at = parse_time(value),
                            "approved_at" => gate.approved_at = parse_time(value),
                            _ => {}
                        }
                    }
                }
            }
            Section::PlanPhases => {
                if let Some(item_rest) = trimmed.strip_prefix("- ") {
                    file.plan_phases.push(PlanPhase {
                        id: String::new(),
                        title: String::new(),
                        status: String::new(),
                    });
                    apply_phase_field(&mut file, item_rest);
                } else {
                    apply_phase_field(&mut file, trimmed);
                }
            }
            Section::Top => {}
        }
    }

    file
}

fn apply_phase_field(file: &mut StatusFile, fragment: &str) {
    let Some(phase) = file.plan_phases.last_mut() else {
        return;
    };
    if let Some((key, value)) = split_key_value(fragment) {
        match key {
            "id" => phase.id = value.to_string(),
            "title" => phase.title = value.to_string(),
            "status" => phase.status = value.to_string(),
            _ => {}
        }
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        // A # inside a quoted value is rare enough not to honor; the grammar
        // is line-oriented, not full YAML.
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn split_key_value(fragment: &str) -> Option<(&str, &str)> {
    let (key, value) = fragment.split_once(':')?;
    Some((key.trim(), unquote(value.trim())))
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
#[path = "status_tests.rs"]
mod tests;
