// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

const FULL_STATUS: &str = r#"
# builder status
id: "0126"
title: "Retry loop for flaky shells"
protocol: spir
phase: implement
current_plan_phase: p2
started_at: 2026-01-01T10:00:00Z
gates:
  spec-approval:
    status: approved
    requested_at: 2026-01-01T11:00:00Z
    approved_at: 2026-01-01T12:00:00Z
  plan-approval:
    status: pending
    requested_at: 2026-01-02T09:00:00Z
plan_phases:
  - id: p1
    title: Wire the channel
    status: complete
  - id: p2
    title: Add the retry loop
    status: in_progress
  - id: p3
    title: Tests
    status: todo
"#;

fn at(raw: &str) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::parse_from_rfc3339(raw)
        .unwrap()
        .with_timezone(&chrono::Utc)
}

#[test]
fn parses_top_level_scalars() {
    let status = parse_status(FULL_STATUS);
    assert_eq!(status.id.as_deref(), Some("0126"));
    assert_eq!(status.title.as_deref(), Some("Retry loop for flaky shells"));
    assert_eq!(status.protocol.as_deref(), Some("spir"));
    assert_eq!(status.phase.as_deref(), Some("implement"));
    assert_eq!(status.current_plan_phase.as_deref(), Some("p2"));
    assert_eq!(status.started_at, Some(at("2026-01-01T10:00:00Z")));
}

#[test]
fn parses_gates_in_file_order() {
    let status = parse_status(FULL_STATUS);
    assert_eq!(status.gates.len(), 2);
    assert_eq!(status.gates[0].name, "spec-approval");
    assert_eq!(status.gates[0].status, "approved");
    assert_eq!(status.gates[0].approved_at, Some(at("2026-01-01T12:00:00Z")));
    assert_eq!(status.gates[1].name, "plan-approval");
    assert!(status.gates[1].is_pending());
    assert_eq!(status.gates[1].approved_at, None);
}

#[test]
fn parses_plan_phase_list() {
    let status = parse_status(FULL_STATUS);
    assert_eq!(status.plan_phases.len(), 3);
    assert_eq!(status.plan_phases[0].id, "p1");
    assert!(status.plan_phases[0].is_complete());
    assert_eq!(status.plan_phases[1].title, "Add the retry loop");
    assert_eq!(status.plan_phases[2].status, "todo");
}

#[test]
fn unknown_keys_and_comments_are_ignored() {
    let status = parse_status(
        "protocol: spir\nfuture_field: whatever\nphase: plan # trailing comment\n",
    );
    assert_eq!(status.protocol.as_deref(), Some("spir"));
    assert_eq!(status.phase.as_deref(), Some("plan"));
}

#[test]
fn empty_input_parses_to_default() {
    assert_eq!(parse_status(""), StatusFile::default());
    assert_eq!(parse_status("\n\n# only comments\n"), StatusFile::default());
}

#[test]
fn pending_gate_picks_first_by_conventional_order() {
    // File order is pr before spec; conventional order must still pick spec.
    let status = parse_status(
        "gates:\n  pr-ready:\n    status: pending\n    requested_at: 2026-01-05T00:00:00Z\n  spec-approval:\n    status: pending\n    requested_at: 2026-01-06T00:00:00Z\n",
    );
    let gate = pending_gate(&status).unwrap();
    assert_eq!(gate.gate, "spec-approval");
    assert_eq!(gate.label, "spec review");
}

#[test]
fn pending_gate_requires_requested_at() {
    let status = parse_status("gates:\n  plan-approval:\n    status: pending\n");
    assert_eq!(pending_gate(&status), None);
}

#[yare::parameterized(
    spec = { "spec-approval", "spec review" },
    plan = { "plan-approval", "plan review" },
    pr = { "pr-ready", "PR review" },
    bare_pr = { "pr", "PR review" },
)]
fn pending_gate_labels(name: &str, label: &str) {
    let raw = format!("gates:\n  {name}:\n    status: pending\n    requested_at: 2026-01-05T00:00:00Z\n");
    let gate = pending_gate(&parse_status(&raw)).unwrap();
    assert_eq!(gate.label, label);
}

#[test]
fn idle_ms_sums_closed_and_open_intervals() {
    let status = parse_status(FULL_STATUS);
    // spec gate: 1h closed interval. plan gate: pending since 09:00.
    let now = at("2026-01-02T10:30:00Z");
    let expected = 3_600_000 + 5_400_000;
    assert_eq!(idle_ms(&status, now), expected);
}

#[test]
fn idle_ms_ignores_gates_without_requests() {
    let status = parse_status("gates:\n  spec-approval:\n    status: approved\n");
    assert_eq!(idle_ms(&status, chrono::Utc::now()), 0);
}

#[test]
fn workspace_gate_scan_reads_project_dirs() {
    let dir = tempfile::tempdir().unwrap();
    let project = dir.path().join("codev/projects/0042-sample");
    std::fs::create_dir_all(&project).unwrap();
    std::fs::write(
        project.join("status.yaml"),
        "protocol: spir\nphase: specify\ngates:\n  spec-approval:\n    status: pending\n    requested_at: 2026-01-05T00:00:00Z\n",
    )
    .unwrap();

    let gate = pending_gate_for_workspace(dir.path()).unwrap();
    assert_eq!(gate.label, "spec review");

    let empty = tempfile::tempdir().unwrap();
    assert_eq!(pending_gate_for_workspace(empty.path()), None);
}
