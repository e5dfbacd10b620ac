// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[yare::parameterized(
    spir = { "spir-126-retry-loop", Some(("spir", "0126")) },
    aspir = { "aspir-7-cleanup", Some(("aspir", "0007")) },
    spider_alias = { "spider-1234-legacy", Some(("spider", "1234")) },
    bugfix = { "bugfix-296-fix-crash", Some(("bugfix", "bugfix-296")) },
    feature = { "feature-12-thing", Some(("feature", "feature-12")) },
    no_number = { "scratch-pad", None },
    bare = { "scratch", None },
)]
fn derive_project_id_cases(worktree: &str, expected: Option<(&str, &str)>) {
    let derived = derive_project_id(worktree);
    assert_eq!(
        derived,
        expected.map(|(p, id)| (p.to_string(), id.to_string()))
    );
}

fn write_status(worktree: &std::path::Path, project_dir: &str, contents: &str) {
    let dir = worktree.join("codev/projects").join(project_dir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("status.yaml"), contents).unwrap();
}

#[test]
fn strict_discovery_prefers_the_matching_project_dir() {
    let root = tempfile::tempdir().unwrap();
    let worktree = root.path().join(".builders/spir-126-retry-loop");
    std::fs::create_dir_all(&worktree).unwrap();

    // Inherited, unrelated project dir plus the real one.
    write_status(&worktree, "0099-inherited", "protocol: spir\nphase: review\n");
    write_status(
        &worktree,
        "0126-retry-loop",
        "id: \"0126\"\ntitle: \"Retry loop\"\nprotocol: spir\nphase: implement\n",
    );

    let builders = discover_builders(root.path(), chrono::Utc::now());
    assert_eq!(builders.len(), 1);
    let builder = &builders[0];
    assert!(!builder.soft);
    assert_eq!(builder.project_id.as_deref(), Some("0126"));
    assert_eq!(builder.title.as_deref(), Some("Retry loop"));
    assert_eq!(builder.phase.as_deref(), Some("implement"));
    assert_eq!(builder.role_id, "builder-spir-126-retry-loop");
}

#[test]
fn soft_mode_emits_minimal_entry_from_the_worktree_name() {
    let root = tempfile::tempdir().unwrap();
    let worktree = root.path().join(".builders/bugfix-296-fix-crash");
    std::fs::create_dir_all(&worktree).unwrap();
    // A project dir exists but does not match the derived id.
    write_status(&worktree, "0050-other", "protocol: spir\nphase: review\n");

    let builders = discover_builders(root.path(), chrono::Utc::now());
    assert_eq!(builders.len(), 1);
    let builder = &builders[0];
    assert!(builder.soft);
    assert_eq!(builder.protocol.as_deref(), Some("bugfix"));
    assert_eq!(builder.project_id.as_deref(), Some("bugfix-296"));
    assert_eq!(builder.progress, 0);
    assert_eq!(builder.title, None);
}

#[test]
fn blocked_and_idle_come_from_the_gates() {
    let root = tempfile::tempdir().unwrap();
    let worktree = root.path().join(".builders/spir-7-gated");
    std::fs::create_dir_all(&worktree).unwrap();
    write_status(
        &worktree,
        "0007-gated",
        "protocol: spir\nphase: plan\ngates:\n  plan-approval:\n    status: pending\n    requested_at: 2026-01-02T09:00:00Z\n",
    );

    let now = chrono::DateTime::parse_from_rfc3339("2026-01-02T10:00:00Z")
        .unwrap()
        .with_timezone(&chrono::Utc);
    let builders = discover_builders(root.path(), now);
    let builder = &builders[0];
    assert_eq!(builder.progress, 45);
    assert_eq!(
        builder.blocked.as_ref().map(|g| g.label.as_str()),
        Some("plan review")
    );
    assert_eq!(builder.idle_ms, 3_600_000);
}

#[test]
fn missing_builders_dir_yields_empty() {
    let root = tempfile::tempdir().unwrap();
    assert!(discover_builders(root.path(), chrono::Utc::now()).is_empty());
}

#[test]
fn worktrees_are_sorted_by_name() {
    let root = tempfile::tempdir().unwrap();
    for name in ["spir-2-b", "spir-1-a", "spir-3-c"] {
        std::fs::create_dir_all(root.path().join(".builders").join(name)).unwrap();
    }
    let names: Vec<_> = discover_builders(root.path(), chrono::Utc::now())
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(names, vec!["spir-1-a", "spir-2-b", "spir-3-c"]);
}
