// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn open_store() -> (tempfile::TempDir, SessionStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SessionStore::open(dir.path().join("tower.db")).unwrap();
    (dir, store)
}

fn row(id: &str, workspace: &str, kind: TerminalKind, role: Option<&str>) -> TerminalSessionRow {
    TerminalSessionRow {
        id: SessionId::new(id),
        workspace_path: WorkspacePath::new(workspace).unwrap(),
        kind,
        role_id: role.map(RoleId::new),
        pid: Some(4242),
        shellper: None,
        label: None,
        cwd: None,
        created_at: "2026-01-01T00:00:00Z".to_string(),
    }
}

#[test]
fn persist_load_persist_preserves_every_column() {
    let (_dir, store) = open_store();

    let full = TerminalSessionRow {
        id: SessionId::new("sess-1"),
        workspace_path: WorkspacePath::new("/home/dev/project").unwrap(),
        kind: TerminalKind::Builder,
        role_id: Some(RoleId::new("builder-spir-126")),
        pid: Some(991),
        shellper: Some(ShellperLocator::new("/run/shellper/sess-1.sock", 1200, 1700000000)),
        label: Some("retry loop".to_string()),
        cwd: Some("/home/dev/project/.builders/spir-126".to_string()),
        created_at: "2026-02-03T04:05:06Z".to_string(),
    };

    store.upsert_session(&full).unwrap();
    let loaded = store.get_session(&full.id).unwrap().unwrap();
    assert_eq!(loaded, full);

    // Second persist of the loaded row must be byte-stable.
    store.upsert_session(&loaded).unwrap();
    let again = store.get_session(&full.id).unwrap().unwrap();
    assert_eq!(again, full);
}

#[test]
fn upsert_updates_in_place() {
    let (_dir, store) = open_store();
    let mut r = row("sess-1", "/w", TerminalKind::Shell, Some("shell-1"));
    store.upsert_session(&r).unwrap();

    r.label = Some("renamed".to_string());
    store.upsert_session(&r).unwrap();

    let all = store.list_all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].label.as_deref(), Some("renamed"));
}

#[test]
fn list_sessions_filters_by_workspace() {
    let (_dir, store) = open_store();
    store
        .upsert_session(&row("a", "/w1", TerminalKind::Architect, None))
        .unwrap();
    store
        .upsert_session(&row("b", "/w2", TerminalKind::Shell, Some("shell-1")))
        .unwrap();

    let w1 = WorkspacePath::new("/w1").unwrap();
    let sessions = store.list_sessions(&w1).unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id.as_str(), "a");
}

#[test]
fn delete_session_removes_only_that_row() {
    let (_dir, store) = open_store();
    store
        .upsert_session(&row("a", "/w", TerminalKind::Shell, Some("shell-1")))
        .unwrap();
    store
        .upsert_session(&row("b", "/w", TerminalKind::Shell, Some("shell-2")))
        .unwrap();

    store.delete_session(&SessionId::new("a")).unwrap();
    let remaining = store.list_all().unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id.as_str(), "b");
}

#[test]
fn delete_nonpersistent_keeps_shellper_rows() {
    let (_dir, store) = open_store();
    let ws = WorkspacePath::new("/w").unwrap();

    let mut persistent = row("keep", "/w", TerminalKind::Shell, Some("shell-1"));
    persistent.shellper = Some(ShellperLocator::new("/run/s.sock", 10, 20));
    store.upsert_session(&persistent).unwrap();
    store
        .upsert_session(&row("drop", "/w", TerminalKind::Shell, Some("shell-2")))
        .unwrap();

    store.delete_nonpersistent(&ws).unwrap();
    let remaining = store.list_sessions(&ws).unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id.as_str(), "keep");
    assert!(remaining[0].is_persistent());
}

#[test]
fn delete_workspace_sessions_removes_all_rows() {
    let (_dir, store) = open_store();
    store
        .upsert_session(&row("a", "/w", TerminalKind::Architect, None))
        .unwrap();
    store
        .upsert_session(&row("b", "/w", TerminalKind::Shell, Some("shell-1")))
        .unwrap();

    store
        .delete_workspace_sessions(&WorkspacePath::new("/w").unwrap())
        .unwrap();
    assert!(store.list_all().unwrap().is_empty());
}

#[test]
fn locator_without_pid_columns_defaults_to_zero() {
    // Rows written before the shellper_pid/start_time migrations carry only
    // the socket path; loading them must not fail.
    let (_dir, store) = open_store();
    let mut r = row("old", "/w", TerminalKind::Shell, Some("shell-1"));
    r.shellper = Some(ShellperLocator::new("/run/old.sock", 55, 66));
    store.upsert_session(&r).unwrap();

    // Simulate the pre-migration shape.
    {
        let conn = store.reader.lock();
        conn.execute(
            "UPDATE terminal_sessions SET shellper_pid = NULL, shellper_start_time = NULL",
            [],
        )
        .unwrap();
    }

    let loaded = store.get_session(&SessionId::new("old")).unwrap().unwrap();
    let locator = loaded.shellper.unwrap();
    assert_eq!(locator.host_pid, 0);
    assert_eq!(locator.host_start_time, 0);
}

#[test]
fn writes_apply_in_submission_order() {
    let (_dir, store) = open_store();
    let mut r = row("sess", "/w", TerminalKind::Shell, Some("shell-1"));
    for i in 0..50 {
        r.label = Some(format!("label-{i}"));
        store.upsert_session(&r).unwrap();
    }
    let loaded = store.get_session(&r.id).unwrap().unwrap();
    assert_eq!(loaded.label.as_deref(), Some("label-49"));
}

#[test]
fn known_workspaces_round_trip() {
    let (_dir, store) = open_store();
    let ws = WorkspacePath::new("/home/dev/project").unwrap();

    store.record_workspace(&ws, Some(7171)).unwrap();
    let known = store.known_workspaces().unwrap();
    assert_eq!(known, vec![(ws.clone(), Some(7171))]);

    store.forget_workspace(&ws).unwrap();
    assert!(store.known_workspaces().unwrap().is_empty());
}

#[test]
fn tabs_round_trip() {
    let (_dir, store) = open_store();
    let ws = WorkspacePath::new("/w").unwrap();

    store
        .put_tab(&ws, &TabId::new("tab-1"), "src/main.rs")
        .unwrap();
    store
        .put_tab(&ws, &TabId::new("tab-2"), "README.md")
        .unwrap();
    store
        .put_tab(&ws, &TabId::new("tab-1"), "src/lib.rs")
        .unwrap();

    let tabs = store.tabs(&ws).unwrap();
    assert_eq!(
        tabs,
        vec![
            (TabId::new("tab-1"), "src/lib.rs".to_string()),
            (TabId::new("tab-2"), "README.md".to_string()),
        ]
    );

    store.remove_tab(&ws, &TabId::new("tab-1")).unwrap();
    assert_eq!(store.tabs(&ws).unwrap().len(), 1);
}
