// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Numbered, forward-only schema migrations for the session store.
//!
//! Applied versions are recorded in `schema_migrations`; each step runs at
//! most once and steps never run out of order. Column additions use one
//! `ALTER TABLE ... ADD COLUMN` per migration so that a database written by
//! any past release upgrades cleanly.

use chrono::Utc;
use rusqlite::Connection;

use crate::session_store::StoreError;

/// Current schema version. v11 added `label`, v12 added `cwd`.
pub const SCHEMA_VERSION: i64 = 12;

const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "CREATE TABLE terminal_sessions (
            id TEXT PRIMARY KEY,
            workspace_path TEXT NOT NULL,
            type TEXT CHECK(type IN ('architect','builder','shell')),
            role_id TEXT,
            pid INTEGER,
            created_at TEXT DEFAULT (datetime('now'))
        )",
    ),
    (
        2,
        "CREATE INDEX idx_terminal_sessions_workspace ON terminal_sessions(workspace_path)",
    ),
    (
        3,
        "CREATE INDEX idx_terminal_sessions_type ON terminal_sessions(type)",
    ),
    (
        4,
        "CREATE TABLE open_file_tabs (
            workspace_path TEXT NOT NULL,
            tab_id TEXT NOT NULL,
            file_path TEXT NOT NULL,
            PRIMARY KEY (workspace_path, tab_id)
        )",
    ),
    (
        5,
        "CREATE TABLE workspaces (
            path TEXT PRIMARY KEY,
            activated_at TEXT DEFAULT (datetime('now'))
        )",
    ),
    (6, "ALTER TABLE workspaces ADD COLUMN control_port INTEGER"),
    (7, "ALTER TABLE terminal_sessions ADD COLUMN shellper_socket TEXT"),
    (8, "ALTER TABLE terminal_sessions ADD COLUMN shellper_pid INTEGER"),
    (
        9,
        "ALTER TABLE terminal_sessions ADD COLUMN shellper_start_time INTEGER",
    ),
    (10, "ALTER TABLE workspaces ADD COLUMN last_seen_at TEXT"),
    (11, "ALTER TABLE terminal_sessions ADD COLUMN label TEXT"),
    (12, "ALTER TABLE terminal_sessions ADD COLUMN cwd TEXT"),
];

/// Apply all pending migrations to an open connection.
pub(crate) fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        )",
    )?;

    let current: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )?;

    for (version, sql) in MIGRATIONS {
        if *version <= current {
            continue;
        }
        conn.execute_batch(sql)?;
        conn.execute(
            "INSERT INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
            rusqlite::params![version, Utc::now().to_rfc3339()],
        )?;
        tracing::debug!(version, "applied session store migration");
    }

    Ok(())
}

#[cfg(test)]
#[path = "migrations_tests.rs"]
mod tests;
