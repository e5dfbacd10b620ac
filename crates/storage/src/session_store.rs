// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable mirror of the terminal registry.
//!
//! The store is opened once at daemon startup. Writes are closures shipped to
//! a dedicated writer thread over a channel, so registry mutations and their
//! SQLite writes serialize in submission order without the caller holding any
//! lock across the write. Reads go through a second connection; WAL mode
//! keeps them consistent while the writer is busy.

use std::path::Path;
use std::sync::mpsc;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use af_core::{RoleId, SessionId, ShellperLocator, TabId, TerminalKind, WorkspacePath};

use crate::migrations;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("session store writer is gone")]
    WriterGone,

    #[error("failed to open session store at {0}: {1}")]
    Open(String, #[source] rusqlite::Error),
}

/// One persisted terminal session identity.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalSessionRow {
    pub id: SessionId,
    pub workspace_path: WorkspacePath,
    pub kind: TerminalKind,
    pub role_id: Option<RoleId>,
    pub pid: Option<i64>,
    pub shellper: Option<ShellperLocator>,
    pub label: Option<String>,
    pub cwd: Option<String>,
    pub created_at: String,
}

impl TerminalSessionRow {
    /// Whether this row can be reconciled after a restart.
    pub fn is_persistent(&self) -> bool {
        self.shellper.is_some()
    }
}

type WriteFn = Box<dyn FnOnce(&Connection) -> Result<(), rusqlite::Error> + Send>;

struct WriteJob {
    run: WriteFn,
    done: mpsc::SyncSender<Result<(), StoreError>>,
}

/// SQLite-backed store for terminal session identities.
pub struct SessionStore {
    write_tx: mpsc::Sender<WriteJob>,
    reader: Mutex<Connection>,
}

impl SessionStore {
    /// Open (creating and migrating as needed) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let display = path.display().to_string();

        let writer_conn =
            Connection::open(path).map_err(|e| StoreError::Open(display.clone(), e))?;
        writer_conn.pragma_update(None, "journal_mode", "WAL")?;
        writer_conn.busy_timeout(std::time::Duration::from_secs(5))?;
        migrations::migrate(&writer_conn)?;

        let reader_conn = Connection::open(path).map_err(|e| StoreError::Open(display, e))?;
        reader_conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let (write_tx, write_rx) = mpsc::channel::<WriteJob>();
        std::thread::Builder::new()
            .name("session-store-writer".to_string())
            .spawn(move || {
                for job in write_rx {
                    let result = (job.run)(&writer_conn).map_err(StoreError::from);
                    if let Err(ref e) = result {
                        tracing::warn!(error = %e, "session store write failed");
                    }
                    let _ = job.done.send(result);
                }
            })
            .map_err(|_| StoreError::WriterGone)?;

        Ok(Self {
            write_tx,
            reader: Mutex::new(reader_conn),
        })
    }

    /// Submit a write closure to the single-writer queue and wait for it.
    fn write(
        &self,
        f: impl FnOnce(&Connection) -> Result<(), rusqlite::Error> + Send + 'static,
    ) -> Result<(), StoreError> {
        let (done_tx, done_rx) = mpsc::sync_channel(1);
        self.write_tx
            .send(WriteJob {
                run: Box::new(f),
                done: done_tx,
            })
            .map_err(|_| StoreError::WriterGone)?;
        done_rx.recv().map_err(|_| StoreError::WriterGone)?
    }

    /// Upsert a session row by id, preserving `created_at` on conflict.
    pub fn upsert_session(&self, row: &TerminalSessionRow) -> Result<(), StoreError> {
        let row = row.clone();
        self.write(move |conn| {
            conn.execute(
                "INSERT INTO terminal_sessions (
                    id, workspace_path, type, role_id, pid,
                    shellper_socket, shellper_pid, shellper_start_time,
                    label, cwd, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                ON CONFLICT(id) DO UPDATE SET
                    workspace_path = excluded.workspace_path,
                    type = excluded.type,
                    role_id = excluded.role_id,
                    pid = excluded.pid,
                    shellper_socket = excluded.shellper_socket,
                    shellper_pid = excluded.shellper_pid,
                    shellper_start_time = excluded.shellper_start_time,
                    label = excluded.label,
                    cwd = excluded.cwd",
                params![
                    row.id.as_str(),
                    row.workspace_path.as_str(),
                    row.kind.as_str(),
                    row.role_id.as_ref().map(|r| r.as_str().to_string()),
                    row.pid,
                    row.shellper
                        .as_ref()
                        .map(|l| l.socket_path.to_string_lossy().into_owned()),
                    row.shellper.as_ref().map(|l| l.host_pid),
                    row.shellper.as_ref().map(|l| l.host_start_time),
                    row.label,
                    row.cwd,
                    row.created_at,
                ],
            )?;
            Ok(())
        })
    }

    /// Delete the row for one session id.
    pub fn delete_session(&self, id: &SessionId) -> Result<(), StoreError> {
        let id = id.clone();
        self.write(move |conn| {
            conn.execute(
                "DELETE FROM terminal_sessions WHERE id = ?1",
                [id.as_str()],
            )?;
            Ok(())
        })
    }

    /// Delete every session row for a workspace.
    pub fn delete_workspace_sessions(&self, workspace: &WorkspacePath) -> Result<(), StoreError> {
        let workspace = workspace.clone();
        self.write(move |conn| {
            conn.execute(
                "DELETE FROM terminal_sessions WHERE workspace_path = ?1",
                [workspace.as_str()],
            )?;
            Ok(())
        })
    }

    /// Delete the workspace's rows that have no shellper locator.
    ///
    /// Used on deactivation: inline PTYs die with the workspace, shellper
    /// backed rows stay eligible for reconciliation.
    pub fn delete_nonpersistent(&self, workspace: &WorkspacePath) -> Result<(), StoreError> {
        let workspace = workspace.clone();
        self.write(move |conn| {
            conn.execute(
                "DELETE FROM terminal_sessions
                 WHERE workspace_path = ?1 AND shellper_socket IS NULL",
                [workspace.as_str()],
            )?;
            Ok(())
        })
    }

    /// All rows for one workspace.
    pub fn list_sessions(
        &self,
        workspace: &WorkspacePath,
    ) -> Result<Vec<TerminalSessionRow>, StoreError> {
        let conn = self.reader.lock();
        let mut stmt = conn.prepare(
            "SELECT id, workspace_path, type, role_id, pid,
                    shellper_socket, shellper_pid, shellper_start_time,
                    label, cwd, created_at
             FROM terminal_sessions WHERE workspace_path = ?1
             ORDER BY created_at",
        )?;
        let rows = stmt.query_map([workspace.as_str()], map_row)?;
        collect_rows(rows)
    }

    /// Every persisted row, across all workspaces.
    pub fn list_all(&self) -> Result<Vec<TerminalSessionRow>, StoreError> {
        let conn = self.reader.lock();
        let mut stmt = conn.prepare(
            "SELECT id, workspace_path, type, role_id, pid,
                    shellper_socket, shellper_pid, shellper_start_time,
                    label, cwd, created_at
             FROM terminal_sessions ORDER BY created_at",
        )?;
        let rows = stmt.query_map([], map_row)?;
        collect_rows(rows)
    }

    /// Fetch one row by session id.
    pub fn get_session(&self, id: &SessionId) -> Result<Option<TerminalSessionRow>, StoreError> {
        let conn = self.reader.lock();
        let mut stmt = conn.prepare(
            "SELECT id, workspace_path, type, role_id, pid,
                    shellper_socket, shellper_pid, shellper_start_time,
                    label, cwd, created_at
             FROM terminal_sessions WHERE id = ?1",
        )?;
        Ok(stmt.query_row([id.as_str()], map_row).optional()?)
    }

    /// Record a workspace as known (activation), updating the port on re-activation.
    pub fn record_workspace(
        &self,
        workspace: &WorkspacePath,
        control_port: Option<u16>,
    ) -> Result<(), StoreError> {
        let workspace = workspace.clone();
        self.write(move |conn| {
            conn.execute(
                "INSERT INTO workspaces (path, activated_at, control_port, last_seen_at)
                 VALUES (?1, ?2, ?3, ?2)
                 ON CONFLICT(path) DO UPDATE SET
                    control_port = excluded.control_port,
                    last_seen_at = excluded.last_seen_at",
                params![
                    workspace.as_str(),
                    Utc::now().to_rfc3339(),
                    control_port.map(i64::from),
                ],
            )?;
            Ok(())
        })
    }

    /// Remove a workspace from the known set (deactivation).
    pub fn forget_workspace(&self, workspace: &WorkspacePath) -> Result<(), StoreError> {
        let workspace = workspace.clone();
        self.write(move |conn| {
            conn.execute(
                "DELETE FROM workspaces WHERE path = ?1",
                [workspace.as_str()],
            )?;
            conn.execute(
                "DELETE FROM open_file_tabs WHERE workspace_path = ?1",
                [workspace.as_str()],
            )?;
            Ok(())
        })
    }

    /// Known workspaces with their recorded control ports.
    pub fn known_workspaces(&self) -> Result<Vec<(WorkspacePath, Option<u16>)>, StoreError> {
        let conn = self.reader.lock();
        let mut stmt = conn.prepare("SELECT path, control_port FROM workspaces ORDER BY path")?;
        let rows = stmt.query_map([], |row| {
            let path: String = row.get(0)?;
            let port: Option<i64> = row.get(1)?;
            Ok((path, port))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (path, port) = row?;
            if let Ok(ws) = WorkspacePath::new(&path) {
                out.push((ws, port.and_then(|p| u16::try_from(p).ok())));
            }
        }
        Ok(out)
    }

    /// Persist an open-file tab for the dashboard.
    pub fn put_tab(
        &self,
        workspace: &WorkspacePath,
        tab: &TabId,
        file_path: &str,
    ) -> Result<(), StoreError> {
        let workspace = workspace.clone();
        let tab = tab.clone();
        let file_path = file_path.to_string();
        self.write(move |conn| {
            conn.execute(
                "INSERT INTO open_file_tabs (workspace_path, tab_id, file_path)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(workspace_path, tab_id) DO UPDATE SET
                    file_path = excluded.file_path",
                params![workspace.as_str(), tab.as_str(), file_path],
            )?;
            Ok(())
        })
    }

    /// Remove one open-file tab.
    pub fn remove_tab(&self, workspace: &WorkspacePath, tab: &TabId) -> Result<(), StoreError> {
        let workspace = workspace.clone();
        let tab = tab.clone();
        self.write(move |conn| {
            conn.execute(
                "DELETE FROM open_file_tabs WHERE workspace_path = ?1 AND tab_id = ?2",
                params![workspace.as_str(), tab.as_str()],
            )?;
            Ok(())
        })
    }

    /// All persisted tabs for a workspace.
    pub fn tabs(&self, workspace: &WorkspacePath) -> Result<Vec<(TabId, String)>, StoreError> {
        let conn = self.reader.lock();
        let mut stmt = conn.prepare(
            "SELECT tab_id, file_path FROM open_file_tabs
             WHERE workspace_path = ?1 ORDER BY tab_id",
        )?;
        let rows = stmt.query_map([workspace.as_str()], |row| {
            Ok((TabId::new(row.get::<_, String>(0)?), row.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn collect_rows(
    rows: impl Iterator<Item = rusqlite::Result<TerminalSessionRow>>,
) -> Result<Vec<TerminalSessionRow>, StoreError> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn map_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TerminalSessionRow> {
    let workspace_raw: String = row.get(1)?;
    let kind_raw: String = row.get(2)?;
    let socket: Option<String> = row.get(5)?;

    let workspace_path = WorkspacePath::new(&workspace_raw)
        .map_err(|e| conversion_error(1, format!("bad workspace path {workspace_raw:?}: {e}")))?;
    let kind = TerminalKind::parse(&kind_raw)
        .ok_or_else(|| conversion_error(2, format!("unknown terminal type {kind_raw:?}")))?;

    let shellper = socket.map(|socket_path| ShellperLocator {
        socket_path: socket_path.into(),
        host_pid: row.get::<_, Option<i32>>(6).unwrap_or(None).unwrap_or(0),
        host_start_time: row.get::<_, Option<i64>>(7).unwrap_or(None).unwrap_or(0),
    });

    Ok(TerminalSessionRow {
        id: SessionId::new(row.get::<_, String>(0)?),
        workspace_path,
        kind,
        role_id: row.get::<_, Option<String>>(3)?.map(RoleId::new),
        pid: row.get(4)?,
        shellper,
        label: row.get(8)?,
        cwd: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn conversion_error(index: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        index,
        rusqlite::types::Type::Text,
        std::io::Error::new(std::io::ErrorKind::InvalidData, message).into(),
    )
}

#[cfg(test)]
#[path = "session_store_tests.rs"]
mod tests;
