// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Startup reconciliation of persisted sessions against live shellper hosts.
//!
//! Runs before the HTTP server starts answering workspace requests. Probes
//! are issued in parallel with bounded concurrency; their effects on the
//! registry are applied in a sequential fold so duplicate role ids resolve
//! last-write-wins without concurrent entry mutation.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};

use af_core::SharedClock;
use af_storage::TerminalSessionRow;

use crate::event::TowerEvent;
use crate::pty::{PtySession, SessionSupervisor};
use crate::shellper::{ShellperConnector, ShellperError};

use super::{set_reconciling, TerminalRegistry};

/// Probes in flight at once.
const PROBE_CONCURRENCY: usize = 5;

/// Counts from one reconciliation sweep.
#[derive(Debug, Default, PartialEq)]
pub struct ReconcileOutcome {
    pub reattached: usize,
    pub deleted: usize,
}

/// Clears the reconciling flag on every exit path.
struct ReconcilingGuard;

impl ReconcilingGuard {
    fn set() -> Self {
        set_reconciling(true);
        ReconcilingGuard
    }
}

impl Drop for ReconcilingGuard {
    fn drop(&mut self) {
        set_reconciling(false);
    }
}

/// Reconcile every persisted row against the world.
///
/// Rows whose workspace directory is gone, rows without a shellper locator,
/// and rows whose probe fails are deleted. Rows whose probe succeeds become
/// live shellper-backed sessions installed under their role ids. A failure
/// on one row never aborts the others.
pub async fn reconcile_sessions(
    registry: &TerminalRegistry,
    supervisor: &SessionSupervisor,
    connector: Arc<dyn ShellperConnector>,
    clock: SharedClock,
    event_tx: mpsc::Sender<TowerEvent>,
    probe_timeout: Duration,
) -> ReconcileOutcome {
    let _guard = ReconcilingGuard::set();
    let mut outcome = ReconcileOutcome::default();

    let rows = registry.list_all();
    if rows.is_empty() {
        return outcome;
    }
    info!(rows = rows.len(), "reconciling persisted terminal sessions");

    let mut candidates = Vec::new();
    for row in rows {
        if !row.workspace_path.exists() {
            warn!(
                session = %row.id,
                workspace = %row.workspace_path,
                "workspace directory is gone, dropping session row"
            );
            registry.forget(&row.id);
            outcome.deleted += 1;
            continue;
        }
        match &row.shellper {
            Some(_) => candidates.push(row),
            None => {
                // Inline PTYs cannot outlive the process that owned them.
                registry.forget(&row.id);
                outcome.deleted += 1;
            }
        }
    }

    // Parallel probe, bounded. Results are collected, then applied
    // sequentially below.
    let probed: Vec<(TerminalSessionRow, Result<_, ShellperError>)> =
        stream::iter(candidates.into_iter().map(|row| {
            let connector = Arc::clone(&connector);
            async move {
                // Checked above; rows without a locator never reach here.
                let result = match &row.shellper {
                    Some(locator) => connector.probe(locator, probe_timeout).await,
                    None => Err(ShellperError::HostDead),
                };
                (row, result)
            }
        }))
        .buffer_unordered(PROBE_CONCURRENCY)
        .collect()
        .await;

    for (row, result) in probed {
        match result {
            Ok(handle) => {
                let cwd = row
                    .cwd
                    .clone()
                    .map(PathBuf::from)
                    // Rows written before the cwd migration fall back to the
                    // workspace root.
                    .unwrap_or_else(|| row.workspace_path.as_path().to_path_buf());
                let session = PtySession::attach_shellper(
                    row.id.clone(),
                    row.workspace_path.clone(),
                    row.kind,
                    row.role_id.clone(),
                    cwd,
                    row.label.clone(),
                    handle,
                    clock.clone(),
                    event_tx.clone(),
                );
                let displaced = registry.install(
                    &row.workspace_path,
                    row.kind,
                    row.role_id.as_ref(),
                    &row.id,
                );
                if let Some(old_id) = displaced {
                    // Duplicate role id: the later row wins, the displaced
                    // session is detached and dropped.
                    if let Some(old) = supervisor.remove(&old_id) {
                        old.detach();
                    }
                }
                supervisor.insert(session);
                outcome.reattached += 1;
                info!(
                    session = %row.id,
                    workspace = %row.workspace_path,
                    role = ?row.role_id,
                    "reattached shellper session"
                );
            }
            Err(e) => {
                info!(session = %row.id, error = %e, "shellper probe failed, dropping session row");
                registry.forget(&row.id);
                outcome.deleted += 1;
            }
        }
    }

    info!(
        reattached = outcome.reattached,
        deleted = outcome.deleted,
        "terminal session reconciliation complete"
    );
    outcome
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
