// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The terminal registry: workspace → role id → session id.
//!
//! The in-memory map is authoritative at runtime; SQLite mirrors it so
//! shellper-backed sessions can be found again after a restart. Persistence
//! is best-effort — a database error is logged and folded away, never
//! surfaced to a caller.
//!
//! Entries hold session *ids*, not sessions. Anything that mutates an entry
//! re-looks it up through the map at mutation time; holding a captured entry
//! across an await or a callback registration is how stale-slot bugs happen
//! (an entry object may be replaced wholesale between registration and
//! invocation).

mod reconcile;

pub use reconcile::{reconcile_sessions, ReconcileOutcome};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use af_core::{RoleId, SessionId, ShellperLocator, TabId, TerminalKind, WorkspacePath};
use af_storage::{SessionStore, TerminalSessionRow};

/// Set while startup reconciliation is running. Gates the dashboard's
/// on-the-fly shellper reconnect (shellper evicts the older of two clients,
/// so a race here corrupts the session) and the workspace listing.
static RECONCILING: AtomicBool = AtomicBool::new(false);

pub fn is_reconciling() -> bool {
    RECONCILING.load(Ordering::SeqCst)
}

pub(crate) fn set_reconciling(value: bool) {
    RECONCILING.store(value, Ordering::SeqCst);
}

/// Per-workspace registry entry.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceTerminalsEntry {
    pub architect: Option<SessionId>,
    pub builders: HashMap<RoleId, SessionId>,
    pub shells: HashMap<RoleId, SessionId>,
    /// Open file tabs shown by the dashboard (persisted convenience).
    pub tabs: HashMap<TabId, String>,
}

impl WorkspaceTerminalsEntry {
    /// Remove any reference to `id` (architect slot, builders, shells).
    /// Returns true when something was removed.
    pub fn remove_session(&mut self, id: &SessionId) -> bool {
        let mut removed = false;
        if self.architect.as_ref() == Some(id) {
            self.architect = None;
            removed = true;
        }
        let before = self.builders.len() + self.shells.len();
        self.builders.retain(|_, sid| sid != id);
        self.shells.retain(|_, sid| sid != id);
        removed || before != self.builders.len() + self.shells.len()
    }

    /// All referenced session ids.
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.architect
            .iter()
            .chain(self.builders.values())
            .chain(self.shells.values())
            .cloned()
            .collect()
    }

    pub fn terminal_count(&self) -> usize {
        usize::from(self.architect.is_some()) + self.builders.len() + self.shells.len()
    }
}

/// Authoritative in-memory mapping plus its SQLite mirror.
pub struct TerminalRegistry {
    entries: Mutex<HashMap<WorkspacePath, WorkspaceTerminalsEntry>>,
    store: Arc<SessionStore>,
}

impl TerminalRegistry {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            store,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// Snapshot of the entry, creating an empty one if absent. Idempotent.
    pub fn get_or_create_entry(&self, workspace: &WorkspacePath) -> WorkspaceTerminalsEntry {
        self.entries
            .lock()
            .entry(workspace.clone())
            .or_default()
            .clone()
    }

    pub fn contains(&self, workspace: &WorkspacePath) -> bool {
        self.entries.lock().contains_key(workspace)
    }

    pub fn workspaces(&self) -> Vec<WorkspacePath> {
        self.entries.lock().keys().cloned().collect()
    }

    /// Read-only view of an existing entry.
    pub fn with_entry<R>(
        &self,
        workspace: &WorkspacePath,
        f: impl FnOnce(&WorkspaceTerminalsEntry) -> R,
    ) -> Option<R> {
        self.entries.lock().get(workspace).map(f)
    }

    /// Mutate the entry, creating it if absent. The closure runs under the
    /// map lock: callers must not block inside it.
    pub fn update_entry<R>(
        &self,
        workspace: &WorkspacePath,
        f: impl FnOnce(&mut WorkspaceTerminalsEntry) -> R,
    ) -> R {
        f(self.entries.lock().entry(workspace.clone()).or_default())
    }

    /// Evict a workspace entry.
    pub fn remove_entry(&self, workspace: &WorkspacePath) -> Option<WorkspaceTerminalsEntry> {
        self.entries.lock().remove(workspace)
    }

    /// Install a session id under its role slot. Last write wins on a
    /// duplicate role; the displaced id (if any) is returned.
    pub fn install(
        &self,
        workspace: &WorkspacePath,
        kind: TerminalKind,
        role_id: Option<&RoleId>,
        session_id: &SessionId,
    ) -> Option<SessionId> {
        self.update_entry(workspace, |entry| match (kind, role_id) {
            (TerminalKind::Architect, _) => entry.architect.replace(session_id.clone()),
            (TerminalKind::Builder, Some(role)) => {
                entry.builders.insert(role.clone(), session_id.clone())
            }
            (TerminalKind::Shell, Some(role)) => {
                entry.shells.insert(role.clone(), session_id.clone())
            }
            // Role-less builders/shells have no slot; nothing to install.
            (_, None) => None,
        })
    }

    /// Next shell role id: `shell-(maxN+1)` over live slots and persisted
    /// rows. Numbering only grows; gaps are never reused.
    pub fn allocate_shell_role(&self, workspace: &WorkspacePath) -> RoleId {
        let live_max = {
            let mut entries = self.entries.lock();
            let entry = entries.entry(workspace.clone()).or_default();
            entry
                .shells
                .keys()
                .filter_map(RoleId::shell_index)
                .max()
                .unwrap_or(0)
        };
        let persisted_max = self
            .list(workspace)
            .iter()
            .filter(|row| row.kind == TerminalKind::Shell)
            .filter_map(|row| row.role_id.as_ref().and_then(RoleId::shell_index))
            .max()
            .unwrap_or(0);
        RoleId::shell(live_max.max(persisted_max) + 1)
    }

    /// Upsert the persisted identity for a session.
    ///
    /// Silent no-op when the workspace is not in the active registry — a
    /// row for an orphaned workspace would ghost forever. Errors are
    /// swallowed: memory is authoritative at runtime.
    #[allow(clippy::too_many_arguments)]
    pub fn persist(
        &self,
        session_id: &SessionId,
        workspace: &WorkspacePath,
        kind: TerminalKind,
        role_id: Option<&RoleId>,
        pid: Option<i64>,
        cwd: Option<&str>,
        label: Option<&str>,
        shellper: Option<&ShellperLocator>,
    ) {
        if !self.contains(workspace) {
            debug!(
                session = %session_id,
                workspace = %workspace,
                "skipping persist for inactive workspace"
            );
            return;
        }
        let row = TerminalSessionRow {
            id: session_id.clone(),
            workspace_path: workspace.clone(),
            kind,
            role_id: role_id.cloned(),
            pid,
            shellper: shellper.cloned(),
            label: label.map(str::to_string),
            cwd: cwd.map(str::to_string),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        if let Err(e) = self.store.upsert_session(&row) {
            warn!(session = %session_id, error = %e, "failed to persist terminal session");
        }
    }

    /// Delete the row and scrub every entry referencing the session.
    pub fn forget(&self, session_id: &SessionId) {
        if let Err(e) = self.store.delete_session(session_id) {
            warn!(session = %session_id, error = %e, "failed to delete terminal session row");
        }
        let mut entries = self.entries.lock();
        for entry in entries.values_mut() {
            entry.remove_session(session_id);
        }
    }

    /// Delete every persisted row for a workspace.
    pub fn forget_workspace(&self, workspace: &WorkspacePath) {
        if let Err(e) = self.store.delete_workspace_sessions(workspace) {
            warn!(workspace = %workspace, error = %e, "failed to delete workspace session rows");
        }
    }

    /// Persisted rows for a workspace; empty on DB error.
    pub fn list(&self, workspace: &WorkspacePath) -> Vec<TerminalSessionRow> {
        match self.store.list_sessions(workspace) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(workspace = %workspace, error = %e, "failed to list terminal sessions");
                Vec::new()
            }
        }
    }

    /// Every persisted row; empty on DB error (the Tower then proceeds with
    /// an empty registry).
    pub fn list_all(&self) -> Vec<TerminalSessionRow> {
        match self.store.list_all() {
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, "failed to read terminal_sessions, starting empty");
                Vec::new()
            }
        }
    }

    /// Load persisted tabs into the entry (activation path).
    pub fn load_tabs(&self, workspace: &WorkspacePath) {
        let tabs = match self.store.tabs(workspace) {
            Ok(tabs) => tabs,
            Err(e) => {
                warn!(workspace = %workspace, error = %e, "failed to load open-file tabs");
                return;
            }
        };
        self.update_entry(workspace, |entry| {
            entry.tabs = tabs.into_iter().collect();
        });
    }

    /// Record an open-file tab (entry + store).
    pub fn put_tab(&self, workspace: &WorkspacePath, tab: &TabId, file_path: &str) {
        self.update_entry(workspace, |entry| {
            entry.tabs.insert(tab.clone(), file_path.to_string());
        });
        if let Err(e) = self.store.put_tab(workspace, tab, file_path) {
            warn!(workspace = %workspace, error = %e, "failed to persist open-file tab");
        }
    }

    /// Remove an open-file tab (entry + store).
    pub fn remove_tab(&self, workspace: &WorkspacePath, tab: &TabId) {
        self.update_entry(workspace, |entry| {
            entry.tabs.remove(tab);
        });
        if let Err(e) = self.store.remove_tab(workspace, tab) {
            warn!(workspace = %workspace, error = %e, "failed to remove open-file tab");
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
