// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace lifecycle: activation, deactivation, terminal launching, and
//! architect supervision.
//!
//! The module-level dependency slot is one of exactly two process-wide
//! mutable globals (the other is the registry's reconciling flag). It is
//! installed once at startup after the stores and registry exist; until
//! then every entrypoint answers "still starting up" instead of touching
//! half-built state.

mod supervise;

pub use supervise::{run_event_loop, ArchitectState, ArchitectSupervision, RestartDecision};
pub(crate) use supervise::handle_event;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use af_core::{RoleId, SessionId, SharedClock, ShellConfig, TerminalKind, WorkspacePath};
use af_storage::SessionStore;

use crate::event::TowerEvent;
use crate::overview::status::{pending_gate_for_workspace, PendingGate};
use crate::pty::{InlineSpawn, PtySession, SessionDescription, SessionSupervisor};
use crate::registry::TerminalRegistry;

/// Module-level dependency slot. Init-then-freeze: set once by startup,
/// cleared only by shutdown.
static DEPS: RwLock<Option<Arc<Deps>>> = RwLock::new(None);

pub fn init_deps(deps: Arc<Deps>) {
    *DEPS.write() = Some(deps);
}

pub fn deps() -> Option<Arc<Deps>> {
    DEPS.read().clone()
}

pub fn clear_deps() {
    *DEPS.write() = None;
}

#[derive(Debug, Error, PartialEq)]
pub enum LifecycleError {
    /// The dependency slot has not been initialized yet.
    #[error("still starting up")]
    StartingUp,

    #[error("{0}")]
    InvalidPath(String),

    #[error("failed to load workspace config: {0}")]
    Config(String),

    #[error("workspace not active")]
    NotActive,

    #[error("session not found")]
    SessionNotFound,

    #[error("an architect is already running for this workspace")]
    ArchitectAlive,

    #[error("failed to spawn terminal: {0}")]
    Spawn(String),
}

/// Everything the lifecycle entrypoints need, wired once at startup.
pub struct Deps {
    pub store: Arc<SessionStore>,
    pub registry: Arc<TerminalRegistry>,
    pub supervisor: Arc<SessionSupervisor>,
    pub clock: SharedClock,
    pub event_tx: mpsc::Sender<TowerEvent>,
    pub control_port: u16,
    pub started_at: Instant,
    workspaces: Mutex<HashMap<WorkspacePath, Arc<WorkspaceRuntime>>>,
}

impl Deps {
    pub fn new(
        store: Arc<SessionStore>,
        registry: Arc<TerminalRegistry>,
        supervisor: Arc<SessionSupervisor>,
        clock: SharedClock,
        event_tx: mpsc::Sender<TowerEvent>,
        control_port: u16,
    ) -> Self {
        Self {
            store,
            registry,
            supervisor,
            clock,
            event_tx,
            control_port,
            started_at: Instant::now(),
            workspaces: Mutex::new(HashMap::new()),
        }
    }

    pub fn runtime(&self, workspace: &WorkspacePath) -> Option<Arc<WorkspaceRuntime>> {
        self.workspaces.lock().get(workspace).cloned()
    }

    fn runtime_or_create(&self, workspace: &WorkspacePath) -> Arc<WorkspaceRuntime> {
        self.workspaces
            .lock()
            .entry(workspace.clone())
            .or_insert_with(|| Arc::new(WorkspaceRuntime::new()))
            .clone()
    }

    fn remove_runtime(&self, workspace: &WorkspacePath) -> Option<Arc<WorkspaceRuntime>> {
        self.workspaces.lock().remove(workspace)
    }

    pub fn known_workspaces(&self) -> Vec<WorkspacePath> {
        self.workspaces.lock().keys().cloned().collect()
    }
}

/// Per-workspace runtime state (config, activation serialization, architect
/// supervision).
pub struct WorkspaceRuntime {
    pub config: Mutex<ShellConfig>,
    /// Serializes concurrent activations of the same workspace.
    pub activate_lock: tokio::sync::Mutex<()>,
    pub architect: Mutex<ArchitectSupervision>,
}

impl WorkspaceRuntime {
    fn new() -> Self {
        Self {
            config: Mutex::new(ShellConfig::default()),
            activate_lock: tokio::sync::Mutex::new(()),
            architect: Mutex::new(ArchitectSupervision::default()),
        }
    }
}

/// Successful activation payload.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Activated {
    pub success: bool,
    pub allocated_port: Option<u16>,
}

/// One workspace in the listing.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceSummary {
    pub path: WorkspacePath,
    pub terminals: usize,
    pub architect_state: String,
}

/// Per-workspace state projection.
#[derive(Debug, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceStatus {
    pub path: WorkspacePath,
    pub architect: Option<SessionDescription>,
    pub architect_state: String,
    pub builders: Vec<SessionDescription>,
    pub shells: Vec<SessionDescription>,
    pub tabs: HashMap<String, String>,
    pub gate: Option<PendingGate>,
}

/// Request for [`launch_instance`].
pub struct LaunchRequest {
    pub workspace: WorkspacePath,
    pub kind: TerminalKind,
    /// Builder role id. Ignored for architects; shells allocate their own.
    pub role_id: Option<RoleId>,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub cols: u16,
    pub rows: u16,
    pub label: Option<String>,
}

impl LaunchRequest {
    pub fn new(workspace: WorkspacePath, kind: TerminalKind) -> Self {
        Self {
            workspace,
            kind,
            role_id: None,
            command: None,
            args: Vec::new(),
            cwd: None,
            cols: 80,
            rows: 24,
            label: None,
        }
    }
}

/// Activate a workspace: validate, load config, ensure the entry, spawn the
/// architect unless one is alive, record the workspace as known.
///
/// Concurrent activations of one workspace serialize on its runtime lock;
/// rate limiting is the HTTP layer's job.
pub async fn activate(workspace: &WorkspacePath) -> Result<Activated, LifecycleError> {
    let deps = deps().ok_or(LifecycleError::StartingUp)?;

    if !workspace.exists() {
        return Err(LifecycleError::InvalidPath(format!(
            "workspace path does not exist: {workspace}"
        )));
    }
    if workspace.is_temp() {
        return Err(LifecycleError::InvalidPath(
            "workspace path is inside a temp directory".to_string(),
        ));
    }

    let runtime = deps.runtime_or_create(workspace);
    let _serialized = runtime.activate_lock.lock().await;

    let config = match ShellConfig::load(workspace.as_path()) {
        Ok(config) => config,
        Err(e) => {
            // A failed first activation must not leave a phantom runtime.
            if !deps.registry.contains(workspace) {
                deps.remove_runtime(workspace);
            }
            return Err(LifecycleError::Config(e.to_string()));
        }
    };
    *runtime.config.lock() = config;

    deps.registry.get_or_create_entry(workspace);
    deps.registry.load_tabs(workspace);

    // Re-activation clears crash-loop protection.
    runtime.architect.lock().reset();

    let architect_alive = deps
        .registry
        .with_entry(workspace, |entry| entry.architect.clone())
        .flatten()
        .and_then(|id| deps.supervisor.get(&id))
        .map(|session| !session.is_dead())
        .unwrap_or(false);

    if architect_alive {
        runtime.architect.lock().state = ArchitectState::Running;
    } else {
        spawn_architect(&deps, &runtime, workspace)?;
    }

    if let Err(e) = deps
        .store
        .record_workspace(workspace, Some(deps.control_port))
    {
        warn!(workspace = %workspace, error = %e, "failed to record workspace");
    }

    info!(workspace = %workspace, "workspace activated");
    Ok(Activated {
        success: true,
        allocated_port: Some(deps.control_port),
    })
}

/// Spawn the architect terminal for a workspace. The caller holds the
/// activation lock or is the supervised restart path.
pub(crate) fn spawn_architect(
    deps: &Arc<Deps>,
    runtime: &Arc<WorkspaceRuntime>,
    workspace: &WorkspacePath,
) -> Result<(), LifecycleError> {
    let command_line = runtime.config.lock().architect.clone();
    let (command, args) = split_command(&command_line)?;

    runtime.architect.lock().state = ArchitectState::Spawning;

    let session = PtySession::spawn_inline(
        InlineSpawn {
            id: SessionId::generate(),
            workspace: workspace.clone(),
            kind: TerminalKind::Architect,
            role_id: None,
            command,
            args,
            cwd: workspace.as_path().to_path_buf(),
            cols: 80,
            rows: 24,
            label: None,
            env: Vec::new(),
            control_port: deps.control_port,
        },
        deps.clock.clone(),
        deps.event_tx.clone(),
    )
    .map_err(|e| {
        runtime.architect.lock().state = ArchitectState::Disabled;
        LifecycleError::Spawn(e.to_string())
    })?;

    let id = session.id().clone();
    deps.registry
        .install(workspace, TerminalKind::Architect, None, &id);
    deps.registry.persist(
        &id,
        workspace,
        TerminalKind::Architect,
        None,
        session.pid().map(i64::from),
        Some(workspace.as_str()),
        None,
        None,
    );
    deps.supervisor.insert(session);
    runtime.architect.lock().state = ArchitectState::Running;
    Ok(())
}

/// Deactivate a workspace: kill inline PTYs, detach shellper-backed ones,
/// drop non-persistent rows, evict the entry.
pub async fn deactivate(workspace: &WorkspacePath) -> Result<(), LifecycleError> {
    let deps = deps().ok_or(LifecycleError::StartingUp)?;

    let runtime = deps.remove_runtime(workspace);
    let had_entry = deps.registry.contains(workspace);
    if runtime.is_none() && !had_entry {
        return Err(LifecycleError::NotActive);
    }

    for session in deps.supervisor.list_for_workspace(workspace) {
        if session.is_shellper_backed() {
            session.detach();
        } else {
            session.kill();
        }
        deps.supervisor.remove(session.id());
    }

    if let Err(e) = deps.store.delete_nonpersistent(workspace) {
        warn!(workspace = %workspace, error = %e, "failed to drop non-persistent rows");
    }
    if let Err(e) = deps.store.forget_workspace(workspace) {
        warn!(workspace = %workspace, error = %e, "failed to forget workspace");
    }
    deps.registry.remove_entry(workspace);

    info!(workspace = %workspace, "workspace deactivated");
    Ok(())
}

/// Per-workspace state, or `NotActive` for unknown workspaces.
pub fn get_status(workspace: &WorkspacePath) -> Result<WorkspaceStatus, LifecycleError> {
    let deps = deps().ok_or(LifecycleError::StartingUp)?;
    let entry = deps
        .registry
        .with_entry(workspace, |e| e.clone())
        .ok_or(LifecycleError::NotActive)?;

    let describe = |id: &SessionId| deps.supervisor.get(id).map(|s| s.describe());
    let architect = entry.architect.as_ref().and_then(describe);
    let mut builders: Vec<_> = entry.builders.values().filter_map(describe).collect();
    let mut shells: Vec<_> = entry.shells.values().filter_map(describe).collect();
    builders.sort_by(|a, b| a.role_id.cmp(&b.role_id));
    shells.sort_by(|a, b| a.role_id.cmp(&b.role_id));

    let architect_state = deps
        .runtime(workspace)
        .map(|r| r.architect.lock().state.to_string())
        .unwrap_or_else(|| ArchitectState::Spawning.to_string());

    Ok(WorkspaceStatus {
        path: workspace.clone(),
        architect,
        architect_state,
        builders,
        shells,
        tabs: entry
            .tabs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
        gate: pending_gate_for_workspace(workspace.as_path()),
    })
}

/// List active workspaces with terminal counts. Empty while the dependency
/// slot is unset — the gate that closes the startup listing race.
pub fn list_workspaces() -> Vec<WorkspaceSummary> {
    let Some(deps) = deps() else {
        return Vec::new();
    };

    let mut paths = deps.registry.workspaces();
    paths.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    paths
        .into_iter()
        .map(|path| {
            let terminals = deps
                .registry
                .with_entry(&path, |e| e.terminal_count())
                .unwrap_or(0);
            let architect_state = deps
                .runtime(&path)
                .map(|r| r.architect.lock().state.to_string())
                .unwrap_or_else(|| ArchitectState::Running.to_string());
            WorkspaceSummary {
                path,
                terminals,
                architect_state,
            }
        })
        .collect()
}

/// Internal spawn entrypoint shared by the terminal-creation API.
///
/// While the dependency slot is unset this returns `StartingUp` — during
/// the window between process start and dependency injection no new
/// sessions may be created.
pub async fn launch_instance(
    request: LaunchRequest,
) -> Result<SessionDescription, LifecycleError> {
    let deps = deps().ok_or(LifecycleError::StartingUp)?;
    let workspace = request.workspace.clone();

    // Presence in the registry is what "activated" means; reconciled
    // workspaces get their runtime (with default config) on first launch.
    if !deps.registry.contains(&workspace) {
        return Err(LifecycleError::NotActive);
    }
    let runtime = deps.runtime_or_create(&workspace);

    let role_id = match request.kind {
        TerminalKind::Architect => {
            let alive = deps
                .registry
                .with_entry(&workspace, |entry| entry.architect.clone())
                .flatten()
                .and_then(|id| deps.supervisor.get(&id))
                .map(|session| !session.is_dead())
                .unwrap_or(false);
            if alive {
                return Err(LifecycleError::ArchitectAlive);
            }
            None
        }
        TerminalKind::Builder => Some(
            request
                .role_id
                .clone()
                .unwrap_or_else(|| RoleId::builder("adhoc")),
        ),
        TerminalKind::Shell => Some(deps.registry.allocate_shell_role(&workspace)),
    };

    let configured = runtime.config.lock().command_for(request.kind).to_string();
    let (command, args) = match &request.command {
        Some(command) => (command.clone(), request.args.clone()),
        None => split_command(&configured)?,
    };

    let cwd = request
        .cwd
        .clone()
        .unwrap_or_else(|| workspace.as_path().to_path_buf());

    let session = PtySession::spawn_inline(
        InlineSpawn {
            id: SessionId::generate(),
            workspace: workspace.clone(),
            kind: request.kind,
            role_id: role_id.clone(),
            command,
            args,
            cwd: cwd.clone(),
            cols: request.cols,
            rows: request.rows,
            label: request.label.clone(),
            env: Vec::new(),
            control_port: deps.control_port,
        },
        deps.clock.clone(),
        deps.event_tx.clone(),
    )
    .map_err(|e| LifecycleError::Spawn(e.to_string()))?;

    let id = session.id().clone();
    deps.registry
        .install(&workspace, request.kind, role_id.as_ref(), &id);
    deps.registry.persist(
        &id,
        &workspace,
        request.kind,
        role_id.as_ref(),
        session.pid().map(i64::from),
        cwd.to_str(),
        request.label.as_deref(),
        None,
    );
    if request.kind == TerminalKind::Architect {
        runtime.architect.lock().state = ArchitectState::Running;
    }

    let description = session.describe();
    deps.supervisor.insert(session);
    Ok(description)
}

/// Split a configured command line into program + args. Quoting is not part
/// of the config grammar; commands needing it belong in a script.
fn split_command(command_line: &str) -> Result<(String, Vec<String>), LifecycleError> {
    let mut parts = command_line.split_whitespace().map(str::to_string);
    let command = parts
        .next()
        .ok_or_else(|| LifecycleError::Config("empty command".to_string()))?;
    Ok((command, parts.collect()))
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
