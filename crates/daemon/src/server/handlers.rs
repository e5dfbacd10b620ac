// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON endpoint handlers.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

use axum::extract::{ConnectInfo, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use tracing::warn;

use af_core::{RoleId, SessionId, TerminalKind, WorkspacePath};

use crate::lifecycle::{self, LaunchRequest};
use crate::pty::PtySession;
use crate::registry;
use crate::tunnel::TUNNEL_ORIGIN_HEADER;

use super::{decode_workspace, ApiError, ServerState};

/// Label length bounds for rename.
const LABEL_MIN: usize = 1;
const LABEL_MAX: usize = 100;

fn deps() -> Result<std::sync::Arc<lifecycle::Deps>, ApiError> {
    lifecycle::deps().ok_or_else(|| ApiError::Unavailable("still starting up".to_string()))
}

/// Resident set size in bytes, best effort.
fn memory_usage_bytes() -> u64 {
    let Ok(status) = std::fs::read_to_string("/proc/self/status") else {
        return 0;
    };
    status
        .lines()
        .find_map(|line| {
            line.strip_prefix("VmRSS:")?
                .trim()
                .strip_suffix("kB")?
                .trim()
                .parse::<u64>()
                .ok()
        })
        .map(|kb| kb * 1024)
        .unwrap_or(0)
}

pub async fn health(State(state): State<ServerState>) -> impl IntoResponse {
    let (active, total) = match lifecycle::deps() {
        Some(deps) => {
            let active = deps.registry.workspaces().len();
            let total = deps
                .store
                .known_workspaces()
                .map(|known| known.len())
                .unwrap_or(active);
            (active, total.max(active))
        }
        None => (0, 0),
    };
    Json(serde_json::json!({
        "status": "ok",
        "uptime": state.started_at.elapsed().as_secs(),
        "activeWorkspaces": active,
        "totalWorkspaces": total,
        "memoryUsage": memory_usage_bytes(),
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

pub async fn list_workspaces() -> impl IntoResponse {
    Json(serde_json::json!({ "workspaces": lifecycle::list_workspaces() }))
}

pub async fn activate_workspace(
    State(state): State<ServerState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(ws): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // The only rate-limited route: 10 activations per minute per client IP.
    if !state.rate_limiter.check(addr.ip()) {
        return Err(ApiError::RateLimited);
    }
    let workspace = decode_workspace(&ws)?;
    let activated = lifecycle::activate(&workspace).await?;
    Ok(Json(serde_json::json!({
        "success": true,
        "allocatedPort": activated.allocated_port,
    })))
}

pub async fn deactivate_workspace(
    Path(ws): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = decode_workspace(&ws)?;
    lifecycle::deactivate(&workspace).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn workspace_status(Path(ws): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let workspace = decode_workspace(&ws)?;
    let status = lifecycle::get_status(&workspace)?;
    Ok(Json(status))
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshQuery {
    #[serde(default)]
    refresh: bool,
}

pub async fn workspace_overview(
    State(state): State<ServerState>,
    Path(ws): Path<String>,
    Query(query): Query<RefreshQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = decode_workspace(&ws)?;
    let overview = state
        .overview
        .fetch(workspace.as_path(), query.refresh)
        .await;
    Ok(Json(overview.as_ref().clone()))
}

#[derive(Debug, Deserialize)]
pub struct AnalyticsQuery {
    #[serde(default = "default_range")]
    range: String,
    #[serde(default)]
    refresh: bool,
}

fn default_range() -> String {
    "7".to_string()
}

pub async fn workspace_analytics(
    State(state): State<ServerState>,
    Path(ws): Path<String>,
    Query(query): Query<AnalyticsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = decode_workspace(&ws)?;
    let range = crate::analytics::Range::parse(&query.range)
        .ok_or_else(|| ApiError::Invalid(format!("invalid range: {}", query.range)))?;
    let summary = state
        .analytics
        .summary(workspace.as_path(), range, query.refresh)
        .await;
    Ok(Json(summary.as_ref().clone()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutTabRequest {
    tab_id: String,
    file_path: String,
}

pub async fn put_tab(
    Path(ws): Path<String>,
    Json(body): Json<PutTabRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = decode_workspace(&ws)?;
    if body.tab_id.is_empty() || body.file_path.is_empty() {
        return Err(ApiError::Invalid("tabId and filePath are required".to_string()));
    }
    let deps = deps()?;
    if !deps.registry.contains(&workspace) {
        return Err(ApiError::NotFound("workspace not active".to_string()));
    }
    deps.registry
        .put_tab(&workspace, &af_core::TabId::new(&body.tab_id), &body.file_path);
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn remove_tab(
    Path((ws, tab)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = decode_workspace(&ws)?;
    let deps = deps()?;
    if !deps.registry.contains(&workspace) {
        return Err(ApiError::NotFound("workspace not active".to_string()));
    }
    deps.registry
        .remove_tab(&workspace, &af_core::TabId::new(&tab));
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTerminalRequest {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    cols: Option<u16>,
    #[serde(default)]
    rows: Option<u16>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    workspace_path: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<TerminalKind>,
    #[serde(default)]
    role_id: Option<String>,
}

pub async fn create_terminal(
    Json(body): Json<CreateTerminalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let raw_path = body
        .workspace_path
        .ok_or_else(|| ApiError::Invalid("workspacePath is required".to_string()))?;
    let workspace = WorkspacePath::new(&raw_path)
        .map_err(|e| ApiError::Invalid(format!("invalid workspacePath: {e}")))?;

    let request = LaunchRequest {
        workspace,
        kind: body.kind.unwrap_or(TerminalKind::Shell),
        role_id: body.role_id.map(RoleId::new),
        command: body.command,
        args: body.args,
        cwd: body.cwd.map(PathBuf::from),
        cols: body.cols.unwrap_or(80),
        rows: body.rows.unwrap_or(24),
        label: body.label,
    };
    let description = lifecycle::launch_instance(request).await?;
    Ok((StatusCode::CREATED, Json(description)))
}

pub async fn list_terminals() -> impl IntoResponse {
    let terminals: Vec<_> = match lifecycle::deps() {
        Some(deps) => deps
            .supervisor
            .list()
            .iter()
            .map(|session| session.describe())
            .collect(),
        None => Vec::new(),
    };
    Json(serde_json::json!({ "terminals": terminals }))
}

fn find_session(id: &str) -> Result<std::sync::Arc<PtySession>, ApiError> {
    deps()?
        .supervisor
        .get(&SessionId::new(id))
        .ok_or_else(|| ApiError::NotFound(format!("unknown terminal: {id}")))
}

pub async fn get_terminal(Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(find_session(&id)?.describe()))
}

pub async fn delete_terminal(Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let deps = deps()?;
    let session_id = SessionId::new(&id);
    let session = deps
        .supervisor
        .remove(&session_id)
        .ok_or_else(|| ApiError::NotFound(format!("unknown terminal: {id}")))?;
    session.kill();
    deps.registry.forget(&session_id);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ResizeRequest {
    cols: u16,
    rows: u16,
}

pub async fn resize_terminal(
    Path(id): Path<String>,
    Json(body): Json<ResizeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if body.cols == 0 || body.rows == 0 {
        return Err(ApiError::Invalid("cols and rows must be positive".to_string()));
    }
    let session = find_session(&id)?;
    session
        .resize(body.cols, body.rows)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    name: String,
}

/// Deduplicate a requested label against the labels already taken:
/// `testing` among {testing, testing-1, testing-2, testing-3} becomes
/// `testing-4`.
fn dedup_label(requested: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(requested) {
        return requested.to_string();
    }
    let mut max_suffix = 0u32;
    for label in taken {
        if let Some(n) = label
            .strip_prefix(requested)
            .and_then(|rest| rest.strip_prefix('-'))
            .and_then(|rest| rest.parse::<u32>().ok())
        {
            max_suffix = max_suffix.max(n);
        }
    }
    format!("{requested}-{}", max_suffix + 1)
}

pub async fn rename_terminal(
    Path(id): Path<String>,
    Json(body): Json<RenameRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let name = body.name.trim().to_string();
    if name.len() < LABEL_MIN || name.len() > LABEL_MAX {
        return Err(ApiError::Invalid(format!(
            "label length must be between {LABEL_MIN} and {LABEL_MAX}"
        )));
    }

    let deps = deps()?;
    let session = find_session(&id)?;
    if session.kind() != TerminalKind::Shell {
        return Err(ApiError::Forbidden(
            "only shell terminals can be renamed".to_string(),
        ));
    }

    // Labels of the workspace's other live shells.
    let taken: HashSet<String> = deps
        .supervisor
        .list_for_workspace(session.workspace())
        .iter()
        .filter(|other| other.kind() == TerminalKind::Shell && other.id() != session.id())
        .filter_map(|other| other.label())
        .collect();
    let label = dedup_label(&name, &taken);

    session.set_label(Some(label.clone()));
    // Keep the persisted row (locator included) in sync, best effort.
    match deps.store.get_session(session.id()) {
        Ok(Some(mut row)) => {
            row.label = Some(label.clone());
            if let Err(e) = deps.store.upsert_session(&row) {
                warn!(session = %session.id(), error = %e, "failed to persist rename");
            }
        }
        Ok(None) => {}
        Err(e) => warn!(session = %session.id(), error = %e, "failed to load row for rename"),
    }

    Ok(Json(serde_json::json!({ "success": true, "label": label })))
}

/// Refuse requests that arrived through the tunnel: `/api/tunnel/*` is
/// strictly local-only.
fn reject_tunneled(headers: &HeaderMap) -> Result<(), ApiError> {
    if headers.contains_key(TUNNEL_ORIGIN_HEADER) {
        return Err(ApiError::Forbidden(
            "tunnel control is local-only".to_string(),
        ));
    }
    Ok(())
}

pub async fn tunnel_status(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    reject_tunneled(&headers)?;
    let body = match &state.tunnel {
        Some(tunnel) => serde_json::json!({
            "state": tunnel.state().to_string(),
            "uptime": tunnel.get_uptime().map(|u| u.as_secs()),
        }),
        None => serde_json::json!({ "state": "disabled" }),
    };
    Ok(Json(body))
}

pub async fn tunnel_connect(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    reject_tunneled(&headers)?;
    let tunnel = state
        .tunnel
        .as_ref()
        .ok_or_else(|| ApiError::Invalid("tunnel is not configured".to_string()))?;
    tunnel.connect().await;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn tunnel_disconnect(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    reject_tunneled(&headers)?;
    let tunnel = state
        .tunnel
        .as_ref()
        .ok_or_else(|| ApiError::Invalid("tunnel is not configured".to_string()))?;
    tunnel.disconnect().await;
    Ok(Json(serde_json::json!({ "success": true })))
}

pub async fn tunnel_reset(
    State(state): State<ServerState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    reject_tunneled(&headers)?;
    let tunnel = state
        .tunnel
        .as_ref()
        .ok_or_else(|| ApiError::Invalid("tunnel is not configured".to_string()))?;
    tunnel.reset_circuit_breaker().await;
    Ok(Json(serde_json::json!({ "success": true, "state": tunnel.state().to_string() })))
}

/// Dashboard state projection.
///
/// Reattaches orphaned shellper sessions on the fly — but never while
/// startup reconciliation is running: shellper hosts accept one client and
/// evict the other, so racing the reconciler would corrupt the session.
pub async fn workspace_state(
    State(state): State<ServerState>,
    Path(ws): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let workspace = decode_workspace(&ws)?;
    let deps = deps()?;

    if !registry::is_reconciling() {
        reattach_orphaned_shellpers(&state, &deps, &workspace).await;
    }

    let status = lifecycle::get_status(&workspace)?;
    Ok(Json(status))
}

/// Probe persisted shellper rows that have no live session and reattach
/// the ones that answer. Failures delete the row, same as startup
/// reconciliation.
async fn reattach_orphaned_shellpers(
    state: &ServerState,
    deps: &std::sync::Arc<lifecycle::Deps>,
    workspace: &WorkspacePath,
) {
    for row in deps.registry.list(workspace) {
        let Some(locator) = row.shellper.clone() else {
            continue;
        };
        if deps.supervisor.get(&row.id).is_some() {
            continue;
        }
        match state
            .connector
            .probe(&locator, crate::env::probe_timeout())
            .await
        {
            Ok(handle) => {
                let cwd = row
                    .cwd
                    .clone()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| workspace.as_path().to_path_buf());
                let session = PtySession::attach_shellper(
                    row.id.clone(),
                    row.workspace_path.clone(),
                    row.kind,
                    row.role_id.clone(),
                    cwd,
                    row.label.clone(),
                    handle,
                    deps.clock.clone(),
                    deps.event_tx.clone(),
                );
                deps.registry
                    .install(workspace, row.kind, row.role_id.as_ref(), &row.id);
                deps.supervisor.insert(session);
            }
            Err(e) => {
                warn!(session = %row.id, error = %e, "on-the-fly shellper reattach failed");
                deps.registry.forget(&row.id);
            }
        }
    }
}

#[cfg(test)]
#[path = "handlers_tests.rs"]
mod tests;
