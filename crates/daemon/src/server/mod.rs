// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP/WebSocket control plane.
//!
//! The router is the only surface the dashboard, the CLI, and the tunnel
//! gateway ever see. Every handler returns a defined status code and JSON
//! body; nothing propagates to the transport. Workspace paths travel
//! base64url-encoded in URLs.

mod handlers;
mod rate_limit;
mod static_files;
mod ws;

pub use rate_limit::{RateLimiter, ACTIVATION_LIMIT, ACTIVATION_WINDOW};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use thiserror::Error;
use tower_http::trace::TraceLayer;

use af_core::WorkspacePath;

use crate::analytics::AnalyticsService;
use crate::lifecycle::LifecycleError;
use crate::overview::OverviewService;
use crate::shellper::ShellperConnector;
use crate::tunnel::TunnelClient;

/// Shared handler state. Registry/lifecycle access goes through the
/// module-level dependency slot, not through here.
#[derive(Clone)]
pub struct ServerState {
    pub rate_limiter: Arc<RateLimiter>,
    pub overview: Arc<OverviewService>,
    pub analytics: Arc<AnalyticsService>,
    pub tunnel: Option<TunnelClient>,
    pub connector: Arc<dyn ShellperConnector>,
    pub static_dir: Option<PathBuf>,
    pub started_at: Instant,
}

/// HTTP error taxonomy. Everything a handler can fail with maps onto one
/// of these, and each renders as `{ "success": false, "error": ... }`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Invalid(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("rate limited")]
    RateLimited,

    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Invalid(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({ "success": false, "error": self.to_string() });
        (self.status(), Json(body)).into_response()
    }
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::StartingUp => ApiError::Unavailable(e.to_string()),
            LifecycleError::InvalidPath(_) | LifecycleError::Config(_) => {
                ApiError::Invalid(e.to_string())
            }
            LifecycleError::NotActive | LifecycleError::SessionNotFound => {
                ApiError::NotFound(e.to_string())
            }
            LifecycleError::ArchitectAlive => ApiError::Invalid(e.to_string()),
            LifecycleError::Spawn(_) => ApiError::Internal(e.to_string()),
        }
    }
}

/// Decode the `{ws}` path segment or fail with 400.
pub(crate) fn decode_workspace(segment: &str) -> Result<WorkspacePath, ApiError> {
    WorkspacePath::decode(segment)
        .map_err(|e| ApiError::Invalid(format!("invalid workspace id: {e}")))
}

/// Build the control-plane router.
pub fn router(state: ServerState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/workspaces", get(handlers::list_workspaces))
        .route(
            "/api/workspaces/{ws}/activate",
            post(handlers::activate_workspace),
        )
        .route(
            "/api/workspaces/{ws}/deactivate",
            post(handlers::deactivate_workspace),
        )
        .route("/api/workspaces/{ws}/status", get(handlers::workspace_status))
        .route(
            "/api/workspaces/{ws}/overview",
            get(handlers::workspace_overview),
        )
        .route(
            "/api/workspaces/{ws}/analytics",
            get(handlers::workspace_analytics),
        )
        .route("/api/workspaces/{ws}/tabs", post(handlers::put_tab))
        .route(
            "/api/workspaces/{ws}/tabs/{tab}",
            axum::routing::delete(handlers::remove_tab),
        )
        .route(
            "/api/terminals",
            post(handlers::create_terminal).get(handlers::list_terminals),
        )
        .route(
            "/api/terminals/{id}",
            get(handlers::get_terminal).delete(handlers::delete_terminal),
        )
        .route("/api/terminals/{id}/resize", post(handlers::resize_terminal))
        .route("/api/terminals/{id}/rename", post(handlers::rename_terminal))
        .route("/ws/terminal/{id}", get(ws::attach_terminal))
        .route("/api/tunnel/status", get(handlers::tunnel_status))
        .route("/api/tunnel/connect", post(handlers::tunnel_connect))
        .route("/api/tunnel/disconnect", post(handlers::tunnel_disconnect))
        .route("/api/tunnel/reset", post(handlers::tunnel_reset))
        .route("/workspace/{ws}/api/state", get(handlers::workspace_state))
        .route("/workspace/{ws}/{*path}", get(static_files::serve))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
