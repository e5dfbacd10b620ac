// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{Request, StatusCode};
use chrono::{DateTime, Utc};
use serial_test::serial;
use tokio::sync::mpsc;
use tower::ServiceExt;

use af_core::{SessionId, ShellperLocator, TerminalKind};
use af_storage::SessionStore;

use crate::event::TowerEvent;
use crate::lifecycle::{self, Deps};
use crate::pty::SessionSupervisor;
use crate::registry::TerminalRegistry;
use crate::shellper::{ShellperError, ShellperHandle};
use crate::tracker::{IssueSummary, PrSummary, TrackerCli, TrackerError};

struct EmptyTracker;

#[async_trait]
impl TrackerCli for EmptyTracker {
    async fn pending_prs(&self, _root: &std::path::Path) -> Result<Vec<PrSummary>, TrackerError> {
        Ok(Vec::new())
    }
    async fn open_issues(&self, _root: &std::path::Path) -> Result<Vec<IssueSummary>, TrackerError> {
        Ok(Vec::new())
    }
    async fn closed_issues_since(
        &self,
        _root: &std::path::Path,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<IssueSummary>, TrackerError> {
        Ok(Vec::new())
    }
    async fn merged_prs_since(
        &self,
        _root: &std::path::Path,
        _since: Option<DateTime<Utc>>,
    ) -> Result<Vec<PrSummary>, TrackerError> {
        Ok(Vec::new())
    }
}

struct NeverConnector;

#[async_trait]
impl crate::shellper::ShellperConnector for NeverConnector {
    async fn probe(
        &self,
        _locator: &ShellperLocator,
        _per_attempt: Duration,
    ) -> Result<ShellperHandle, ShellperError> {
        Err(ShellperError::HostDead)
    }
}

fn server_state() -> ServerState {
    let tracker = Arc::new(EmptyTracker) as Arc<dyn TrackerCli>;
    ServerState {
        rate_limiter: Arc::new(RateLimiter::activation(af_core::SystemClock::shared())),
        overview: Arc::new(crate::overview::OverviewService::new(Arc::clone(&tracker))),
        analytics: Arc::new(crate::analytics::AnalyticsService::new(
            tracker,
            PathBuf::from("/nonexistent/metrics.db"),
        )),
        tunnel: None,
        connector: Arc::new(NeverConnector),
        static_dir: None,
        started_at: Instant::now(),
    }
}

struct Fixture {
    router: Router,
    _store_dir: tempfile::TempDir,
    deps: Arc<Deps>,
    _event_rx: mpsc::Receiver<TowerEvent>,
}

impl Fixture {
    fn new() -> Self {
        let store_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(SessionStore::open(store_dir.path().join("tower.db")).unwrap());
        let registry = Arc::new(TerminalRegistry::new(Arc::clone(&store)));
        let supervisor = Arc::new(SessionSupervisor::new());
        let (event_tx, event_rx) = mpsc::channel(64);
        let deps = Arc::new(Deps::new(
            store,
            registry,
            supervisor,
            af_core::SystemClock::shared(),
            event_tx,
            4160,
        ));
        lifecycle::init_deps(Arc::clone(&deps));
        Self {
            router: router(server_state()),
            _store_dir: store_dir,
            deps,
            _event_rx: event_rx,
        }
    }

    async fn request(&self, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        self.request_with(method, uri, body, &[]).await
    }

    async fn request_with(
        &self,
        method: &str,
        uri: &str,
        body: Option<serde_json::Value>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder
                .extension(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))))
                .body(Body::empty())
                .unwrap(),
        };
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        for session in self.deps.supervisor.list() {
            session.kill();
        }
        lifecycle::clear_deps();
    }
}

/// Non-temp workspace dir; activation rejects temp paths.
struct TestWorkspace {
    path: PathBuf,
}

impl TestWorkspace {
    fn create() -> Self {
        let path = std::env::current_dir()
            .unwrap()
            .join(format!(".test-ws-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&path).unwrap();
        std::fs::write(
            path.join("af-config.json"),
            r#"{ "shell": { "architect": "sleep 600", "builder": "sleep 600", "shell": "sleep 600" } }"#,
        )
        .unwrap();
        Self { path }
    }

    fn encoded(&self) -> String {
        af_core::WorkspacePath::new(&self.path).unwrap().encode()
    }
}

impl Drop for TestWorkspace {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

#[tokio::test]
#[serial]
async fn health_reports_liveness_counters() {
    let fx = Fixture::new();
    let (status, body) = fx.request("GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["memoryUsage"].as_u64().unwrap() > 0);
    assert!(body["timestamp"].is_string());
    assert_eq!(body["activeWorkspaces"], 0);
}

#[tokio::test]
#[serial]
async fn malformed_workspace_segment_is_bad_request() {
    let fx = Fixture::new();
    let (status, body) = fx
        .request("GET", "/api/workspaces/%21%21%21/status", None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
#[serial]
async fn activation_rate_limit_hits_only_the_activate_route() {
    let fx = Fixture::new();

    // Fifteen activations for distinct nonexistent paths from one IP.
    let mut bad_request = 0;
    let mut rate_limited = 0;
    for n in 0..15 {
        let ws = af_core::WorkspacePath::new(format!("/no/such/path-{n}"))
            .unwrap()
            .encode();
        let (status, _) = fx
            .request("POST", &format!("/api/workspaces/{ws}/activate"), None)
            .await;
        match status {
            StatusCode::BAD_REQUEST => bad_request += 1,
            StatusCode::TOO_MANY_REQUESTS => rate_limited += 1,
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(bad_request + rate_limited, 15);
    assert_eq!(rate_limited, 5);

    // Deactivation and status stay unlimited even with the bucket drained.
    let ws = af_core::WorkspacePath::new("/no/such/path-0")
        .unwrap()
        .encode();
    let (status, _) = fx
        .request("GET", &format!("/api/workspaces/{ws}/status"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = fx
        .request("POST", &format!("/api/workspaces/{ws}/deactivate"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[serial]
async fn activate_status_deactivate_round_trip() {
    let fx = Fixture::new();
    let tws = TestWorkspace::create();
    let ws = tws.encoded();

    let (status, body) = fx
        .request("POST", &format!("/api/workspaces/{ws}/activate"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["allocatedPort"], 4160);

    let (status, body) = fx
        .request("GET", &format!("/api/workspaces/{ws}/status"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["architectState"], "running");
    assert!(body["architect"]["id"].is_string());

    let (status, body) = fx.request("GET", "/api/workspaces", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["workspaces"].as_array().unwrap().len(), 1);

    let (status, _) = fx
        .request("POST", &format!("/api/workspaces/{ws}/deactivate"), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = fx
        .request("GET", &format!("/api/workspaces/{ws}/status"), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[serial]
async fn terminal_crud_and_rename_dedup() {
    let fx = Fixture::new();
    let tws = TestWorkspace::create();
    let ws = tws.encoded();
    fx.request("POST", &format!("/api/workspaces/{ws}/activate"), None)
        .await;

    // Five shells.
    let mut shell_ids = Vec::new();
    for _ in 0..5 {
        let (status, body) = fx
            .request(
                "POST",
                "/api/terminals",
                Some(serde_json::json!({
                    "workspacePath": tws.path.display().to_string(),
                    "command": "sleep",
                    "args": ["600"],
                })),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        shell_ids.push(body["id"].as_str().unwrap().to_string());
    }

    // Renaming all five to the same name walks the suffix chain; the
    // fifth lands on testing-4.
    let mut last_label = String::new();
    for id in &shell_ids {
        let (status, body) = fx
            .request(
                "POST",
                &format!("/api/terminals/{id}/rename"),
                Some(serde_json::json!({ "name": "testing" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        last_label = body["label"].as_str().unwrap().to_string();
    }
    assert_eq!(last_label, "testing-4");

    // Resize works; zero dimensions do not.
    let (status, _) = fx
        .request(
            "POST",
            &format!("/api/terminals/{}/resize", shell_ids[0]),
            Some(serde_json::json!({ "cols": 120, "rows": 40 })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = fx
        .request(
            "POST",
            &format!("/api/terminals/{}/resize", shell_ids[0]),
            Some(serde_json::json!({ "cols": 0, "rows": 40 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Delete, then the terminal is gone.
    let (status, _) = fx
        .request("DELETE", &format!("/api/terminals/{}", shell_ids[0]), None)
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = fx
        .request("GET", &format!("/api/terminals/{}", shell_ids[0]), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
#[serial]
async fn rename_is_shell_only_with_bounded_labels() {
    let fx = Fixture::new();
    let tws = TestWorkspace::create();
    let ws = tws.encoded();
    fx.request("POST", &format!("/api/workspaces/{ws}/activate"), None)
        .await;

    let (_, status_body) = fx
        .request("GET", &format!("/api/workspaces/{ws}/status"), None)
        .await;
    let architect_id = status_body["architect"]["id"].as_str().unwrap().to_string();

    let (status, _) = fx
        .request(
            "POST",
            &format!("/api/terminals/{architect_id}/rename"),
            Some(serde_json::json!({ "name": "nope" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = fx
        .request(
            "POST",
            "/api/terminals/missing/rename",
            Some(serde_json::json!({ "name": "x" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);

    // Length bounds: empty and >100 are invalid.
    let (shell_status, shell_body) = fx
        .request(
            "POST",
            "/api/terminals",
            Some(serde_json::json!({
                "workspacePath": tws.path.display().to_string(),
                "command": "sleep",
                "args": ["600"],
            })),
        )
        .await;
    assert_eq!(shell_status, StatusCode::CREATED);
    let shell_id = shell_body["id"].as_str().unwrap();
    for bad in ["", &"x".repeat(101)] {
        let (status, _) = fx
            .request(
                "POST",
                &format!("/api/terminals/{shell_id}/rename"),
                Some(serde_json::json!({ "name": bad })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
#[serial]
async fn tabs_persist_through_the_api_and_show_in_status() {
    let fx = Fixture::new();
    let tws = TestWorkspace::create();
    let ws = tws.encoded();
    fx.request("POST", &format!("/api/workspaces/{ws}/activate"), None)
        .await;

    let (status, _) = fx
        .request(
            "POST",
            &format!("/api/workspaces/{ws}/tabs"),
            Some(serde_json::json!({ "tabId": "tab-1", "filePath": "src/lib.rs" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = fx
        .request("GET", &format!("/api/workspaces/{ws}/status"), None)
        .await;
    assert_eq!(body["tabs"]["tab-1"], "src/lib.rs");

    let (status, _) = fx
        .request("DELETE", &format!("/api/workspaces/{ws}/tabs/tab-1"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = fx
        .request("GET", &format!("/api/workspaces/{ws}/status"), None)
        .await;
    assert!(body["tabs"].as_object().unwrap().is_empty());

    // Unknown workspaces 404, empty payloads 400.
    let ghost = af_core::WorkspacePath::new("/never/active").unwrap().encode();
    let (status, _) = fx
        .request(
            "POST",
            &format!("/api/workspaces/{ghost}/tabs"),
            Some(serde_json::json!({ "tabId": "t", "filePath": "f" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = fx
        .request(
            "POST",
            &format!("/api/workspaces/{ws}/tabs"),
            Some(serde_json::json!({ "tabId": "", "filePath": "" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
#[serial]
async fn tunnel_control_is_local_only() {
    let fx = Fixture::new();

    let (status, body) = fx.request("GET", "/api/tunnel/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "disabled");

    let (status, _) = fx
        .request_with(
            "GET",
            "/api/tunnel/status",
            None,
            &[("x-tower-tunnel", "1")],
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = fx
        .request_with(
            "POST",
            "/api/tunnel/connect",
            None,
            &[("x-tower-tunnel", "1")],
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
#[serial]
async fn create_terminal_requires_a_workspace() {
    let fx = Fixture::new();
    let (status, body) = fx
        .request(
            "POST",
            "/api/terminals",
            Some(serde_json::json!({ "command": "sleep" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("workspacePath"));
}

#[tokio::test]
#[serial]
async fn workspace_state_serves_the_dashboard_projection() {
    let fx = Fixture::new();
    let tws = TestWorkspace::create();
    let ws = tws.encoded();
    fx.request("POST", &format!("/api/workspaces/{ws}/activate"), None)
        .await;

    let (status, body) = fx
        .request("GET", &format!("/workspace/{ws}/api/state"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["architectState"], "running");
    assert!(body["shells"].as_array().unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn dead_shellper_rows_are_dropped_by_the_state_endpoint() {
    let fx = Fixture::new();
    let tws = TestWorkspace::create();
    let ws = tws.encoded();
    fx.request("POST", &format!("/api/workspaces/{ws}/activate"), None)
        .await;

    // A persisted shellper row whose host is gone.
    let workspace = af_core::WorkspacePath::new(&tws.path).unwrap();
    fx.deps
        .store
        .upsert_session(&af_storage::TerminalSessionRow {
            id: SessionId::new("stale"),
            workspace_path: workspace.clone(),
            kind: TerminalKind::Shell,
            role_id: Some(af_core::RoleId::shell(1)),
            pid: None,
            shellper: Some(ShellperLocator::new("/run/gone.sock", 1, 0)),
            label: None,
            cwd: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        })
        .unwrap();

    let (status, _) = fx
        .request("GET", &format!("/workspace/{ws}/api/state"), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    // The failed probe deleted the row, mirroring startup reconciliation.
    assert!(fx.deps.registry.list(&workspace).is_empty());
}
