// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup and shutdown.
//!
//! Order matters here. The HTTP listener binds first so the port is claimed
//! early, but the dependency slot stays empty until reconciliation has
//! finished — the two race gates (`DEPS` unset, `RECONCILING` set) keep the
//! dashboard from opening shellper sockets the reconciler is about to
//! probe. Only after reconciliation does the Tower start answering
//! workspace requests for real.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use fs2::FileExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use af_core::SystemClock;
use af_storage::{SessionStore, StoreError};

use crate::analytics::AnalyticsService;
use crate::env;
use crate::lifecycle::{self, Deps};
use crate::overview::OverviewService;
use crate::pty::SessionSupervisor;
use crate::registry::{reconcile_sessions, TerminalRegistry};
use crate::server::{self, RateLimiter, ServerState};
use crate::shellper::SocketConnector;
use crate::tracker::CliTracker;
use crate::tunnel::{MetadataSource, TunnelClient, TunnelConfig, WsTransport};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("could not determine state directory")]
    NoStateDir,

    #[error("failed to acquire lock: tower already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("failed to bind 127.0.0.1:{0}: {1}")]
    BindFailed(u16, #[source] std::io::Error),

    #[error("session store error: {0}")]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata snapshot for the tunnel: workspace list plus terminal list.
struct RegistryMetadata;

impl MetadataSource for RegistryMetadata {
    fn snapshot(&self) -> serde_json::Value {
        let Some(deps) = lifecycle::deps() else {
            return serde_json::json!({ "workspaces": [], "terminals": [] });
        };
        let terminals: Vec<_> = deps
            .supervisor
            .list()
            .iter()
            .map(|session| session.describe())
            .collect();
        serde_json::json!({
            "workspaces": lifecycle::list_workspaces(),
            "terminals": terminals,
        })
    }
}

/// Everything `run()` needs to tear down at exit.
struct Running {
    deps: Arc<Deps>,
    _lock_file: File,
    tunnel: Option<TunnelClient>,
}

/// Run the Tower until SIGINT/SIGTERM.
pub async fn run() -> Result<(), StartupError> {
    let state_dir = env::state_dir().ok_or(StartupError::NoStateDir)?;
    std::fs::create_dir_all(&state_dir)?;

    // Single instance per state dir.
    let lock_path = state_dir.join("towerd.lock");
    let lock_file = File::create(&lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(StartupError::LockFailed)?;

    let port = env::port();
    let clock = SystemClock::shared();
    let store = Arc::new(SessionStore::open(state_dir.join("tower.db"))?);
    let registry = Arc::new(TerminalRegistry::new(Arc::clone(&store)));
    let supervisor = Arc::new(SessionSupervisor::new());
    let (event_tx, event_rx) = mpsc::channel(256);

    let deps = Arc::new(Deps::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::clone(&supervisor),
        clock.clone(),
        event_tx.clone(),
        port,
    ));
    tokio::spawn(lifecycle::run_event_loop(Arc::clone(&deps), event_rx));

    // Tunnel client, when a gateway is configured.
    let tunnel = match (env::tunnel_url(), env::api_key()) {
        (Some(url), Some(api_key)) => {
            let client = TunnelClient::spawn(
                TunnelConfig::new(url, api_key, port),
                Arc::new(WsTransport),
                Arc::new(RegistryMetadata),
            );
            client.connect().await;
            Some(client)
        }
        (Some(_), None) => {
            warn!("TOWER_TUNNEL_URL is set but TOWER_API_KEY is not; tunnel disabled");
            None
        }
        _ => None,
    };

    let tracker = Arc::new(CliTracker::from_env());
    let state = ServerState {
        rate_limiter: Arc::new(RateLimiter::activation(clock.clone())),
        overview: Arc::new(OverviewService::new(tracker.clone())),
        analytics: Arc::new(AnalyticsService::new(
            tracker,
            state_dir.join("consult_metrics.db"),
        )),
        tunnel: tunnel.clone(),
        connector: Arc::new(SocketConnector),
        static_dir: env::static_dir().or_else(default_static_dir),
        started_at: Instant::now(),
    };

    // Claim the port before reconciling; the gates keep early requests from
    // touching shellper sockets or spawning sessions.
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
        .await
        .map_err(|e| StartupError::BindFailed(port, e))?;
    let app = server::router(state)
        .into_make_service_with_connect_info::<std::net::SocketAddr>();
    let server_task = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "HTTP server exited");
        }
    });
    info!(port, "control plane listening on 127.0.0.1");

    // Reconcile persisted sessions against live shellper hosts, then open
    // the gates by installing the dependency slot.
    let outcome = reconcile_sessions(
        &registry,
        &supervisor,
        Arc::new(SocketConnector),
        clock,
        event_tx,
        env::probe_timeout(),
    )
    .await;
    info!(
        reattached = outcome.reattached,
        deleted = outcome.deleted,
        "startup reconciliation finished"
    );
    lifecycle::init_deps(Arc::clone(&deps));
    info!("tower ready");

    let running = Running {
        deps,
        _lock_file: lock_file,
        tunnel,
    };
    wait_for_shutdown().await;
    shutdown(running).await;
    server_task.abort();
    Ok(())
}

fn default_static_dir() -> Option<PathBuf> {
    let candidate = std::env::current_exe().ok()?.parent()?.join("dashboard");
    candidate.is_dir().then_some(candidate)
}

async fn wait_for_shutdown() {
    let ctrl_c = tokio::signal::ctrl_c();
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                let _ = ctrl_c.await;
                return;
            }
        };
    tokio::select! {
        _ = ctrl_c => {}
        _ = sigterm.recv() => {}
    }
}

/// Graceful teardown: inline PTYs die with the daemon, shellper-backed
/// sessions are detached and keep running for the next startup's
/// reconciliation to find.
async fn shutdown(running: Running) {
    info!("shutting down");
    if let Some(tunnel) = &running.tunnel {
        tunnel.disconnect().await;
    }
    for session in running.deps.supervisor.list() {
        if session.is_shellper_backed() {
            session.detach();
        } else {
            session.kill();
        }
        running.deps.supervisor.remove(session.id());
    }
    lifecycle::clear_deps();
    info!("shutdown complete");
}
