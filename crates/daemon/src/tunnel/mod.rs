// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outbound tunnel client.
//!
//! One task owns the state machine; everything else talks to it over a
//! command channel, so transitions are serialized by construction. The
//! states are `disconnected`, `connecting`, `connected`, and the latched
//! `auth_failed`: an invalid API key stops all reconnection until
//! `reset_circuit_breaker()`. Retryable failures schedule a reconnect with
//! bounded exponential backoff and jitter; `disconnect()` cancels any
//! pending reconnect immediately.

pub mod frame;
pub mod proxy;
pub mod transport;

pub use frame::{AuthErrorCode, Frame, TunnelError};
pub use proxy::TUNNEL_ORIGIN_HEADER;
pub use transport::{TunnelConn, TunnelTransport, WsTransport};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use proxy::ConnectBridge;

/// Tunnel client states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Disconnected,
    Connecting,
    Connected,
    AuthFailed,
}

af_core::simple_display! {
    TunnelState {
        Disconnected => "disconnected",
        Connecting => "connecting",
        Connected => "connected",
        AuthFailed => "auth_failed",
    }
}

/// Snapshot provider for the metadata channel (workspace list, terminal
/// list). The daemon wires this to the live registry.
pub trait MetadataSource: Send + Sync {
    fn snapshot(&self) -> serde_json::Value;
}

/// Tunnel client configuration.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub url: String,
    pub api_key: String,
    /// Local HTTP server port proxied requests are bridged onto.
    pub local_port: u16,
    /// Base delay for reconnect backoff.
    pub reconnect_base: Duration,
    /// Backoff ceiling.
    pub reconnect_cap: Duration,
}

impl TunnelConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>, local_port: u16) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            local_port,
            reconnect_base: Duration::from_millis(500),
            reconnect_cap: Duration::from_secs(30),
        }
    }
}

enum Cmd {
    Connect,
    Disconnect,
    SendMetadata,
    ResetCircuitBreaker,
}

type Listener = Box<dyn Fn(TunnelState) + Send + Sync>;

struct Shared {
    state: Mutex<TunnelState>,
    connected_at: Mutex<Option<Instant>>,
    listeners: Mutex<Vec<Listener>>,
}

impl Shared {
    fn set_state(&self, next: TunnelState) {
        {
            let mut state = self.state.lock();
            if *state == next {
                return;
            }
            *state = next;
        }
        *self.connected_at.lock() = match next {
            TunnelState::Connected => Some(Instant::now()),
            _ => None,
        };
        // A listener panicking must not poison the state machine or starve
        // the other listeners.
        let listeners = self.listeners.lock();
        for listener in listeners.iter() {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                listener(next);
            }));
            if result.is_err() {
                warn!("tunnel state listener panicked");
            }
        }
    }
}

/// Handle to the tunnel state machine task.
#[derive(Clone)]
pub struct TunnelClient {
    cmd_tx: mpsc::Sender<Cmd>,
    shared: Arc<Shared>,
}

impl TunnelClient {
    /// Spawn the state machine task.
    pub fn spawn(
        config: TunnelConfig,
        transport: Arc<dyn TunnelTransport>,
        metadata: Arc<dyn MetadataSource>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let shared = Arc::new(Shared {
            state: Mutex::new(TunnelState::Disconnected),
            connected_at: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
        });
        tokio::spawn(run(
            config,
            transport,
            metadata,
            cmd_rx,
            Arc::clone(&shared),
        ));
        Self { cmd_tx, shared }
    }

    pub fn state(&self) -> TunnelState {
        *self.shared.state.lock()
    }

    /// Time since entering `connected`; `None` in any other state.
    pub fn get_uptime(&self) -> Option<Duration> {
        self.shared.connected_at.lock().map(|at| at.elapsed())
    }

    /// Register a state listener. Listener panics are isolated.
    pub fn on_state_change(&self, listener: impl Fn(TunnelState) + Send + Sync + 'static) {
        self.shared.listeners.lock().push(Box::new(listener));
    }

    /// Request a connection. Ignored while connecting or connected, and
    /// while the auth latch is set.
    pub async fn connect(&self) {
        let _ = self.cmd_tx.send(Cmd::Connect).await;
    }

    /// Drop the connection and cancel any pending reconnect.
    pub async fn disconnect(&self) {
        let _ = self.cmd_tx.send(Cmd::Disconnect).await;
    }

    /// Push a fresh metadata snapshot, if connected.
    pub async fn send_metadata(&self) {
        let _ = self.cmd_tx.send(Cmd::SendMetadata).await;
    }

    /// Clear the `auth_failed` latch back to `disconnected`.
    pub async fn reset_circuit_breaker(&self) {
        let _ = self.cmd_tx.send(Cmd::ResetCircuitBreaker).await;
    }
}

fn backoff_delay(config: &TunnelConfig, attempt: u32) -> Duration {
    let exp = config
        .reconnect_base
        .saturating_mul(2u32.saturating_pow(attempt.min(16)));
    let capped = exp.min(config.reconnect_cap);
    // ±20% jitter so a fleet of towers does not reconnect in lockstep.
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    capped.mul_f64(jitter)
}

/// Why a live connection ended.
enum DropReason {
    /// User asked; do not reconnect.
    Requested,
    /// Transport loss; reconnect with backoff.
    Lost,
}

async fn run(
    config: TunnelConfig,
    transport: Arc<dyn TunnelTransport>,
    metadata: Arc<dyn MetadataSource>,
    mut cmd_rx: mpsc::Receiver<Cmd>,
    shared: Arc<Shared>,
) {
    let mut attempt: u32 = 0;
    let mut reconnect_at: Option<tokio::time::Instant> = None;

    loop {
        // Idle states: disconnected (possibly with a reconnect timer) or
        // auth_failed (latched, timer never set).
        let connect_now = if let Some(deadline) = reconnect_at {
            tokio::select! {
                _ = tokio::time::sleep_until(deadline) => {
                    reconnect_at = None;
                    true
                }
                cmd = cmd_rx.recv() => match cmd {
                    None => return,
                    Some(Cmd::Connect) => true,
                    Some(Cmd::Disconnect) => {
                        // Cancels the pending reconnect.
                        reconnect_at = None;
                        attempt = 0;
                        shared.set_state(TunnelState::Disconnected);
                        false
                    }
                    Some(Cmd::SendMetadata | Cmd::ResetCircuitBreaker) => false,
                }
            }
        } else {
            match cmd_rx.recv().await {
                None => return,
                Some(Cmd::Connect) => *shared.state.lock() != TunnelState::AuthFailed,
                Some(Cmd::ResetCircuitBreaker) => {
                    if *shared.state.lock() == TunnelState::AuthFailed {
                        attempt = 0;
                        shared.set_state(TunnelState::Disconnected);
                    }
                    false
                }
                Some(Cmd::Disconnect) => {
                    shared.set_state(TunnelState::Disconnected);
                    false
                }
                Some(Cmd::SendMetadata) => false,
            }
        };

        if !connect_now {
            continue;
        }
        // Whatever scheduled us is consumed now.
        reconnect_at = None;

        shared.set_state(TunnelState::Connecting);
        match transport.connect(&config.url, &config.api_key).await {
            Ok(conn) => {
                attempt = 0;
                shared.set_state(TunnelState::Connected);
                info!(url = %config.url, "tunnel connected");
                let reason = drive_connection(conn, &config, &metadata, &mut cmd_rx).await;
                shared.set_state(TunnelState::Disconnected);
                match reason {
                    DropReason::Requested => {
                        reconnect_at = None;
                    }
                    DropReason::Lost => {
                        let delay = backoff_delay(&config, attempt);
                        attempt = attempt.saturating_add(1);
                        debug!(delay_ms = delay.as_millis() as u64, "tunnel lost, reconnecting");
                        reconnect_at = Some(tokio::time::Instant::now() + delay);
                    }
                }
            }
            Err(e) if e.is_permanent() => {
                warn!(error = %e, "tunnel auth failed, latching circuit breaker");
                shared.set_state(TunnelState::AuthFailed);
                reconnect_at = None;
            }
            Err(e) => {
                debug!(error = %e, "tunnel connect failed, scheduling retry");
                shared.set_state(TunnelState::Disconnected);
                let delay = backoff_delay(&config, attempt);
                attempt = attempt.saturating_add(1);
                reconnect_at = Some(tokio::time::Instant::now() + delay);
            }
        }
    }
}

fn metadata_push_frame(metadata: &Arc<dyn MetadataSource>) -> Frame {
    Frame::Request {
        // Client-initiated streams are odd; the push channel uses stream 1.
        stream: 1,
        method: "POST".to_string(),
        path: "/__tower/metadata-push".to_string(),
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        body: Some(BASE64.encode(metadata.snapshot().to_string().as_bytes())),
    }
}

fn metadata_response(stream: u64, metadata: &Arc<dyn MetadataSource>) -> Frame {
    Frame::Response {
        stream,
        status: 200,
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        body: Some(BASE64.encode(metadata.snapshot().to_string().as_bytes())),
    }
}

/// One unit of work for the connection loop. The select below only
/// produces one of these; the connection object itself is touched strictly
/// after the select expression has dropped its borrows.
enum Work {
    Outbound(Frame),
    Command(Option<Cmd>),
    Inbound(Result<Option<Frame>, TunnelError>),
}

/// Drive a live connection until it drops or the user disconnects.
async fn drive_connection(
    mut conn: Box<dyn TunnelConn>,
    config: &TunnelConfig,
    metadata: &Arc<dyn MetadataSource>,
    cmd_rx: &mut mpsc::Receiver<Cmd>,
) -> DropReason {
    let client = reqwest::Client::new();
    let (out_tx, mut out_rx) = mpsc::channel::<Frame>(64);
    let mut bridges: HashMap<u64, ConnectBridge> = HashMap::new();

    // Initial metadata push on connect.
    if conn.send_frame(metadata_push_frame(metadata)).await.is_err() {
        return DropReason::Lost;
    }

    loop {
        let work = tokio::select! {
            outbound = out_rx.recv() => match outbound {
                // out_tx lives in this scope, so the channel never closes.
                Some(frame) => Work::Outbound(frame),
                None => return DropReason::Lost,
            },
            cmd = cmd_rx.recv() => Work::Command(cmd),
            inbound = conn.next_frame() => Work::Inbound(inbound),
        };

        match work {
            Work::Outbound(frame) => {
                if conn.send_frame(frame).await.is_err() {
                    return DropReason::Lost;
                }
            }
            Work::Command(None) | Work::Command(Some(Cmd::Disconnect)) => {
                return DropReason::Requested;
            }
            Work::Command(Some(Cmd::SendMetadata)) => {
                if conn.send_frame(metadata_push_frame(metadata)).await.is_err() {
                    return DropReason::Lost;
                }
            }
            // Already connected; ignore.
            Work::Command(Some(Cmd::Connect | Cmd::ResetCircuitBreaker)) => {}
            Work::Inbound(inbound) => {
                let frame = match inbound {
                    Ok(Some(frame)) => frame,
                    Ok(None) => return DropReason::Lost,
                    Err(e) => {
                        debug!(error = %e, "tunnel receive failed");
                        return DropReason::Lost;
                    }
                };
                match frame {
                    Frame::Request { stream, method, path, headers, body } => {
                        if path == "/__tower/metadata" {
                            // Served by the client itself, through the tunnel.
                            let response = metadata_response(stream, metadata);
                            if conn.send_frame(response).await.is_err() {
                                return DropReason::Lost;
                            }
                        } else {
                            let client = client.clone();
                            let out_tx = out_tx.clone();
                            let local_port = config.local_port;
                            tokio::spawn(async move {
                                proxy::proxy_request(
                                    &client, local_port, stream, method, path, headers, body,
                                    out_tx,
                                )
                                .await;
                            });
                        }
                    }
                    Frame::ConnectOpen { stream } => {
                        match ConnectBridge::open(config.local_port, stream, out_tx.clone()).await {
                            Ok(bridge) => {
                                bridges.insert(stream, bridge);
                            }
                            Err(e) => {
                                debug!(stream, error = %e, "CONNECT bridge failed to open");
                                let _ = conn.send_frame(Frame::ConnectClose { stream }).await;
                            }
                        }
                    }
                    Frame::ConnectData { stream, data } => {
                        if let Some(bridge) = bridges.get(&stream) {
                            bridge.data(&data).await;
                        }
                    }
                    Frame::ConnectClose { stream } => {
                        bridges.remove(&stream);
                    }
                    Frame::Response { .. } => {
                        // Gateway reply to a client push; nothing to do.
                    }
                    Frame::Auth { .. } | Frame::AuthOk | Frame::AuthError { .. } => {
                        debug!("unexpected auth frame on established tunnel");
                        return DropReason::Lost;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
