// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tunnel wire frames.
//!
//! Every message on the tunnel is one JSON-encoded frame inside a binary
//! transport message. Proxied HTTP exchanges and CONNECT byte streams are
//! multiplexed by stream id; stream ids are chosen by the gateway for
//! inbound work and by the client for its own pushes (client streams are
//! odd, gateway streams even, so they never collide).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Auth rejection codes returned by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorCode {
    InvalidApiKey,
    RateLimited,
    InvalidAuthFrame,
    InternalError,
}

/// Tunnel client failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TunnelError {
    /// Permanent: latches the circuit breaker.
    #[error("invalid api key")]
    InvalidApiKey,

    #[error("rate limited by gateway")]
    RateLimited,

    #[error("gateway rejected the auth frame")]
    InvalidAuthFrame,

    #[error("gateway internal error")]
    InternalError,

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl TunnelError {
    /// Permanent failures latch `auth_failed`; everything else returns to
    /// `disconnected` and schedules a reconnect.
    pub fn is_permanent(&self) -> bool {
        matches!(self, TunnelError::InvalidApiKey)
    }
}

impl From<AuthErrorCode> for TunnelError {
    fn from(code: AuthErrorCode) -> Self {
        match code {
            AuthErrorCode::InvalidApiKey => TunnelError::InvalidApiKey,
            AuthErrorCode::RateLimited => TunnelError::RateLimited,
            AuthErrorCode::InvalidAuthFrame => TunnelError::InvalidAuthFrame,
            AuthErrorCode::InternalError => TunnelError::InternalError,
        }
    }
}

/// One multiplexed tunnel frame. Bodies and CONNECT payloads are base64.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    Auth {
        api_key: String,
    },
    AuthOk,
    AuthError {
        code: AuthErrorCode,
    },
    /// Proxied HTTP request (either direction).
    Request {
        stream: u64,
        method: String,
        path: String,
        headers: Vec<(String, String)>,
        #[serde(default)]
        body: Option<String>,
    },
    Response {
        stream: u64,
        status: u16,
        headers: Vec<(String, String)>,
        #[serde(default)]
        body: Option<String>,
    },
    /// Open a raw TCP bridge to the local server (WebSocket upgrades).
    ConnectOpen {
        stream: u64,
    },
    ConnectData {
        stream: u64,
        data: String,
    },
    ConnectClose {
        stream: u64,
    },
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>, TunnelError> {
        serde_json::to_vec(self).map_err(|e| TunnelError::InvalidFrame(e.to_string()))
    }

    pub fn decode(raw: &[u8]) -> Result<Self, TunnelError> {
        serde_json::from_slice(raw).map_err(|e| TunnelError::InvalidFrame(e.to_string()))
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
