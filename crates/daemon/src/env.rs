// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate.

use std::path::PathBuf;
use std::time::Duration;

/// Default control-plane port when `TOWER_PORT` is unset.
pub const DEFAULT_PORT: u16 = 4160;

/// Resolve state directory: TOWER_STATE_DIR > XDG_STATE_HOME/tower > ~/.local/state/tower
pub fn state_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var("TOWER_STATE_DIR") {
        return Some(PathBuf::from(dir));
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return Some(PathBuf::from(xdg).join("tower"));
    }
    dirs::home_dir().map(|home| home.join(".local/state/tower"))
}

/// Control-plane port the HTTP server binds on localhost.
pub fn port() -> u16 {
    std::env::var("TOWER_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

/// Remote gateway URL for the tunnel client. Unset disables the tunnel.
pub fn tunnel_url() -> Option<String> {
    std::env::var("TOWER_TUNNEL_URL").ok().filter(|s| !s.is_empty())
}

/// Long-lived API key presented in the tunnel auth frame.
pub fn api_key() -> Option<String> {
    std::env::var("TOWER_API_KEY").ok().filter(|s| !s.is_empty())
}

/// Issue-tracker CLI binary used by the overview/analytics aggregators.
pub fn tracker_bin() -> String {
    std::env::var("TOWER_TRACKER_BIN").unwrap_or_else(|_| "gh".to_string())
}

/// Directory of static dashboard files served under `/workspace/{id}/`.
pub fn static_dir() -> Option<PathBuf> {
    std::env::var("TOWER_STATIC_DIR").ok().map(PathBuf::from)
}

/// Per-attempt timeout for shellper socket probes during reconciliation.
pub fn probe_timeout() -> Duration {
    std::env::var("TOWER_PROBE_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(2))
}

/// Timeout for external issue-tracker CLI invocations.
pub fn tracker_timeout() -> Duration {
    std::env::var("TOWER_TRACKER_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(20))
}
