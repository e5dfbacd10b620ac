// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Locator for an out-of-process PTY host (shellper).
//!
//! A shellper hosts one PTY on a UNIX socket so the terminal survives Tower
//! restarts. The locator is persisted alongside the session row and is what
//! reconciliation probes on startup. The host pid + start time pair guards
//! against pid reuse: a recycled pid will not match the recorded start time.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where to find a shellper host for a persisted session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellperLocator {
    /// UNIX socket the host listens on. Single-connection: a new client
    /// evicts the previous one.
    pub socket_path: PathBuf,
    /// Pid of the shellper host process.
    pub host_pid: i32,
    /// Host process start time (epoch seconds), for pid-reuse detection.
    pub host_start_time: i64,
}

impl ShellperLocator {
    pub fn new(socket_path: impl Into<PathBuf>, host_pid: i32, host_start_time: i64) -> Self {
        Self {
            socket_path: socket_path.into(),
            host_pid,
            host_start_time,
        }
    }
}
