// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Internal daemon events.
//!
//! PTY exit watchers and shellper readers run on their own tasks; the
//! lifecycle engine consumes their events on a single loop so registry
//! cleanup and architect restart decisions never race each other.

use std::time::Duration;

use af_core::{RoleId, SessionId, TerminalKind, WorkspacePath};

/// Events emitted by session watchers, consumed by the engine loop.
#[derive(Debug, Clone)]
pub enum TowerEvent {
    /// A live session's child process exited or its shellper connection closed.
    SessionExited {
        session_id: SessionId,
        workspace: WorkspacePath,
        kind: TerminalKind,
        role_id: Option<RoleId>,
        /// How long the session was alive. Drives crash-loop accounting for
        /// architects.
        uptime: Duration,
        /// Whether the session was hosted by a shellper (identity row kept).
        persistent: bool,
    },
}
