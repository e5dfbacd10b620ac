// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Terminal kinds and their registry invariants.
//!
//! Every session is one of three kinds. The architect has no role id and a
//! workspace holds at most one; builders and shells are keyed by role id,
//! unique within (workspace, kind).

use serde::{Deserialize, Serialize};

/// Kind of terminal session hosted for a workspace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TerminalKind {
    Architect,
    Builder,
    Shell,
}

impl TerminalKind {
    /// String form stored in the `type` column of `terminal_sessions`.
    pub fn as_str(self) -> &'static str {
        match self {
            TerminalKind::Architect => "architect",
            TerminalKind::Builder => "builder",
            TerminalKind::Shell => "shell",
        }
    }

    /// Parse the SQLite `type` column value.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "architect" => Some(TerminalKind::Architect),
            "builder" => Some(TerminalKind::Builder),
            "shell" => Some(TerminalKind::Shell),
            _ => None,
        }
    }

    /// Whether sessions of this kind carry a role id.
    pub fn has_role(self) -> bool {
        !matches!(self, TerminalKind::Architect)
    }
}

crate::simple_display! {
    TerminalKind {
        Architect => "architect",
        Builder => "builder",
        Shell => "shell",
    }
}

#[cfg(test)]
#[path = "terminal_tests.rs"]
mod tests;
