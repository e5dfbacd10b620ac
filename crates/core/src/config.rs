// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-workspace shell configuration (`af-config.json`).
//!
//! The config file at the workspace root selects the commands spawned for
//! each terminal kind:
//!
//! ```json
//! { "shell": { "architect": "claude", "builder": "claude", "shell": "zsh" } }
//! ```
//!
//! A missing file yields defaults; a malformed file is an invalid-input
//! error surfaced as HTTP 400 by the activation handler.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

use crate::terminal::TerminalKind;

/// Name of the per-workspace config file.
pub const CONFIG_FILE: &str = "af-config.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Read(String, #[source] std::io::Error),

    #[error("failed to parse {0}: {1}")]
    Parse(String, #[source] serde_json::Error),
}

/// Shell-command triple for a workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShellConfig {
    #[serde(default = "default_agent_command")]
    pub architect: String,
    #[serde(default = "default_agent_command")]
    pub builder: String,
    #[serde(default = "default_shell_command")]
    pub shell: String,
}

fn default_agent_command() -> String {
    "claude".to_string()
}

fn default_shell_command() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string())
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            architect: default_agent_command(),
            builder: default_agent_command(),
            shell: default_shell_command(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    shell: Option<ShellConfig>,
}

impl ShellConfig {
    /// Load the config for a workspace root, falling back to defaults when
    /// the file is absent.
    pub fn load(workspace_root: &Path) -> Result<Self, ConfigError> {
        let path = workspace_root.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }
        let display = path.display().to_string();
        let raw =
            std::fs::read_to_string(&path).map_err(|e| ConfigError::Read(display.clone(), e))?;
        let parsed: ConfigFile =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(display, e))?;
        Ok(parsed.shell.unwrap_or_default())
    }

    /// Command for a terminal kind.
    pub fn command_for(&self, kind: TerminalKind) -> &str {
        match kind {
            TerminalKind::Architect => &self.architect,
            TerminalKind::Builder => &self.builder,
            TerminalKind::Shell => &self.shell,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
