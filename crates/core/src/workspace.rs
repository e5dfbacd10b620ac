// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Workspace path newtype and the base64url codec used in URLs.
//!
//! A workspace is addressed by its absolute filesystem path everywhere: in
//! the registry, in SQLite, and (base64url-encoded) in HTTP routes. The
//! newtype normalizes the path on construction so that one workspace maps to
//! exactly one registry entry.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Errors from decoding a workspace path out of a URL segment.
#[derive(Debug, Error, PartialEq)]
pub enum PathCodecError {
    #[error("invalid base64url encoding")]
    InvalidBase64,

    #[error("decoded path is not valid UTF-8")]
    InvalidUtf8,

    #[error("workspace path must be absolute")]
    NotAbsolute,
}

/// Absolute, normalized workspace path.
///
/// Normalization strips trailing slashes and `.` components; it does not
/// resolve symlinks. Uniqueness invariant: at most one registry entry per
/// normalized path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspacePath(String);

impl WorkspacePath {
    /// Normalize an absolute path. Returns `NotAbsolute` for relative input.
    pub fn new(path: impl AsRef<Path>) -> Result<Self, PathCodecError> {
        let path = path.as_ref();
        if !path.is_absolute() {
            return Err(PathCodecError::NotAbsolute);
        }
        let mut normalized = PathBuf::new();
        for component in path.components() {
            match component {
                Component::CurDir => {}
                other => normalized.push(other),
            }
        }
        Ok(Self(normalized.to_string_lossy().into_owned()))
    }

    /// Encode for use as a URL path segment.
    pub fn encode(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.0.as_bytes())
    }

    /// Decode a base64url URL segment back into a workspace path.
    pub fn decode(segment: &str) -> Result<Self, PathCodecError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(segment.as_bytes())
            .map_err(|_| PathCodecError::InvalidBase64)?;
        let s = String::from_utf8(bytes).map_err(|_| PathCodecError::InvalidUtf8)?;
        Self::new(&s)
    }

    /// Whether this path sits under the OS temp directory.
    ///
    /// Activation of temp-dir workspaces is rejected: their contents do not
    /// survive reboots, and tests routinely create throwaway dirs there.
    pub fn is_temp(&self) -> bool {
        let path = Path::new(&self.0);
        let tmp = std::env::temp_dir();
        path.starts_with(&tmp) || path.starts_with("/tmp") || path.starts_with("/var/folders")
    }

    /// Whether the workspace directory currently exists on disk.
    pub fn exists(&self) -> bool {
        Path::new(&self.0).is_dir()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }

    pub fn join(&self, rel: impl AsRef<Path>) -> PathBuf {
        self.as_path().join(rel)
    }
}

impl fmt::Display for WorkspacePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Borrow<str> for WorkspacePath {
    fn borrow(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
