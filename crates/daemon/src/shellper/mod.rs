// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client side of the shellper socket contract.
//!
//! A shellper hosts one PTY on a UNIX socket so the terminal outlives Tower
//! restarts. The contract is small: connect, send an attach handshake as one
//! JSON line, receive one JSON line acknowledging the attach (including a
//! replay of buffered output immediately after), then the socket is a raw
//! byte stream of PTY output. Input travels as tagged frames
//! (`tag u8 | len u32 BE | payload`).
//!
//! Shellper accepts a single connection per session and evicts the previous
//! client on a new attach — which is why startup reconciliation and the
//! dashboard's on-the-fly reconnect must never race (see the registry's
//! reconciling gate).

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::time::timeout;

use af_core::ShellperLocator;

/// Input frame tags accepted by a shellper host.
pub const INPUT_DATA: u8 = 0x01;
pub const INPUT_RESIZE: u8 = 0x02;
pub const INPUT_KILL: u8 = 0x03;

#[derive(Debug, Error)]
pub enum ShellperError {
    #[error("shellper host process is gone")]
    HostDead,

    #[error("probe timed out")]
    Timeout,

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// An attached shellper connection, ready to be wrapped in a session.
#[derive(Debug)]
pub struct ShellperHandle {
    pub stream: UnixStream,
    /// Pid of the PTY child inside the host, when the host reports it.
    pub child_pid: Option<u32>,
}

#[derive(Serialize)]
struct AttachRequest<'a> {
    op: &'a str,
    replay: bool,
}

#[derive(Deserialize)]
struct AttachResponse {
    ok: bool,
    #[serde(default, rename = "childPid")]
    child_pid: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

/// Seam for probing shellper hosts. The production connector dials real
/// sockets; tests substitute a fake that counts in-flight probes.
#[async_trait]
pub trait ShellperConnector: Send + Sync {
    async fn probe(
        &self,
        locator: &ShellperLocator,
        per_attempt: Duration,
    ) -> Result<ShellperHandle, ShellperError>;
}

/// Production connector: liveness check, dial, attach handshake.
#[derive(Default)]
pub struct SocketConnector;

#[async_trait]
impl ShellperConnector for SocketConnector {
    async fn probe(
        &self,
        locator: &ShellperLocator,
        per_attempt: Duration,
    ) -> Result<ShellperHandle, ShellperError> {
        if !host_alive(locator) {
            return Err(ShellperError::HostDead);
        }
        timeout(per_attempt, attach(&locator.socket_path))
            .await
            .map_err(|_| ShellperError::Timeout)?
    }
}

/// Connect and perform the attach/replay handshake.
async fn attach(socket_path: &Path) -> Result<ShellperHandle, ShellperError> {
    let mut stream = UnixStream::connect(socket_path).await?;

    let request = serde_json::to_string(&AttachRequest {
        op: "attach",
        replay: true,
    })
    .map_err(|e| ShellperError::Handshake(e.to_string()))?;
    stream.write_all(request.as_bytes()).await?;
    stream.write_all(b"\n").await?;

    let line = read_line(&mut stream).await?;
    let response: AttachResponse = serde_json::from_str(&line)
        .map_err(|e| ShellperError::Handshake(format!("bad attach response: {e}")))?;
    if !response.ok {
        return Err(ShellperError::Handshake(
            response.error.unwrap_or_else(|| "attach refused".to_string()),
        ));
    }

    Ok(ShellperHandle {
        stream,
        child_pid: response.child_pid,
    })
}

/// Read one `\n`-terminated line byte-by-byte so nothing past the handshake
/// is consumed from the stream.
async fn read_line(stream: &mut UnixStream) -> Result<String, ShellperError> {
    let mut line = Vec::with_capacity(128);
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(ShellperError::Handshake("closed during handshake".into()));
        }
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
        if line.len() > 4096 {
            return Err(ShellperError::Handshake("handshake line too long".into()));
        }
    }
    String::from_utf8(line).map_err(|e| ShellperError::Handshake(e.to_string()))
}

/// Whether the locator still points at the original host process.
///
/// Signal 0 checks existence (EPERM still means alive); when the locator
/// carries a start time and /proc is available, a mismatch means the pid was
/// recycled by another process.
pub fn host_alive(locator: &ShellperLocator) -> bool {
    if locator.host_pid <= 0 {
        return false;
    }
    let alive = match kill(Pid::from_raw(locator.host_pid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    };
    if !alive {
        return false;
    }
    if locator.host_start_time > 0 {
        if let Some(actual) = proc_start_time(locator.host_pid) {
            return actual == locator.host_start_time;
        }
    }
    true
}

/// starttime (field 22) from /proc/<pid>/stat, when the platform has procfs.
fn proc_start_time(pid: i32) -> Option<i64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    // comm (field 2) may contain spaces; skip past its closing paren.
    let rest = stat.rsplit_once(')')?.1;
    rest.split_whitespace().nth(19)?.parse().ok()
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
