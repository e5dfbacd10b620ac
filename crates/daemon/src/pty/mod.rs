// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY session supervision.
//!
//! A [`PtySession`] owns exactly one terminal: either an inline PTY spawned
//! by this process (portable-pty) or a client connection to an out-of-process
//! shellper host. Output fans out to attached consumers over a broadcast
//! channel; input arrives on a bounded channel drained by a dedicated writer.
//! The session tracks input recency and a "composing" flag used to gate
//! external message delivery.

mod input;
mod supervisor;

pub use input::InputTracker;
pub use supervisor::SessionSupervisor;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use portable_pty::{native_pty_system, ChildKiller, CommandBuilder, MasterPty, PtySize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use af_core::{RoleId, SessionId, SharedClock, TerminalKind, WorkspacePath};

use crate::event::TowerEvent;
use crate::shellper::{ShellperHandle, INPUT_DATA, INPUT_KILL, INPUT_RESIZE};

/// Capacity of the bounded input channel between HTTP/WS handlers and the
/// session writer.
const INPUT_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the output broadcast ring. Slow consumers lag and resume with
/// a gap rather than applying backpressure to the PTY reader.
const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to spawn PTY: {0}")]
    Spawn(String),

    #[error("session dead")]
    SessionDead,

    #[error("pty error: {0}")]
    Pty(String),
}

/// Input accepted by a session writer.
#[derive(Debug)]
enum SessionInput {
    Data(Vec<u8>),
    Resize(u16, u16),
    Kill,
    Shutdown,
}

/// Parameters for spawning an inline PTY.
pub struct InlineSpawn {
    pub id: SessionId,
    pub workspace: WorkspacePath,
    pub kind: TerminalKind,
    pub role_id: Option<RoleId>,
    pub command: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
    pub label: Option<String>,
    /// Extra environment for the child (on top of TOWER_PORT and
    /// SHELLPER_SESSION_ID, which are always injected).
    pub env: Vec<(String, String)>,
    pub control_port: u16,
}

/// A live supervised terminal session.
pub struct PtySession {
    id: SessionId,
    workspace: WorkspacePath,
    kind: TerminalKind,
    role_id: Option<RoleId>,
    pid: Option<u32>,
    cwd: PathBuf,
    shellper_backed: bool,
    clock: SharedClock,
    spawned_at: Instant,

    label: Mutex<Option<String>>,
    size: Mutex<(u16, u16)>,
    tracker: InputTracker,
    composing: AtomicBool,
    dead: Arc<AtomicBool>,
    /// Set by kill()/detach() so the exit watcher does not emit an event for
    /// an exit the caller already handled.
    silenced: Arc<AtomicBool>,

    input_tx: mpsc::Sender<SessionInput>,
    output_tx: broadcast::Sender<Vec<u8>>,
    /// Inline sessions only: master side kept for resize.
    master: Option<Mutex<Box<dyn MasterPty + Send>>>,
    /// Inline sessions only: kill handle usable while the watcher owns the child.
    killer: Mutex<Option<Box<dyn ChildKiller + Send + Sync>>>,
    /// Shellper sessions only: reader/writer tasks, aborted on detach.
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl PtySession {
    /// Spawn a child process in a fresh PTY owned by this daemon.
    ///
    /// A spawn failure raises immediately to the caller; there is no retry
    /// at this layer.
    pub fn spawn_inline(
        spec: InlineSpawn,
        clock: SharedClock,
        event_tx: mpsc::Sender<TowerEvent>,
    ) -> Result<Arc<Self>, PtyError> {
        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: spec.rows,
                cols: spec.cols,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| PtyError::Spawn(e.to_string()))?;

        let mut cmd = CommandBuilder::new(&spec.command);
        cmd.args(&spec.args);
        cmd.cwd(&spec.cwd);
        cmd.env("TOWER_PORT", spec.control_port.to_string());
        cmd.env("SHELLPER_SESSION_ID", spec.id.as_str());
        for (key, value) in &spec.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        drop(pair.slave);

        let writer = pair
            .master
            .take_writer()
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| PtyError::Spawn(e.to_string()))?;
        let killer = child.clone_killer();
        let pid = child.process_id();

        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let (output_tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);

        let session = Arc::new(Self {
            id: spec.id.clone(),
            workspace: spec.workspace.clone(),
            kind: spec.kind,
            role_id: spec.role_id.clone(),
            pid,
            cwd: spec.cwd.clone(),
            shellper_backed: false,
            spawned_at: clock.now(),
            clock,
            label: Mutex::new(spec.label),
            size: Mutex::new((spec.cols, spec.rows)),
            tracker: InputTracker::new(),
            composing: AtomicBool::new(false),
            dead: Arc::new(AtomicBool::new(false)),
            silenced: Arc::new(AtomicBool::new(false)),
            input_tx,
            output_tx: output_tx.clone(),
            master: Some(Mutex::new(pair.master)),
            killer: Mutex::new(Some(killer)),
            tasks: Mutex::new(Vec::new()),
        });

        spawn_inline_writer(Arc::clone(&session), input_rx, writer);
        spawn_inline_reader(Arc::clone(&session), reader);
        spawn_inline_exit_watcher(Arc::clone(&session), child, event_tx);

        Ok(session)
    }

    /// Wrap a probed shellper connection as a live session.
    ///
    /// The OS process stays owned by the shellper host; this session is only
    /// a client. Dropping the connection (detach) leaves the terminal alive.
    #[allow(clippy::too_many_arguments)]
    pub fn attach_shellper(
        id: SessionId,
        workspace: WorkspacePath,
        kind: TerminalKind,
        role_id: Option<RoleId>,
        cwd: PathBuf,
        label: Option<String>,
        handle: ShellperHandle,
        clock: SharedClock,
        event_tx: mpsc::Sender<TowerEvent>,
    ) -> Arc<Self> {
        let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
        let (output_tx, _) = broadcast::channel(OUTPUT_CHANNEL_CAPACITY);
        let (read_half, write_half) = handle.stream.into_split();

        let session = Arc::new(Self {
            id,
            workspace,
            kind,
            role_id,
            pid: handle.child_pid,
            cwd,
            shellper_backed: true,
            spawned_at: clock.now(),
            clock,
            label: Mutex::new(label),
            size: Mutex::new((80, 24)),
            tracker: InputTracker::new(),
            composing: AtomicBool::new(false),
            dead: Arc::new(AtomicBool::new(false)),
            silenced: Arc::new(AtomicBool::new(false)),
            input_tx,
            output_tx: output_tx.clone(),
            master: None,
            killer: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        });

        let reader_task = tokio::spawn(shellper_reader(Arc::clone(&session), read_half, event_tx));
        let writer_task = tokio::spawn(shellper_writer(Arc::clone(&session), input_rx, write_half));
        session.tasks.lock().extend([reader_task, writer_task]);

        session
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn workspace(&self) -> &WorkspacePath {
        &self.workspace
    }

    pub fn kind(&self) -> TerminalKind {
        self.kind
    }

    pub fn role_id(&self) -> Option<&RoleId> {
        self.role_id.as_ref()
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn cwd(&self) -> &std::path::Path {
        &self.cwd
    }

    /// Only shellper-backed sessions survive Tower restarts.
    pub fn is_shellper_backed(&self) -> bool {
        self.shellper_backed
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    pub fn uptime(&self) -> std::time::Duration {
        self.clock.now().saturating_duration_since(self.spawned_at)
    }

    pub fn label(&self) -> Option<String> {
        self.label.lock().clone()
    }

    pub fn set_label(&self, label: Option<String>) {
        *self.label.lock() = label;
    }

    pub fn size(&self) -> (u16, u16) {
        *self.size.lock()
    }

    /// Subscribe to the output stream. Replay is the shellper's concern;
    /// inline sessions deliver from subscription time only.
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<u8>> {
        self.output_tx.subscribe()
    }

    /// Write bytes to the terminal. `from_user` marks interactive input and
    /// refreshes the idle clock.
    pub async fn write(&self, data: Vec<u8>, from_user: bool) -> Result<(), PtyError> {
        if self.is_dead() {
            return Err(PtyError::SessionDead);
        }
        if from_user {
            self.tracker.record(self.clock.epoch_ms());
        }
        self.input_tx
            .send(SessionInput::Data(data))
            .await
            .map_err(|_| PtyError::SessionDead)
    }

    /// Resize the terminal.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        if self.is_dead() {
            return Err(PtyError::SessionDead);
        }
        *self.size.lock() = (cols, rows);
        match &self.master {
            Some(master) => master
                .lock()
                .resize(PtySize {
                    rows,
                    cols,
                    pixel_width: 0,
                    pixel_height: 0,
                })
                .map_err(|e| PtyError::Pty(e.to_string())),
            None => self
                .input_tx
                .try_send(SessionInput::Resize(cols, rows))
                .map_err(|_| PtyError::SessionDead),
        }
    }

    /// Terminate the terminal. For shellper-backed sessions this asks the
    /// host to kill its child; for inline sessions the child is killed
    /// directly. The exit watcher stays silent: the caller owns cleanup.
    pub fn kill(&self) {
        self.silenced.store(true, Ordering::SeqCst);
        self.dead.store(true, Ordering::SeqCst);

        if let Some(killer) = self.killer.lock().as_mut() {
            if let Err(e) = killer.kill() {
                debug!(session = %self.id, error = %e, "kill failed (already exited?)");
            }
        }
        let _ = self.input_tx.try_send(SessionInput::Kill);
    }

    /// Drop a shellper connection without killing the hosted terminal.
    /// No-op for inline sessions (they have nothing to detach from).
    pub fn detach(&self) {
        if !self.shellper_backed {
            return;
        }
        self.silenced.store(true, Ordering::SeqCst);
        self.dead.store(true, Ordering::SeqCst);
        let _ = self.input_tx.try_send(SessionInput::Shutdown);
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }

    /// Record interactive input without writing (used by tests and by WS
    /// control frames).
    pub fn record_user_input(&self) {
        self.tracker.record(self.clock.epoch_ms());
    }

    /// True when the user has never typed or has been quiet for at least
    /// `threshold_ms`.
    pub fn is_user_idle(&self, threshold_ms: u64) -> bool {
        self.tracker.is_idle(self.clock.epoch_ms(), threshold_ms)
    }

    pub fn last_input_at(&self) -> u64 {
        self.tracker.last_input_at()
    }

    /// Set the composing flag. Idempotent: repeated calls keep it set.
    pub fn start_composing(&self) {
        self.composing.store(true, Ordering::SeqCst);
    }

    pub fn stop_composing(&self) {
        self.composing.store(false, Ordering::SeqCst);
    }

    pub fn is_composing(&self) -> bool {
        self.composing.load(Ordering::SeqCst)
    }

    /// Whether queued external messages may be delivered right now.
    /// Composing gates delivery even when the idle threshold has passed.
    pub fn delivery_allowed(&self, idle_threshold_ms: u64) -> bool {
        !self.is_composing() && self.is_user_idle(idle_threshold_ms)
    }

    /// Snapshot for JSON projections.
    pub fn describe(&self) -> SessionDescription {
        let (cols, rows) = self.size();
        SessionDescription {
            id: self.id.clone(),
            workspace: self.workspace.clone(),
            kind: self.kind,
            role_id: self.role_id.clone(),
            pid: self.pid,
            cols,
            rows,
            label: self.label(),
            shellper_backed: self.shellper_backed,
            last_input_at: self.last_input_at(),
            composing: self.is_composing(),
        }
    }
}

/// Serializable view of a live session.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescription {
    pub id: SessionId,
    pub workspace: WorkspacePath,
    #[serde(rename = "type")]
    pub kind: TerminalKind,
    pub role_id: Option<RoleId>,
    pub pid: Option<u32>,
    pub cols: u16,
    pub rows: u16,
    pub label: Option<String>,
    pub shellper_backed: bool,
    pub last_input_at: u64,
    pub composing: bool,
}

fn spawn_inline_writer(
    session: Arc<PtySession>,
    mut input_rx: mpsc::Receiver<SessionInput>,
    mut writer: Box<dyn std::io::Write + Send>,
) {
    std::thread::spawn(move || {
        while let Some(input) = input_rx.blocking_recv() {
            match input {
                SessionInput::Data(bytes) => {
                    if let Err(e) = writer.write_all(&bytes).and_then(|_| writer.flush()) {
                        warn!(session = %session.id, error = %e, "PTY write failed, marking session dead");
                        session.dead.store(true, Ordering::SeqCst);
                        break;
                    }
                }
                // Inline resize goes through the master directly.
                SessionInput::Resize(_, _) => {}
                SessionInput::Kill | SessionInput::Shutdown => break,
            }
        }
    });
}

fn spawn_inline_reader(session: Arc<PtySession>, mut reader: Box<dyn std::io::Read + Send>) {
    std::thread::spawn(move || {
        let mut buf = [0u8; 8192];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    // No receivers is fine: output is discarded until a
                    // consumer attaches.
                    let _ = session.output_tx.send(buf[..n].to_vec());
                }
            }
        }
    });
}

fn spawn_inline_exit_watcher(
    session: Arc<PtySession>,
    mut child: Box<dyn portable_pty::Child + Send + Sync>,
    event_tx: mpsc::Sender<TowerEvent>,
) {
    std::thread::spawn(move || {
        let _ = child.wait();
        let uptime = session.uptime();
        session.dead.store(true, Ordering::SeqCst);
        if session.silenced.load(Ordering::SeqCst) {
            return;
        }
        let _ = event_tx.blocking_send(TowerEvent::SessionExited {
            session_id: session.id.clone(),
            workspace: session.workspace.clone(),
            kind: session.kind,
            role_id: session.role_id.clone(),
            uptime,
            persistent: false,
        });
    });
}

async fn shellper_reader(
    session: Arc<PtySession>,
    mut read_half: tokio::net::unix::OwnedReadHalf,
    event_tx: mpsc::Sender<TowerEvent>,
) {
    let mut buf = vec![0u8; 8192];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                let _ = session.output_tx.send(buf[..n].to_vec());
            }
        }
    }
    let uptime = session.uptime();
    session.dead.store(true, Ordering::SeqCst);
    if session.silenced.load(Ordering::SeqCst) {
        return;
    }
    let _ = event_tx
        .send(TowerEvent::SessionExited {
            session_id: session.id.clone(),
            workspace: session.workspace.clone(),
            kind: session.kind,
            role_id: session.role_id.clone(),
            uptime,
            persistent: true,
        })
        .await;
}

async fn shellper_writer(
    session: Arc<PtySession>,
    mut input_rx: mpsc::Receiver<SessionInput>,
    mut write_half: tokio::net::unix::OwnedWriteHalf,
) {
    while let Some(input) = input_rx.recv().await {
        let result = match input {
            SessionInput::Data(bytes) => write_frame(&mut write_half, INPUT_DATA, &bytes).await,
            SessionInput::Resize(cols, rows) => {
                let mut payload = [0u8; 4];
                payload[..2].copy_from_slice(&cols.to_be_bytes());
                payload[2..].copy_from_slice(&rows.to_be_bytes());
                write_frame(&mut write_half, INPUT_RESIZE, &payload).await
            }
            SessionInput::Kill => {
                let _ = write_frame(&mut write_half, INPUT_KILL, &[]).await;
                break;
            }
            SessionInput::Shutdown => break,
        };
        if let Err(e) = result {
            warn!(session = %session.id, error = %e, "shellper write failed, marking session dead");
            session.dead.store(true, Ordering::SeqCst);
            break;
        }
    }
    let _ = write_half.shutdown().await;
}

async fn write_frame(
    w: &mut tokio::net::unix::OwnedWriteHalf,
    tag: u8,
    payload: &[u8],
) -> std::io::Result<()> {
    w.write_all(&[tag]).await?;
    w.write_all(&(payload.len() as u32).to_be_bytes()).await?;
    w.write_all(payload).await?;
    w.flush().await
}

/// Map of live sessions by id. Terse on purpose: the registry holds the
/// role-id indirection, this map is the owner.
pub type SessionMap = HashMap<SessionId, Arc<PtySession>>;

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
