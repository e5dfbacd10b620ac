// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Architect supervision and the daemon event loop.
//!
//! Exit handling runs on a single consumer task so registry cleanup and
//! restart decisions never race. The handler re-reads state through the
//! registry and the runtime map at dispatch time — the entry that existed
//! when a session spawned may have been replaced since.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use af_core::TerminalKind;

use crate::event::TowerEvent;

use super::{spawn_architect, Deps};

/// Exits below this uptime count toward the crash loop; an exit that
/// reaches it clears the streak.
pub(crate) const CRASH_LOOP_MIN_UPTIME: Duration = Duration::from_secs(5);

/// Consecutive short-lived exits that disable auto-restart.
pub(crate) const CRASH_LOOP_STRIKES: usize = 3;

/// Delay before a supervised respawn.
pub(crate) fn restart_delay() -> Duration {
    std::env::var("TOWER_RESTART_DELAY_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(2))
}

/// Architect supervision states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArchitectState {
    #[default]
    Spawning,
    Running,
    Restarting,
    Disabled,
}

af_core::simple_display! {
    ArchitectState {
        Spawning => "spawning",
        Running => "running",
        Restarting => "restarting",
        Disabled => "disabled",
    }
}

/// What to do after an architect exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    Restart,
    Disable,
}

/// Per-workspace architect supervision record.
#[derive(Debug, Default)]
pub struct ArchitectSupervision {
    pub state: ArchitectState,
    /// Uptimes of the most recent exits, newest last. Bounded to the strike
    /// count; an exit that reaches the uptime floor clears the streak.
    recent_exits: VecDeque<Duration>,
}

impl ArchitectSupervision {
    /// Record an exit and decide whether to restart.
    ///
    /// Three consecutive exits under the 5 s uptime floor disable
    /// auto-restart until the next activation. An exit at or past the floor
    /// clears the streak, so an architect that lived ≥ 5 s is always
    /// restartable.
    pub fn record_exit(&mut self, uptime: Duration) -> RestartDecision {
        if self.state == ArchitectState::Disabled {
            return RestartDecision::Disable;
        }

        if uptime >= CRASH_LOOP_MIN_UPTIME {
            self.recent_exits.clear();
        } else {
            self.recent_exits.push_back(uptime);
            while self.recent_exits.len() > CRASH_LOOP_STRIKES {
                self.recent_exits.pop_front();
            }
        }

        if self.recent_exits.len() >= CRASH_LOOP_STRIKES {
            self.state = ArchitectState::Disabled;
            RestartDecision::Disable
        } else {
            self.state = ArchitectState::Restarting;
            RestartDecision::Restart
        }
    }

    /// Re-activation clears crash-loop protection.
    pub fn reset(&mut self) {
        self.state = ArchitectState::Spawning;
        self.recent_exits.clear();
    }

    pub fn strikes(&self) -> usize {
        self.recent_exits.len()
    }
}

/// Consume watcher events until the channel closes (shutdown).
pub async fn run_event_loop(deps: Arc<Deps>, mut event_rx: mpsc::Receiver<TowerEvent>) {
    while let Some(event) = event_rx.recv().await {
        handle_event(&deps, event).await;
    }
}

pub(crate) async fn handle_event(deps: &Arc<Deps>, event: TowerEvent) {
    match event {
        TowerEvent::SessionExited {
            session_id,
            workspace,
            kind,
            uptime,
            ..
        } => {
            if let Some(session) = deps.supervisor.remove(&session_id) {
                // Exit already happened; this only reaps an inline child
                // whose PTY lingered.
                if !session.is_shellper_backed() {
                    session.kill();
                }
            }
            // Re-read the entry; never clear through a captured reference.
            deps.registry.forget(&session_id);

            if kind != TerminalKind::Architect {
                return;
            }
            // Workspace may have been deactivated between exit and dispatch.
            if !deps.registry.contains(&workspace) {
                return;
            }
            let Some(runtime) = deps.runtime(&workspace) else {
                return;
            };

            let decision = runtime.architect.lock().record_exit(uptime);
            match decision {
                RestartDecision::Disable => {
                    warn!(
                        workspace = %workspace,
                        uptime_ms = uptime.as_millis() as u64,
                        "architect crash loop detected, auto-restart disabled until re-activation"
                    );
                }
                RestartDecision::Restart => {
                    info!(
                        workspace = %workspace,
                        uptime_ms = uptime.as_millis() as u64,
                        "architect exited, scheduling restart"
                    );
                    let deps = Arc::clone(deps);
                    tokio::spawn(async move {
                        tokio::time::sleep(restart_delay()).await;
                        respawn_architect(deps, workspace).await;
                    });
                }
            }
        }
    }
}

/// Delayed respawn: everything is re-checked from scratch because the world
/// may have moved on during the delay.
async fn respawn_architect(deps: Arc<Deps>, workspace: af_core::WorkspacePath) {
    if !deps.registry.contains(&workspace) {
        return;
    }
    let Some(runtime) = deps.runtime(&workspace) else {
        return;
    };
    {
        let supervision = runtime.architect.lock();
        if supervision.state != ArchitectState::Restarting {
            return;
        }
    }
    // A manual relaunch may have beaten the timer.
    let alive = deps
        .registry
        .with_entry(&workspace, |entry| entry.architect.clone())
        .flatten()
        .and_then(|id| deps.supervisor.get(&id))
        .map(|session| !session.is_dead())
        .unwrap_or(false);
    if alive {
        runtime.architect.lock().state = ArchitectState::Running;
        return;
    }

    if let Err(e) = spawn_architect(&deps, &runtime, &workspace) {
        warn!(workspace = %workspace, error = %e, "architect respawn failed");
    }
}

#[cfg(test)]
#[path = "supervise_tests.rs"]
mod tests;
