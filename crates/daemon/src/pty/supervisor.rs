// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Owner of all live sessions.
//!
//! The supervisor map is the single place a live [`PtySession`] is rooted;
//! the registry refers to sessions by id only. Removing a session here (and
//! letting its Arc drop) is what ends its lifetime.

use std::sync::Arc;

use parking_lot::Mutex;

use af_core::{SessionId, WorkspacePath};

use super::{PtySession, SessionMap};

#[derive(Default)]
pub struct SessionSupervisor {
    sessions: Mutex<SessionMap>,
}

impl SessionSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, session: Arc<PtySession>) {
        self.sessions.lock().insert(session.id().clone(), session);
    }

    pub fn get(&self, id: &SessionId) -> Option<Arc<PtySession>> {
        self.sessions.lock().get(id).cloned()
    }

    pub fn remove(&self, id: &SessionId) -> Option<Arc<PtySession>> {
        self.sessions.lock().remove(id)
    }

    pub fn list(&self) -> Vec<Arc<PtySession>> {
        self.sessions.lock().values().cloned().collect()
    }

    pub fn list_for_workspace(&self, workspace: &WorkspacePath) -> Vec<Arc<PtySession>> {
        self.sessions
            .lock()
            .values()
            .filter(|s| s.workspace() == workspace)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
