// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Input recency tracking.
//!
//! Pure over caller-supplied epoch milliseconds so idle logic is testable
//! with a fake clock.

use std::sync::atomic::{AtomicU64, Ordering};

/// Tracks when a user last typed into a session. 0 means never.
#[derive(Debug, Default)]
pub struct InputTracker {
    last_input_at: AtomicU64,
}

impl InputTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record user input at `now_ms` (monotonic-safe epoch millis).
    pub fn record(&self, now_ms: u64) {
        self.last_input_at.store(now_ms, Ordering::SeqCst);
    }

    /// Epoch millis of the most recent input, 0 if never.
    pub fn last_input_at(&self) -> u64 {
        self.last_input_at.load(Ordering::SeqCst)
    }

    /// True when the user has never typed, or `threshold_ms` has fully
    /// elapsed since the last keystroke.
    pub fn is_idle(&self, now_ms: u64, threshold_ms: u64) -> bool {
        let last = self.last_input_at();
        last == 0 || now_ms.saturating_sub(last) >= threshold_ms
    }
}

#[cfg(test)]
#[path = "input_tests.rs"]
mod tests;
