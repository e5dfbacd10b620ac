// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Clock abstraction for testable time handling.
//!
//! Time-dependent subsystems (input recency on PTY sessions, activation
//! rate-limit windows) hold an injected [`SharedClock`] instead of reaching
//! for the system time, so tests can drive them with a [`FakeClock`].

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A source of the current time.
///
/// Object-safe on purpose: consumers store a [`SharedClock`] rather than
/// growing a type parameter per subsystem.
pub trait Clock: Send + Sync {
    /// Monotonic instant, for interval arithmetic.
    fn now(&self) -> Instant;
    /// Epoch milliseconds, for persisted timestamps. Monotonic-safe: a fake
    /// never moves backwards, and consumers use saturating arithmetic.
    fn epoch_ms(&self) -> u64;
}

/// Shared handle to a clock implementation.
pub type SharedClock = Arc<dyn Clock>;

/// Real system clock.
#[derive(Clone, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Shared handle in the form consumers store.
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Fake clock for tests: pinned at construction, moves only when advanced.
pub struct FakeClock {
    origin: Instant,
    offset: Mutex<Duration>,
    epoch_ms: Mutex<u64>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
            epoch_ms: Mutex::new(1_000_000),
        }
    }

    /// Shared handle; coerces to [`SharedClock`] at injection points.
    pub fn shared() -> Arc<FakeClock> {
        Arc::new(Self::new())
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        *self.offset.lock() += duration;
        *self.epoch_ms.lock() += duration.as_millis() as u64;
    }

    /// Set the epoch milliseconds value.
    pub fn set_epoch_ms(&self, ms: u64) {
        *self.epoch_ms.lock() = ms;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }

    fn epoch_ms(&self) -> u64 {
        *self.epoch_ms.lock()
    }
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
