// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-client-IP sliding-window rate limiting.
//!
//! Only workspace activation is limited (10 per minute per IP). Entries
//! expire by wall clock alone: a bucket drains as its timestamps age out,
//! never in response to other requests succeeding or failing. Time comes
//! from the injected clock so tests advance a fake instead of sleeping.

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use af_core::SharedClock;

/// Activations allowed per window per IP.
pub const ACTIVATION_LIMIT: usize = 10;

/// Sliding window length.
pub const ACTIVATION_WINDOW: Duration = Duration::from_secs(60);

pub struct RateLimiter {
    max: usize,
    window: Duration,
    clock: SharedClock,
    buckets: Mutex<HashMap<IpAddr, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max: usize, window: Duration, clock: SharedClock) -> Self {
        Self {
            max,
            window,
            clock,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    pub fn activation(clock: SharedClock) -> Self {
        Self::new(ACTIVATION_LIMIT, ACTIVATION_WINDOW, clock)
    }

    /// Record an attempt; `false` means the caller is over the limit.
    pub fn check(&self, ip: IpAddr) -> bool {
        let now = self.clock.now();
        let mut buckets = self.buckets.lock();
        let bucket = buckets.entry(ip).or_default();
        while let Some(front) = bucket.front() {
            if now.saturating_duration_since(*front) >= self.window {
                bucket.pop_front();
            } else {
                break;
            }
        }
        if bucket.len() < self.max {
            bucket.push_back(now);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
#[path = "rate_limit_tests.rs"]
mod tests;
