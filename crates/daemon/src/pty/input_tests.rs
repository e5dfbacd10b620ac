// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn never_typed_is_idle_at_any_threshold() {
    let tracker = InputTracker::new();
    assert_eq!(tracker.last_input_at(), 0);
    assert!(tracker.is_idle(0, 1));
    assert!(tracker.is_idle(1_000_000, 60_000));
}

#[test]
fn idle_flips_exactly_at_threshold() {
    let tracker = InputTracker::new();
    tracker.record(10_000);

    // Before the threshold elapses: not idle.
    assert!(!tracker.is_idle(10_000, 3_000));
    assert!(!tracker.is_idle(12_999, 3_000));
    // At and after: idle.
    assert!(tracker.is_idle(13_000, 3_000));
    assert!(tracker.is_idle(20_000, 3_000));
}

#[test]
fn new_input_resets_the_clock() {
    let tracker = InputTracker::new();
    tracker.record(1_000);
    assert!(tracker.is_idle(5_000, 3_000));

    tracker.record(5_000);
    assert!(!tracker.is_idle(6_000, 3_000));
    assert!(tracker.is_idle(8_000, 3_000));
}

#[test]
fn clock_regression_does_not_underflow() {
    let tracker = InputTracker::new();
    tracker.record(10_000);
    // now before last_input_at: saturating math, simply not idle.
    assert!(!tracker.is_idle(9_000, 1));
}
