// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn system_clock_returns_increasing_time() {
    let clock = SystemClock;
    let t1 = clock.now();
    std::thread::sleep(Duration::from_millis(1));
    let t2 = clock.now();
    assert!(t2 > t1);
}

#[test]
fn fake_clock_is_pinned_until_advanced() {
    let clock = FakeClock::new();
    let t1 = clock.now();
    let t2 = clock.now();
    assert_eq!(t1, t2);

    clock.advance(Duration::from_secs(60));
    assert_eq!(clock.now().duration_since(t1), Duration::from_secs(60));
}

#[test]
fn fake_clock_shares_through_the_handle() {
    let clock = FakeClock::shared();
    let shared: SharedClock = clock.clone();

    let t1 = shared.now();
    clock.advance(Duration::from_secs(30));
    assert_eq!(shared.now().duration_since(t1), Duration::from_secs(30));
}

#[test]
fn fake_clock_advances_epoch_ms_in_step() {
    let clock = FakeClock::new();
    let e1 = clock.epoch_ms();
    clock.advance(Duration::from_millis(2500));
    assert_eq!(clock.epoch_ms(), e1 + 2500);
}

#[test]
fn fake_clock_epoch_can_be_set() {
    let clock = FakeClock::new();
    clock.set_epoch_ms(42);
    assert_eq!(clock.epoch_ms(), 42);
}
