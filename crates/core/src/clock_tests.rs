// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn fake_clock_advances_monotonically() {
    let clock = FakeClock::new();
    let first = clock.now_micros();
    clock.advance(Duration::from_millis(5));
    let second = clock.now_micros();
    assert!(second > first);
    assert_eq!(second - first, 5_000);
}

#[test]
fn fake_clock_set_is_absolute() {
    let clock = FakeClock::new();
    let target = DateTime::from_timestamp(1_800_000_000, 0).unwrap();
    clock.set(target);
    assert_eq!(clock.now(), target);
}

#[test]
fn system_clock_now_ms_is_plausible() {
    let clock = SystemClock;
    // Sanity bound: anything after 2020-01-01 in epoch ms.
    assert!(clock.now_ms() > 1_577_836_800_000);
}
