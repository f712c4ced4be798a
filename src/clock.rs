// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Process-wide monotonic clock in nanoseconds.
//!
//! Every timestamp handed out by this crate is measured from a single anchor
//! `Instant` taken on first use, so values from different threads and
//! different probe contexts are directly comparable.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

static ANCHOR: OnceLock<Instant> = OnceLock::new();

#[inline]
fn anchor() -> Instant {
    *ANCHOR.get_or_init(Instant::now)
}

/// Returns monotonic nanoseconds since the process anchor.
///
/// Saturates at `u64::MAX` (~584 years).
#[inline]
pub fn now_nanos() -> u64 {
    duration_to_nanos(anchor().elapsed())
}

/// Converts a `Duration` to nanoseconds, capped at `u64::MAX`.
#[inline]
pub fn duration_to_nanos(duration: Duration) -> u64 {
    duration.as_nanos().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_monotonic() {
        let a = now_nanos();
        std::thread::sleep(Duration::from_millis(2));
        let b = now_nanos();
        assert!(b > a);
        assert!(b - a >= 2_000_000);
    }

    #[test]
    fn test_duration_to_nanos_caps() {
        assert_eq!(duration_to_nanos(Duration::from_micros(3)), 3_000);
        assert_eq!(duration_to_nanos(Duration::MAX), u64::MAX);
    }
}
