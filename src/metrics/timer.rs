// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

use super::{StripedCounter, TimerSnapshot};

/// Lock-free duration statistics for a single key.
///
/// `count` and `total` are striped accumulators; `min` and `max` are single
/// atomics updated by a bounded compare-and-swap loop.
///
/// # Consistency
///
/// Each field is exact once writers have finished. While writers are active a
/// reader can observe a combination of fields that never existed at a single
/// instant (e.g. a count that already includes a duration whose total has not
/// been added yet).
#[derive(Debug)]
pub struct TimerMetric {
    count: StripedCounter,
    total_nanos: StripedCounter,
    /// `u64::MAX` until the first recording
    min_nanos: AtomicU64,
    max_nanos: AtomicU64,
    cas_retry_limit: u32,
}

impl TimerMetric {
    pub const DEFAULT_CAS_RETRY_LIMIT: u32 = 64;

    pub fn new(stripes: usize, cas_retry_limit: u32) -> Self {
        Self {
            count: StripedCounter::new(stripes),
            total_nanos: StripedCounter::new(stripes),
            min_nanos: AtomicU64::new(u64::MAX),
            max_nanos: AtomicU64::new(0),
            cas_retry_limit: cas_retry_limit.max(1),
        }
    }

    /// Records one duration.
    ///
    /// Returns `false` when a min or max update was abandoned after
    /// `cas_retry_limit` lost races. Count and total are always recorded.
    #[inline]
    pub fn record(&self, nanos: u64) -> bool {
        // Extremes first so a reader that sees the new count also tends to
        // see a populated min/max.
        let min_applied = update_extreme(&self.min_nanos, nanos, self.cas_retry_limit, |new, current| {
            new < current
        });
        let max_applied = update_extreme(&self.max_nanos, nanos, self.cas_retry_limit, |new, current| {
            new > current
        });

        self.total_nanos.add(nanos);
        self.count.increment();

        min_applied && max_applied
    }

    #[inline]
    pub fn count(&self) -> u64 {
        self.count.sum()
    }

    #[inline]
    pub fn total_nanos(&self) -> u64 {
        self.total_nanos.sum()
    }

    /// Smallest recorded duration, 0 before the first recording.
    #[inline]
    pub fn min_nanos(&self) -> u64 {
        match self.min_nanos.load(Ordering::Relaxed) {
            u64::MAX => 0,
            value => value,
        }
    }

    #[inline]
    pub fn max_nanos(&self) -> u64 {
        self.max_nanos.load(Ordering::Relaxed)
    }

    /// `total / count`, or 0 when nothing has been recorded.
    #[inline]
    pub fn average_nanos(&self) -> u64 {
        let count = self.count();
        if count > 0 {
            self.total_nanos() / count
        } else {
            0
        }
    }

    pub fn snapshot(&self) -> TimerSnapshot {
        let count = self.count();
        let total_time_nanos = self.total_nanos();
        TimerSnapshot {
            count,
            total_time_nanos,
            min_time_nanos: self.min_nanos(),
            max_time_nanos: self.max_nanos(),
            average_time_nanos: if count > 0 { total_time_nanos / count } else { 0 },
        }
    }

    pub fn reset(&self) {
        self.count.reset();
        self.total_nanos.reset();
        self.min_nanos.store(u64::MAX, Ordering::Relaxed);
        self.max_nanos.store(0, Ordering::Relaxed);
    }
}

impl Default for TimerMetric {
    fn default() -> Self {
        Self::new(StripedCounter::DEFAULT_STRIPES, Self::DEFAULT_CAS_RETRY_LIMIT)
    }
}

/// Moves `cell` towards `value` while `value` is more extreme than the
/// current content, giving up after `retry_limit` failed exchanges.
///
/// Returns `true` if `cell` ends up at least as extreme as `value`.
#[inline]
fn update_extreme(
    cell: &AtomicU64,
    value: u64,
    retry_limit: u32,
    more_extreme: impl Fn(u64, u64) -> bool,
) -> bool {
    let mut current = cell.load(Ordering::Relaxed);
    for _ in 0..retry_limit {
        if !more_extreme(value, current) {
            return true;
        }
        match cell.compare_exchange_weak(current, value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return true,
            Err(observed) => current = observed,
        }
    }
    !more_extreme(value, current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_initial_state() {
        let timer = TimerMetric::default();
        assert_eq!(timer.count(), 0);
        assert_eq!(timer.total_nanos(), 0);
        assert_eq!(timer.min_nanos(), 0);
        assert_eq!(timer.max_nanos(), 0);
        assert_eq!(timer.average_nanos(), 0);
    }

    #[test]
    fn test_record_tracks_extremes() {
        let timer = TimerMetric::default();
        assert!(timer.record(300));
        assert!(timer.record(100));
        assert!(timer.record(200));

        let snapshot = timer.snapshot();
        assert_eq!(snapshot.count, 3);
        assert_eq!(snapshot.total_time_nanos, 600);
        assert_eq!(snapshot.min_time_nanos, 100);
        assert_eq!(snapshot.max_time_nanos, 300);
        assert_eq!(snapshot.average_time_nanos, 200);
    }

    #[test]
    fn test_reset_restores_sentinels() {
        let timer = TimerMetric::default();
        timer.record(5);
        timer.reset();
        assert_eq!(timer.count(), 0);
        assert_eq!(timer.min_nanos(), 0);

        timer.record(9);
        assert_eq!(timer.min_nanos(), 9);
        assert_eq!(timer.max_nanos(), 9);
    }

    #[test]
    fn test_update_extreme_skips_when_not_more_extreme() {
        let cell = AtomicU64::new(10);
        assert!(update_extreme(&cell, 20, 1, |new, current| new < current));
        assert_eq!(cell.load(Ordering::Relaxed), 10);
        assert!(update_extreme(&cell, 3, 4, |new, current| new < current));
        assert_eq!(cell.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_update_extreme_gives_up_at_retry_limit() {
        let cell = AtomicU64::new(10);
        let races = std::cell::Cell::new(0);
        // Another writer lowers the cell between our load and our exchange,
        // but only once.
        let lower_first_time = |new: u64, current: u64| {
            if races.get() == 0 {
                races.set(1);
                cell.store(5, Ordering::Relaxed);
            }
            new < current
        };

        assert!(!update_extreme(&cell, 3, 1, lower_first_time));
        assert_eq!(cell.load(Ordering::Relaxed), 5);

        races.set(0);
        cell.store(10, Ordering::Relaxed);
        assert!(update_extreme(&cell, 3, 4, lower_first_time));
        assert_eq!(cell.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_concurrent_records_are_exact() {
        let timer = Arc::new(TimerMetric::default());
        let threads = 8u64;
        let per_thread = 5_000u64;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let timer = timer.clone();
                thread::spawn(move || {
                    for i in 0..per_thread {
                        // Values 1..=threads*per_thread, each exactly once.
                        timer.record(t * per_thread + i + 1);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let n = threads * per_thread;
        assert_eq!(timer.count(), n);
        assert_eq!(timer.total_nanos(), n * (n + 1) / 2);
        assert_eq!(timer.min_nanos(), 1);
        assert_eq!(timer.max_nanos(), n);
    }
}
