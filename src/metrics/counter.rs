// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crossbeam_utils::CachePadded;

static NEXT_STRIPE_HINT: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static STRIPE_HINT: usize = NEXT_STRIPE_HINT.fetch_add(1, Ordering::Relaxed);
}

/// Stripe hint of the calling thread. Threads are assigned consecutive hints
/// on first use, so up to `stripes` threads never share a lane.
#[inline]
fn thread_hint() -> usize {
    // Thread-local storage is gone while the thread is being torn down.
    STRIPE_HINT.try_with(|hint| *hint).unwrap_or(0)
}

/// Monotonic `u64` accumulator sharded over cache-padded lanes.
///
/// Writers add to the lane owned by their thread, so increments from
/// different worker threads do not bounce the same cache line. Reads sum every
/// lane and are eventually consistent with in-flight writers.
///
/// The lane count is rounded up to a power of two so a lane is selected with
/// a mask.
#[derive(Debug)]
pub struct StripedCounter {
    stripes: Box<[CachePadded<AtomicU64>]>,
    mask: usize,
}

impl StripedCounter {
    pub const DEFAULT_STRIPES: usize = 32;

    /// Creates a counter with at least `stripe_count` lanes (minimum one).
    pub fn new(stripe_count: usize) -> Self {
        let stripe_count = stripe_count.max(1).next_power_of_two();
        let stripes = (0..stripe_count)
            .map(|_| CachePadded::new(AtomicU64::new(0)))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Self {
            stripes,
            mask: stripe_count - 1,
        }
    }

    /// Returns the number of lanes.
    #[inline]
    pub fn stripes(&self) -> usize {
        self.stripes.len()
    }

    #[inline]
    pub fn increment(&self) {
        self.add(1);
    }

    /// Adds `value` to the calling thread's lane.
    #[inline]
    pub fn add(&self, value: u64) {
        let index = thread_hint() & self.mask;
        self.stripes[index].fetch_add(value, Ordering::Relaxed);
    }

    /// Sum of every lane, saturating at `u64::MAX`.
    #[inline]
    pub fn sum(&self) -> u64 {
        self.stripes
            .iter()
            .map(|stripe| stripe.load(Ordering::Relaxed))
            .fold(0u64, |acc, value| acc.saturating_add(value))
    }

    /// Zeroes every lane. Not atomic with respect to concurrent writers.
    pub fn reset(&self) {
        for stripe in self.stripes.iter() {
            stripe.store(0, Ordering::Relaxed);
        }
    }
}

impl Default for StripedCounter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_STRIPES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_stripe_count_rounds_to_power_of_two() {
        assert_eq!(StripedCounter::new(0).stripes(), 1);
        assert_eq!(StripedCounter::new(5).stripes(), 8);
        assert_eq!(StripedCounter::new(32).stripes(), 32);
    }

    #[test]
    fn test_add_and_reset() {
        let counter = StripedCounter::new(4);
        counter.increment();
        counter.add(41);
        assert_eq!(counter.sum(), 42);

        counter.reset();
        assert_eq!(counter.sum(), 0);
    }

    #[test]
    fn test_concurrent_increments_are_exact() {
        let counter = Arc::new(StripedCounter::new(8));
        let threads = 16;
        let per_thread = 10_000;

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let counter = counter.clone();
                thread::spawn(move || {
                    for _ in 0..per_thread {
                        counter.increment();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.sum(), threads * per_thread);
    }
}
