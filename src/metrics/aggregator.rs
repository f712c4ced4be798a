// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use papaya::HashMap;

use super::{AggregatorSnapshot, StripedCounter, TimerMetric};
use crate::clock::duration_to_nanos;
use crate::config::AggregatorConfig;
use crate::failure;

/// Keyed counters and timers, safe under any number of concurrent writers.
///
/// Metric objects are created on first touch of a key. Lookups of existing
/// keys take no lock and allocate nothing; a racing first touch of the same
/// key from several threads converges on a single metric instance.
///
/// # Thread Safety
///
/// - Counter and timer updates use striped atomics and bounded CAS loops
/// - The key maps are lock-free (`papaya::HashMap`)
/// - Reads are eventually consistent with in-flight writers
///
/// # Example
///
/// ```rust
/// use actor_probe::MetricsAggregator;
///
/// let aggregator = MetricsAggregator::new();
/// aggregator.increment("Ping");
/// aggregator.record("Ping", 1_500);
/// aggregator.record("Ping", 500);
///
/// assert_eq!(aggregator.get_count("Ping"), 1);
/// assert_eq!(aggregator.get_average_time_nanos("Ping"), 1_000);
/// assert_eq!(aggregator.get_average_time_nanos("Pong"), 0);
/// ```
#[derive(Debug)]
pub struct MetricsAggregator {
    counters: HashMap<String, StripedCounter>,
    timers: HashMap<String, TimerMetric>,
    stripes: usize,
    cas_retry_limit: u32,
    dropped_extremes: AtomicU64,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::with_config(&AggregatorConfig::default())
    }

    pub fn with_config(config: &AggregatorConfig) -> Self {
        Self {
            counters: HashMap::new(),
            timers: HashMap::new(),
            stripes: config.stripes,
            cas_retry_limit: config.cas_retry_limit,
            dropped_extremes: AtomicU64::new(0),
        }
    }

    // Counters

    #[inline]
    pub fn increment(&self, key: &str) {
        self.add(key, 1);
    }

    #[inline]
    pub fn add(&self, key: &str, value: u64) {
        let counters = self.counters.pin();
        match counters.get(key) {
            Some(counter) => counter.add(value),
            None => counters
                .get_or_insert_with(key.to_owned(), || StripedCounter::new(self.stripes))
                .add(value),
        }
    }

    /// Current value of the counter, 0 for an unknown key.
    pub fn get_count(&self, key: &str) -> u64 {
        self.counters
            .pin()
            .get(key)
            .map(StripedCounter::sum)
            .unwrap_or(0)
    }

    // Timers

    /// Records one duration under `key`.
    #[inline]
    pub fn record(&self, key: &str, duration_nanos: u64) {
        let timers = self.timers.pin();
        let applied = match timers.get(key) {
            Some(timer) => timer.record(duration_nanos),
            None => timers
                .get_or_insert_with(key.to_owned(), || {
                    TimerMetric::new(self.stripes, self.cas_retry_limit)
                })
                .record(duration_nanos),
        };

        if !applied {
            self.dropped_extremes.fetch_add(1, Ordering::Relaxed);
            failure::dropped_extreme(key, duration_nanos);
        }
    }

    #[inline]
    pub fn record_duration(&self, key: &str, duration: Duration) {
        self.record(key, duration_to_nanos(duration));
    }

    /// Starts a guard that records its lifetime under `key` when dropped.
    pub fn start_timer<'a>(&'a self, key: &'a str) -> TimerGuard<'a> {
        TimerGuard {
            aggregator: self,
            key,
            start: Instant::now(),
        }
    }

    pub fn get_timer_count(&self, key: &str) -> u64 {
        self.timers.pin().get(key).map(TimerMetric::count).unwrap_or(0)
    }

    pub fn get_total_time_nanos(&self, key: &str) -> u64 {
        self.timers
            .pin()
            .get(key)
            .map(TimerMetric::total_nanos)
            .unwrap_or(0)
    }

    /// `total / count` for the timer, 0 when the key is unknown or empty.
    pub fn get_average_time_nanos(&self, key: &str) -> u64 {
        self.timers
            .pin()
            .get(key)
            .map(TimerMetric::average_nanos)
            .unwrap_or(0)
    }

    pub fn get_min_time_nanos(&self, key: &str) -> u64 {
        self.timers
            .pin()
            .get(key)
            .map(TimerMetric::min_nanos)
            .unwrap_or(0)
    }

    pub fn get_max_time_nanos(&self, key: &str) -> u64 {
        self.timers
            .pin()
            .get(key)
            .map(TimerMetric::max_nanos)
            .unwrap_or(0)
    }

    // Enumeration

    /// Every key that has a counter, sorted.
    pub fn counter_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.counters.pin().iter().map(|(k, _)| k.clone()).collect();
        keys.sort();
        keys
    }

    /// Every key that has a timer, sorted.
    pub fn timer_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.timers.pin().iter().map(|(k, _)| k.clone()).collect();
        keys.sort();
        keys
    }

    /// Number of min/max updates abandoned at the CAS retry limit.
    pub fn dropped_extremes(&self) -> u64 {
        self.dropped_extremes.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> AggregatorSnapshot {
        AggregatorSnapshot {
            counters: self
                .counters
                .pin()
                .iter()
                .map(|(k, v)| (k.clone(), v.sum()))
                .collect(),
            timers: self
                .timers
                .pin()
                .iter()
                .map(|(k, v)| (k.clone(), v.snapshot()))
                .collect(),
        }
    }

    /// Drops every counter and timer.
    ///
    /// Not coordinated with concurrent writers: an update racing with the
    /// reset may land in a metric that is being removed and be lost, or
    /// recreate its key right after the reset.
    pub fn reset(&self) {
        self.counters.pin().clear();
        self.timers.pin().clear();
        self.dropped_extremes.store(0, Ordering::Relaxed);
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for timing a scope.
///
/// When this guard is dropped, it records the elapsed time under its key.
///
/// ```rust
/// use actor_probe::MetricsAggregator;
///
/// let aggregator = MetricsAggregator::new();
/// {
///     let _guard = aggregator.start_timer("rebalance");
///     // ... timed work ...
/// }
/// assert_eq!(aggregator.get_timer_count("rebalance"), 1);
/// ```
pub struct TimerGuard<'a> {
    aggregator: &'a MetricsAggregator,
    key: &'a str,
    start: Instant,
}

impl Drop for TimerGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        self.aggregator.record_duration(self.key, self.start.elapsed());
    }
}
