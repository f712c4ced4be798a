// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

/// Point-in-time values of one timer.
///
/// # Consistency Note
///
/// Fields are read one after another without coordinating with writers, so
/// under live traffic `average_time_nanos` may be computed from a count and a
/// total that belong to slightly different moments.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct TimerSnapshot {
    pub count: u64,
    pub total_time_nanos: u64,
    /// 0 when `count` is 0.
    pub min_time_nanos: u64,
    pub max_time_nanos: u64,
    /// `total_time_nanos / count`, or 0 when `count` is 0.
    pub average_time_nanos: u64,
}

impl TimerSnapshot {
    pub fn average(&self) -> Duration {
        Duration::from_nanos(self.average_time_nanos)
    }

    pub fn min(&self) -> Duration {
        Duration::from_nanos(self.min_time_nanos)
    }

    pub fn max(&self) -> Duration {
        Duration::from_nanos(self.max_time_nanos)
    }

    pub fn total(&self) -> Duration {
        Duration::from_nanos(self.total_time_nanos)
    }
}

/// Owned copy of every counter and timer held by one
/// [`MetricsAggregator`](crate::MetricsAggregator), ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct AggregatorSnapshot {
    pub counters: BTreeMap<String, u64>,
    pub timers: BTreeMap<String, TimerSnapshot>,
}

/// Snapshot of every family tracked by a
/// [`MessageMetricsCollector`](crate::MessageMetricsCollector).
///
/// This is the shape an export adapter polls and serializes.
///
/// ```rust,ignore
/// let snapshot = collector.snapshot();
/// for (message_type, timer) in &snapshot.processing {
///     println!("{message_type}: {} msgs, avg {:?}", timer.count, timer.average());
/// }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct MetricsSnapshot {
    /// Handler time per message type.
    pub processing: BTreeMap<String, TimerSnapshot>,
    /// Time between envelope creation and processing start, per message type.
    pub mailbox: BTreeMap<String, TimerSnapshot>,
    /// Processed messages per message type.
    pub messages: BTreeMap<String, u64>,
    /// Processed messages per recipient actor path.
    pub actors: BTreeMap<String, u64>,
    /// Failed invocations per failure kind.
    pub errors: BTreeMap<String, u64>,
}
