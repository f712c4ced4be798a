// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Concurrent Metrics Aggregator
//!
//! Per-key counters and timers updated from any number of worker threads
//! without blocking them.
//!
//! # Features
//!
//! - **Counters**: monotonic `u64` per key, striped across cache-padded lanes
//! - **Timers**: count, total, min and max per key; average is derived
//! - **Lazy keys**: metric objects are created on first touch
//! - **Enumeration**: sorted key lists and owned snapshots for export adapters
//!
//! # Design Principles
//!
//! - **Lock-free**: `papaya` maps for keys, atomics for values
//! - **Bounded CAS**: min/max updates give up after a configured number of
//!   lost races instead of spinning without limit
//! - **Delegate export**: the aggregator exposes values; serializing them to
//!   a wire format is left to the caller

mod aggregator;
mod counter;
mod snapshot;
mod timer;

pub use aggregator::{MetricsAggregator, TimerGuard};
pub use counter::StripedCounter;
pub use snapshot::{AggregatorSnapshot, MetricsSnapshot, TimerSnapshot};
pub use timer::TimerMetric;
