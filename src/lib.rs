// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! # actor-probe: Message Metrics for Actor Runtimes
//!
//! `actor-probe` observes an actor runtime's message traffic without touching
//! its source. Advice attached to a handful of named host join points feeds
//! a lock-free pipeline of listeners, timestamp correlation and metric
//! aggregation, all running inline on the host's worker threads.
//!
//! ## Features
//!
//! - **Non-intrusive Probes**: Advice attaches to host join points by type and
//!   method name and never alters the host's return values or errors.
//!   - Invocation entry/exit of an actor's execution unit
//!   - Envelope creation, copy and send
//! - **Mailbox Time**: Envelopes are stamped at creation; the stamp follows
//!   copies and is read back when processing starts.
//! - **Lock-free Aggregation**: Striped counters and timers with bounded
//!   compare-and-swap min/max.
//! - **Failure Isolation**: A panicking probe or listener is caught, counted
//!   and logged; the host never sees it.
//! - **Shard Keys**: CRC-32 based shard id derivation for sharded routing.
//!
//! ## Core Concepts
//!
//! - **`ProbeContext`**: Owns the listener registry and the timestamp store.
//!   Explicitly constructed, shared by `Arc`, torn down explicitly.
//! - **`Instrumentation`**: Installs advice for a context into a host's
//!   `InstrumentationHandle`, such as the bundled `HookTable`.
//! - **`InvocationListener` / `EnvelopeListener`**: Consumers of probe events.
//! - **`MessageMetricsCollector`**: The standard consumer, keeping processing
//!   time, mailbox time, message, actor and error metrics.
//! - **`MetricsAggregator`**: Keyed counters and timers.
//!
//! ## Getting Started
//!
//! ```rust
//! use std::sync::Arc;
//! use actor_probe::{
//!     Envelope, EnvelopeRef, HookTable, Instrumentation, MessageMetricsCollector,
//!     ProbeConfig, ProbeContext, Target,
//! };
//!
//! struct Ping;
//!
//! impl Envelope for Ping {
//!     fn message_type(&self) -> &str {
//!         "Ping"
//!     }
//! }
//!
//! # fn main() -> actor_probe::Result<()> {
//! // 1. The host declares its join points
//! let host = Arc::new(HookTable::new());
//! let points = host.declare_all(&Target::defaults());
//!
//! // 2. Build a context, register the collector, install advice
//! let config = ProbeConfig::default();
//! let context = ProbeContext::with_config(&config);
//! let collector = MessageMetricsCollector::install(&context, &config);
//! let instrumentation = Instrumentation::new(context.clone(), &config);
//! instrumentation.install(&host)?;
//!
//! // 3. The host drives its join points
//! let envelope: EnvelopeRef = Arc::new(Ping);
//! points[1].created(&envelope);
//! let token = points[0].enter(&envelope);
//! points[0].exit(&envelope, token, None);
//!
//! // 4. Read the metrics
//! assert_eq!(collector.messages().get_count("Ping"), 1);
//! assert_eq!(collector.processing().get_timer_count("Ping"), 1);
//! # Ok(())
//! # }
//! ```

pub mod clock;
mod collector;
pub mod config;
mod context;
mod envelope;
mod error;
mod failure;
mod instrument;
mod listener;
mod metrics;
mod port;
mod shard;
mod timestamp;

pub use collector::{MessageMetricsCollector, MetricFamily};
pub use config::{AggregatorConfig, ProbeConfig, ShardingConfig, TimestampConfig};
pub use context::ProbeContext;
pub use envelope::{Envelope, EnvelopeId, EnvelopeRef, Failure};
pub use error::{Error, Result};
pub use instrument::{
    Advice, HookTable, InstallReport, Instrumentation, InstrumentationHandle, JoinPoint,
    JoinPointKind, Target,
};
pub use listener::{EnvelopeListener, InvocationListener, ListenerRegistry};
pub use metrics::{
    AggregatorSnapshot, MetricsAggregator, MetricsSnapshot, StripedCounter, TimerGuard,
    TimerMetric, TimerSnapshot,
};
pub use port::InterceptionPort;
pub use shard::{ShardKeyExtractor, ShardingEnvelope, DEFAULT_NUMBER_OF_SHARDS};
pub use timestamp::{SweepStats, TimestampStore};
