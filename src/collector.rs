// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::config::ProbeConfig;
use crate::context::ProbeContext;
use crate::envelope::{EnvelopeRef, Failure};
use crate::listener::InvocationListener;
use crate::metrics::{MetricsAggregator, MetricsSnapshot};
use crate::timestamp::TimestampStore;

/// The metric families a [`MessageMetricsCollector`] maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricFamily {
    /// Timer per message type: handler time
    Processing,
    /// Timer per message type: creation to processing start
    Mailbox,
    /// Counter per message type
    Messages,
    /// Counter per recipient actor path
    Actors,
    /// Counter per failure kind
    Errors,
}

impl MetricFamily {
    pub const ALL: [MetricFamily; 5] = [
        MetricFamily::Processing,
        MetricFamily::Mailbox,
        MetricFamily::Messages,
        MetricFamily::Actors,
        MetricFamily::Errors,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricFamily::Processing => "processing",
            MetricFamily::Mailbox => "mailbox",
            MetricFamily::Messages => "messages",
            MetricFamily::Actors => "actors",
            MetricFamily::Errors => "errors",
        }
    }
}

impl fmt::Display for MetricFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Invocation listener turning enter/exit events into per-message-type
/// metrics.
///
/// Mailbox time is the gap between the envelope's creation timestamp, read
/// from the context's [`TimestampStore`], and processing start. An envelope
/// the store never saw contributes a mailbox time of zero.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use actor_probe::{
///     Envelope, EnvelopeRef, InterceptionPort, MessageMetricsCollector, ProbeConfig,
///     ProbeContext,
/// };
///
/// struct Ping;
///
/// impl Envelope for Ping {
///     fn message_type(&self) -> &str {
///         "Ping"
///     }
/// }
///
/// let context = ProbeContext::new();
/// let collector = MessageMetricsCollector::install(&context, &ProbeConfig::default());
///
/// let envelope: EnvelopeRef = Arc::new(Ping);
/// context.on_created(&envelope);
/// let start = context.on_enter(&envelope);
/// context.on_exit(&envelope, start, None);
///
/// assert_eq!(collector.messages().get_count("Ping"), 1);
/// assert_eq!(collector.processing().get_timer_count("Ping"), 1);
/// ```
pub struct MessageMetricsCollector {
    timestamps: Arc<TimestampStore>,
    processing: MetricsAggregator,
    mailbox: MetricsAggregator,
    messages: MetricsAggregator,
    actors: MetricsAggregator,
    errors: MetricsAggregator,
}

impl MessageMetricsCollector {
    pub fn new(timestamps: Arc<TimestampStore>, config: &ProbeConfig) -> Self {
        let aggregator = || MetricsAggregator::with_config(&config.aggregator);
        Self {
            timestamps,
            processing: aggregator(),
            mailbox: aggregator(),
            messages: aggregator(),
            actors: aggregator(),
            errors: aggregator(),
        }
    }

    /// Creates a collector reading `context`'s timestamps and registers it
    /// with `context`'s registry.
    pub fn install(context: &ProbeContext, config: &ProbeConfig) -> Arc<Self> {
        let collector = Arc::new(Self::new(context.timestamps().clone(), config));
        context.registry().register_invocation(collector.clone());
        debug!("Message metrics collector registered.");
        collector
    }

    /// Unregisters the collector from `context`. Collected values are kept.
    pub fn uninstall(self: &Arc<Self>, context: &ProbeContext) -> bool {
        let removed = context.registry().unregister_invocation(self);
        if removed {
            debug!("Message metrics collector unregistered.");
        }
        removed
    }

    pub fn family(&self, family: MetricFamily) -> &MetricsAggregator {
        match family {
            MetricFamily::Processing => &self.processing,
            MetricFamily::Mailbox => &self.mailbox,
            MetricFamily::Messages => &self.messages,
            MetricFamily::Actors => &self.actors,
            MetricFamily::Errors => &self.errors,
        }
    }

    pub fn processing(&self) -> &MetricsAggregator {
        &self.processing
    }

    pub fn mailbox(&self) -> &MetricsAggregator {
        &self.mailbox
    }

    pub fn messages(&self) -> &MetricsAggregator {
        &self.messages
    }

    pub fn actors(&self) -> &MetricsAggregator {
        &self.actors
    }

    pub fn errors(&self) -> &MetricsAggregator {
        &self.errors
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            processing: self.processing.snapshot().timers,
            mailbox: self.mailbox.snapshot().timers,
            messages: self.messages.snapshot().counters,
            actors: self.actors.snapshot().counters,
            errors: self.errors.snapshot().counters,
        }
    }

    pub fn reset(&self) {
        for family in MetricFamily::ALL {
            self.family(family).reset();
        }
        debug!("Message metrics reset.");
    }
}

impl InvocationListener for MessageMetricsCollector {
    fn on_enter(&self, envelope: &EnvelopeRef, start_nanos: u64) {
        let created = self.timestamps.get_timestamp(envelope);
        self.mailbox
            .record(envelope.message_type(), start_nanos.saturating_sub(created));
    }

    fn on_exit(
        &self,
        envelope: &EnvelopeRef,
        _start_nanos: u64,
        elapsed_nanos: u64,
        failure: Option<Failure<'_>>,
    ) {
        let message_type = envelope.message_type();
        self.processing.record(message_type, elapsed_nanos);
        self.messages.increment(message_type);
        if let Some(recipient) = envelope.recipient() {
            self.actors.increment(recipient);
        }
        if let Some(failure) = failure {
            self.errors.increment(failure.kind());
        }
    }
}

impl fmt::Debug for MessageMetricsCollector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageMetricsCollector")
            .field("message_types", &self.messages.counter_keys())
            .field("actors", &self.actors.counter_keys())
            .finish_non_exhaustive()
    }
}
