// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::info;

use crate::clock::now_nanos;
use crate::config::ProbeConfig;
use crate::envelope::{EnvelopeRef, Failure};
use crate::failure;
use crate::listener::ListenerRegistry;
use crate::port::InterceptionPort;
use crate::timestamp::TimestampStore;

/// The instrumentation context.
///
/// Owns the listener registry, the timestamp store and the count of
/// suppressed probe failures. A context is constructed explicitly, shared by
/// `Arc` with every advice attached on its behalf, and torn down with
/// [`teardown`](ProbeContext::teardown). Several contexts can coexist, e.g.
/// one per test.
///
/// The timestamp store is registered as an envelope listener on
/// construction, so envelope events reaching the context are correlated
/// without further wiring.
pub struct ProbeContext {
    registry: ListenerRegistry,
    timestamps: Arc<TimestampStore>,
    suppressed_failures: AtomicU64,
}

impl ProbeContext {
    pub fn new() -> Arc<Self> {
        Self::with_config(&ProbeConfig::default())
    }

    pub fn with_config(config: &ProbeConfig) -> Arc<Self> {
        let context = Self {
            registry: ListenerRegistry::new(),
            timestamps: Arc::new(TimestampStore::with_config(&config.timestamps)),
            suppressed_failures: AtomicU64::new(0),
        };
        context.registry.register_envelope(context.timestamps.clone());
        Arc::new(context)
    }

    pub fn registry(&self) -> &ListenerRegistry {
        &self.registry
    }

    pub fn timestamps(&self) -> &Arc<TimestampStore> {
        &self.timestamps
    }

    /// Number of panics caught inside advice served by this context.
    pub fn suppressed_failures(&self) -> u64 {
        self.suppressed_failures.load(Ordering::Relaxed)
    }

    /// Unregisters every consumer listener and clears every timestamp record.
    ///
    /// The context's own timestamp store stays registered, so consumers
    /// installed afterwards still get mailbox times.
    pub fn teardown(&self) {
        self.registry.clear();
        self.timestamps.reset();
        self.registry.register_envelope(self.timestamps.clone());
        info!("Probe context torn down.");
    }
}

impl std::fmt::Debug for ProbeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeContext")
            .field("registry", &self.registry)
            .field("timestamps", &self.timestamps)
            .field("suppressed_failures", &self.suppressed_failures())
            .finish()
    }
}

impl InterceptionPort for ProbeContext {
    #[inline]
    fn on_enter(&self, envelope: &EnvelopeRef) -> u64 {
        let start_nanos = now_nanos();
        self.registry.dispatch_enter(envelope, start_nanos);
        start_nanos
    }

    #[inline]
    fn on_exit(&self, envelope: &EnvelopeRef, start_nanos: u64, failure: Option<Failure<'_>>) {
        let elapsed_nanos = now_nanos().saturating_sub(start_nanos);
        self.registry
            .dispatch_exit(envelope, start_nanos, elapsed_nanos, failure);
    }

    #[inline]
    fn on_created(&self, envelope: &EnvelopeRef) {
        self.registry.dispatch_created(envelope);
    }

    #[inline]
    fn on_copied(&self, original: &EnvelopeRef, copy: &EnvelopeRef) {
        self.registry.dispatch_copied(original, copy);
    }

    #[inline]
    fn on_sent(&self, envelope: &EnvelopeRef) {
        self.registry.dispatch_sent(envelope);
    }

    fn on_probe_failure(&self, join_point: &'static str, payload: &(dyn Any + Send)) {
        self.suppressed_failures.fetch_add(1, Ordering::Relaxed);
        failure::probe_failure(join_point, payload);
    }
}
