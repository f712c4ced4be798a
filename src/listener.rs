// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Event Listener Registry
//!
//! Publish/subscribe fan-out between probe call sites and metric consumers.
//! Two independent listener families exist, each in its own collection, so a
//! consumer only receives the events it subscribed to:
//!
//! - [`InvocationListener`]: message invocation enter/exit
//! - [`EnvelopeListener`]: envelope creation, copy and send
//!
//! Registration and removal are lock-free and may happen at any time,
//! including while another thread is dispatching. Dispatch runs every
//! listener synchronously on the calling thread in no particular order.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use papaya::HashMap;

use crate::envelope::{EnvelopeRef, Failure};
use crate::failure;

/// Consumer of message invocation events.
pub trait InvocationListener: Send + Sync {
    /// Called when the host starts processing `envelope` at `start_nanos`.
    #[allow(unused_variables)]
    fn on_enter(&self, envelope: &EnvelopeRef, start_nanos: u64) {}

    /// Called when processing of `envelope` ended.
    ///
    /// * `start_nanos` - the timestamp returned by the matching enter
    /// * `elapsed_nanos` - processing time
    /// * `failure` - `Some` when the handler failed
    fn on_exit(
        &self,
        envelope: &EnvelopeRef,
        start_nanos: u64,
        elapsed_nanos: u64,
        failure: Option<Failure<'_>>,
    );
}

/// Consumer of envelope lifecycle events.
#[allow(unused_variables)]
pub trait EnvelopeListener: Send + Sync {
    fn on_created(&self, envelope: &EnvelopeRef) {}

    fn on_copied(&self, original: &EnvelopeRef, copy: &EnvelopeRef) {}

    fn on_sent(&self, envelope: &EnvelopeRef) {}
}

/// Identity of a registered listener: the address of its shared allocation.
#[inline]
fn listener_id<L: ?Sized>(listener: &Arc<L>) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}

/// Concurrent registry of invocation and envelope listeners.
///
/// A listener that panics is caught individually: the remaining listeners
/// still receive the event, the failure is counted and logged, and the
/// listener stays registered.
pub struct ListenerRegistry {
    invocation: HashMap<usize, Arc<dyn InvocationListener>>,
    envelope: HashMap<usize, Arc<dyn EnvelopeListener>>,
    failures: AtomicU64,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            invocation: HashMap::new(),
            envelope: HashMap::new(),
            failures: AtomicU64::new(0),
        }
    }

    /// Adds an invocation listener. Returns `false` if this exact `Arc` is
    /// already registered.
    pub fn register_invocation(&self, listener: Arc<dyn InvocationListener>) -> bool {
        self.invocation
            .pin()
            .try_insert(listener_id(&listener), listener)
            .is_ok()
    }

    /// Removes an invocation listener by identity. Returns `false` if it was
    /// not registered.
    pub fn unregister_invocation<L: InvocationListener + ?Sized>(&self, listener: &Arc<L>) -> bool {
        self.invocation.pin().remove(&listener_id(listener)).is_some()
    }

    /// Adds an envelope listener. Returns `false` if this exact `Arc` is
    /// already registered.
    pub fn register_envelope(&self, listener: Arc<dyn EnvelopeListener>) -> bool {
        self.envelope
            .pin()
            .try_insert(listener_id(&listener), listener)
            .is_ok()
    }

    /// Removes an envelope listener by identity. Returns `false` if it was
    /// not registered.
    pub fn unregister_envelope<L: EnvelopeListener + ?Sized>(&self, listener: &Arc<L>) -> bool {
        self.envelope.pin().remove(&listener_id(listener)).is_some()
    }

    pub fn invocation_listeners(&self) -> usize {
        self.invocation.pin().len()
    }

    pub fn envelope_listeners(&self) -> usize {
        self.envelope.pin().len()
    }

    /// Number of listener panics caught so far.
    pub fn listener_failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Removes every listener of both families.
    pub fn clear(&self) {
        self.invocation.pin().clear();
        self.envelope.pin().clear();
    }

    pub fn dispatch_enter(&self, envelope: &EnvelopeRef, start_nanos: u64) {
        for (_, listener) in self.invocation.pin().iter() {
            let delivered = catch_unwind(AssertUnwindSafe(|| listener.on_enter(envelope, start_nanos)));
            if let Err(payload) = delivered {
                self.listener_failed("invocation", "on_enter", payload.as_ref());
            }
        }
    }

    pub fn dispatch_exit(
        &self,
        envelope: &EnvelopeRef,
        start_nanos: u64,
        elapsed_nanos: u64,
        failure: Option<Failure<'_>>,
    ) {
        for (_, listener) in self.invocation.pin().iter() {
            let delivered = catch_unwind(AssertUnwindSafe(|| {
                listener.on_exit(envelope, start_nanos, elapsed_nanos, failure)
            }));
            if let Err(payload) = delivered {
                self.listener_failed("invocation", "on_exit", payload.as_ref());
            }
        }
    }

    pub fn dispatch_created(&self, envelope: &EnvelopeRef) {
        for (_, listener) in self.envelope.pin().iter() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener.on_created(envelope))) {
                self.listener_failed("envelope", "on_created", payload.as_ref());
            }
        }
    }

    pub fn dispatch_copied(&self, original: &EnvelopeRef, copy: &EnvelopeRef) {
        for (_, listener) in self.envelope.pin().iter() {
            if let Err(payload) =
                catch_unwind(AssertUnwindSafe(|| listener.on_copied(original, copy)))
            {
                self.listener_failed("envelope", "on_copied", payload.as_ref());
            }
        }
    }

    pub fn dispatch_sent(&self, envelope: &EnvelopeRef) {
        for (_, listener) in self.envelope.pin().iter() {
            if let Err(payload) = catch_unwind(AssertUnwindSafe(|| listener.on_sent(envelope))) {
                self.listener_failed("envelope", "on_sent", payload.as_ref());
            }
        }
    }

    #[cold]
    fn listener_failed(
        &self,
        family: &'static str,
        event: &'static str,
        payload: &(dyn std::any::Any + Send),
    ) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        failure::listener_failure(family, event, payload);
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("invocation_listeners", &self.invocation_listeners())
            .field("envelope_listeners", &self.envelope_listeners())
            .field("listener_failures", &self.listener_failures())
            .finish()
    }
}
