// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Suppressed Failure Records
//!
//! Failures inside probes are absorbed where they happen and never reach the
//! host. This module is where they are reported instead.
//!
//! # Observability
//!
//! Every record is a structured `tracing` event:
//!
//! ```text
//! DEBUG actor_probe::failure: Probe failure suppressed
//!   probe.join_point="invoke-exit"
//!   probe.panic="index out of bounds"
//!
//! WARN actor_probe::failure: Listener failed during dispatch
//!   listener.family="invocation"
//!   listener.event="on_exit"
//!   listener.panic="boom"
//! ```
//!
//! # Performance Characteristics
//!
//! The recorders are `#[cold]`: the success path of advice and dispatch never
//! calls into this module, and with no subscriber installed a record costs a
//! fast level check.

use std::any::Any;

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "Unknown panic occurred which couldn't be coerced to a string"
    }
}

/// Records a panic caught inside advice.
#[cold]
pub(crate) fn probe_failure(join_point: &'static str, payload: &(dyn Any + Send)) {
    tracing::debug!(
        probe.join_point = join_point,
        probe.panic = panic_message(payload),
        "Probe failure suppressed"
    );
}

/// Records a panic caught while delivering an event to one listener.
#[cold]
pub(crate) fn listener_failure(
    family: &'static str,
    event: &'static str,
    payload: &(dyn Any + Send),
) {
    tracing::warn!(
        listener.family = family,
        listener.event = event,
        listener.panic = panic_message(payload),
        "Listener failed during dispatch"
    );
}

/// Records a host call on a join point declared for another kind of event.
#[cold]
pub(crate) fn misrouted_call(
    type_name: &str,
    method: &str,
    declared: &'static str,
    called: &'static str,
) {
    tracing::warn!(
        join_point.type_name = type_name,
        join_point.method = method,
        join_point.declared = declared,
        join_point.called = called,
        "Join point called for the wrong event kind; ignored"
    );
}

/// Records a min/max update abandoned at the CAS retry limit.
#[cold]
pub(crate) fn dropped_extreme(key: &str, duration_nanos: u64) {
    tracing::trace!(
        metric.key = key,
        metric.duration_nanos = duration_nanos,
        "Timer extreme update dropped after retry limit"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let static_str: Box<dyn Any + Send> = Box::new("static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn Any + Send> = Box::new(42u32);

        assert_eq!(panic_message(static_str.as_ref()), "static");
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert!(panic_message(other.as_ref()).starts_with("Unknown panic"));
    }

    #[test]
    fn test_recorders_do_not_panic_without_subscriber() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        probe_failure("invoke-enter", payload.as_ref());
        listener_failure("envelope", "on_sent", payload.as_ref());
        dropped_extreme("Ping", 10);
        misrouted_call("actor::ActorCell", "invoke", "invoke", "envelope-create");
    }
}
