// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::clock::now_nanos;
use crate::envelope::{EnvelopeRef, Failure};
use crate::port::InterceptionPort;

/// Logic attached to host join points.
///
/// Advice forwards each host event to its [`InterceptionPort`] and catches
/// any panic raised behind the port, so the host's return value and errors
/// are never altered by the probes. A caught panic is reported to
/// [`InterceptionPort::on_probe_failure`] and otherwise dropped.
pub struct Advice {
    port: Arc<dyn InterceptionPort>,
}

impl Advice {
    pub fn new(port: Arc<dyn InterceptionPort>) -> Self {
        Self { port }
    }

    /// Returns the start timestamp for the matching [`exit`](Advice::exit).
    ///
    /// If the port panics the current time is returned instead, so the exit
    /// side still measures the invocation.
    #[inline]
    pub fn enter(&self, envelope: &EnvelopeRef) -> u64 {
        match catch_unwind(AssertUnwindSafe(|| self.port.on_enter(envelope))) {
            Ok(start_nanos) => start_nanos,
            Err(payload) => {
                self.port.on_probe_failure("invoke-enter", payload.as_ref());
                now_nanos()
            }
        }
    }

    #[inline]
    pub fn exit(&self, envelope: &EnvelopeRef, start_nanos: u64, failure: Option<Failure<'_>>) {
        let result = catch_unwind(AssertUnwindSafe(|| {
            self.port.on_exit(envelope, start_nanos, failure)
        }));
        if let Err(payload) = result {
            self.port.on_probe_failure("invoke-exit", payload.as_ref());
        }
    }

    #[inline]
    pub fn created(&self, envelope: &EnvelopeRef) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.port.on_created(envelope))) {
            self.port.on_probe_failure("envelope-create", payload.as_ref());
        }
    }

    #[inline]
    pub fn copied(&self, original: &EnvelopeRef, copy: &EnvelopeRef) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.port.on_copied(original, copy))) {
            self.port.on_probe_failure("envelope-copy", payload.as_ref());
        }
    }

    #[inline]
    pub fn sent(&self, envelope: &EnvelopeRef) {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| self.port.on_sent(envelope))) {
            self.port.on_probe_failure("envelope-send", payload.as_ref());
        }
    }
}

impl std::fmt::Debug for Advice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Advice").finish_non_exhaustive()
    }
}
