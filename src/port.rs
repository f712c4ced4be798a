// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::any::Any;

use crate::envelope::{EnvelopeRef, Failure};
use crate::failure;

/// The narrow interface host bindings call into.
///
/// A binding (the bundled [`HookTable`](crate::HookTable) or a custom
/// [`InstrumentationHandle`](crate::InstrumentationHandle)) is the only code
/// that knows the host's concrete types. It translates host events into these
/// five calls; everything behind the port depends on nothing host-specific.
///
/// Bindings never call a port directly: they go through
/// [`Advice`](crate::Advice), which isolates the host from panics raised
/// behind the port.
pub trait InterceptionPort: Send + Sync {
    /// Message processing starts. Returns the start timestamp the binding
    /// hands back to [`on_exit`](InterceptionPort::on_exit).
    fn on_enter(&self, envelope: &EnvelopeRef) -> u64;

    /// Message processing ended, normally or with `failure`.
    fn on_exit(&self, envelope: &EnvelopeRef, start_nanos: u64, failure: Option<Failure<'_>>);

    fn on_created(&self, envelope: &EnvelopeRef);

    fn on_copied(&self, original: &EnvelopeRef, copy: &EnvelopeRef);

    fn on_sent(&self, envelope: &EnvelopeRef);

    /// Called by [`Advice`](crate::Advice) after it caught a panic raised
    /// while serving `join_point`.
    fn on_probe_failure(&self, join_point: &'static str, payload: &(dyn Any + Send)) {
        failure::probe_failure(join_point, payload);
    }
}
