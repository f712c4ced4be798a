// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Opaque view of host-owned envelopes.
//!
//! The host runtime owns its envelopes. Probes never construct or destroy
//! them; they consult an envelope's identity (the address of its shared
//! allocation) and the two structural accessors of [`Envelope`].

use std::fmt;
use std::sync::Arc;

/// The surface a host envelope exposes to probes.
///
/// Bindings implement this for the host's envelope type, which is then shared
/// as an [`EnvelopeRef`] through its mailbox.
///
/// ```rust
/// use actor_probe::Envelope;
///
/// struct HostEnvelope {
///     type_name: &'static str,
///     recipient: String,
/// }
///
/// impl Envelope for HostEnvelope {
///     fn message_type(&self) -> &str {
///         self.type_name
///     }
///
///     fn recipient(&self) -> Option<&str> {
///         Some(&self.recipient)
///     }
/// }
/// ```
pub trait Envelope: Send + Sync + 'static {
    /// Name of the payload's type, used as the metric key for per-type metrics.
    fn message_type(&self) -> &str;

    /// Path of the receiving actor, if the host tracks one.
    fn recipient(&self) -> Option<&str> {
        None
    }
}

/// Shared handle to a host envelope.
pub type EnvelopeRef = Arc<dyn Envelope>;

/// Identity of an envelope: the address of its shared allocation.
///
/// Two clones of the same `Arc` share an id; a copied envelope (a new
/// allocation) gets a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EnvelopeId(usize);

impl EnvelopeId {
    /// Returns the identity of `envelope`.
    #[inline]
    pub fn of(envelope: &EnvelopeRef) -> Self {
        EnvelopeId(Arc::as_ptr(envelope) as *const () as usize)
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Describes why an invocation ended abnormally.
///
/// Passed to exit advice in place of a thrown exception. `kind` is the key the
/// error counters are grouped by.
#[derive(Clone, Copy)]
pub struct Failure<'a> {
    kind: &'a str,
    error: Option<&'a (dyn std::error::Error + 'static)>,
}

impl<'a> Failure<'a> {
    /// A failure with only a kind, e.g. `"panic"` for a caught handler panic.
    pub const fn new(kind: &'a str) -> Self {
        Failure { kind, error: None }
    }

    /// A failure carrying the error value a handler returned.
    ///
    /// The kind is the error's type name without its module path.
    pub fn from_error<E: std::error::Error + 'static>(error: &'a E) -> Self {
        Failure {
            kind: short_type_name(std::any::type_name::<E>()),
            error: Some(error),
        }
    }

    /// A failure with an explicit kind and an error value.
    pub fn with_error(kind: &'a str, error: &'a (dyn std::error::Error + 'static)) -> Self {
        Failure {
            kind,
            error: Some(error),
        }
    }

    /// The grouping key for this failure.
    pub fn kind(&self) -> &'a str {
        self.kind
    }

    /// The underlying error, if one was supplied.
    pub fn error(&self) -> Option<&'a (dyn std::error::Error + 'static)> {
        self.error
    }
}

impl fmt::Debug for Failure<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("kind", &self.kind)
            .field("error", &self.error.map(|e| e.to_string()))
            .finish()
    }
}

// Generic types keep their full name; the module path of the arguments is
// what tells two instantiations apart.
fn short_type_name(full: &str) -> &str {
    if full.contains('<') {
        return full;
    }
    full.rsplit("::").next().unwrap_or(full)
}
