// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use serde::Deserialize;

/// What a join point does in the host, and therefore which advice it takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JoinPointKind {
    /// Message invocation entry point of an actor's execution unit
    Invoke,
    /// Envelope construction
    EnvelopeCreate,
    /// Envelope copy
    EnvelopeCopy,
    /// Message send
    EnvelopeSend,
}

impl JoinPointKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JoinPointKind::Invoke => "invoke",
            JoinPointKind::EnvelopeCreate => "envelope-create",
            JoinPointKind::EnvelopeCopy => "envelope-copy",
            JoinPointKind::EnvelopeSend => "envelope-send",
        }
    }
}

impl fmt::Display for JoinPointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A host join point, matched purely by name.
///
/// ```yaml
/// type_name: actor::ActorCell
/// method: invoke
/// kind: invoke
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Target {
    pub type_name: String,
    pub method: String,
    pub kind: JoinPointKind,
}

impl Target {
    pub const ACTOR_CELL: &'static str = "actor::ActorCell";
    pub const ENVELOPE: &'static str = "dispatch::Envelope";
    pub const ACTOR_REF: &'static str = "actor::ActorRef";

    pub fn new(type_name: impl Into<String>, method: impl Into<String>, kind: JoinPointKind) -> Self {
        Self {
            type_name: type_name.into(),
            method: method.into(),
            kind,
        }
    }

    /// The four standard targets: `ActorCell::invoke`, `Envelope::new`,
    /// `Envelope::copy` and `ActorRef::tell`.
    pub fn defaults() -> Vec<Target> {
        vec![
            Target::new(Self::ACTOR_CELL, "invoke", JoinPointKind::Invoke),
            Target::new(Self::ENVELOPE, "new", JoinPointKind::EnvelopeCreate),
            Target::new(Self::ENVELOPE, "copy", JoinPointKind::EnvelopeCopy),
            Target::new(Self::ACTOR_REF, "tell", JoinPointKind::EnvelopeSend),
        ]
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{} ({})", self.type_name, self.method, self.kind)
    }
}
