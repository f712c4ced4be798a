// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0
#![allow(dead_code)]

//! A minimal tokio actor runtime used as the instrumented host.
//!
//! Each actor is a task draining an unbounded mpsc mailbox. The runtime
//! declares the standard join points in a [`HookTable`] and drives them the
//! way a real host binding would: `created` when an envelope is built,
//! `copied` when one is forwarded, `sent` on enqueue, and `enter`/`exit`
//! around the handler.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use actor_probe::{
    Envelope, EnvelopeRef, Failure, HookTable, JoinPoint, JoinPointKind, Target,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What the handler does with a message.
#[derive(Debug, Clone)]
pub enum Work {
    /// Return immediately.
    Noop,
    /// Sleep, then return.
    Sleep(Duration),
    /// Return a `HandlerFailed` error.
    Fail,
}

/// The host's envelope: payload plus routing metadata.
pub struct HostEnvelope {
    message_type: &'static str,
    recipient: String,
    work: Work,
}

impl HostEnvelope {
    pub fn work(&self) -> &Work {
        &self.work
    }
}

impl Envelope for HostEnvelope {
    fn message_type(&self) -> &str {
        self.message_type
    }

    fn recipient(&self) -> Option<&str> {
        Some(&self.recipient)
    }
}

#[derive(Debug)]
pub struct HandlerFailed;

impl fmt::Display for HandlerFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("handler failed")
    }
}

impl std::error::Error for HandlerFailed {}

/// The host runtime: its join point table and resolved join points.
pub struct HostRuntime {
    table: Arc<HookTable>,
    invoke: Arc<JoinPoint>,
    create: Arc<JoinPoint>,
    copy: Arc<JoinPoint>,
    send: Arc<JoinPoint>,
}

impl HostRuntime {
    /// Declares the four standard join points.
    pub fn new() -> Arc<Self> {
        let table = Arc::new(HookTable::new());
        let invoke = table.declare(Target::ACTOR_CELL, "invoke", JoinPointKind::Invoke);
        let create = table.declare(Target::ENVELOPE, "new", JoinPointKind::EnvelopeCreate);
        let copy = table.declare(Target::ENVELOPE, "copy", JoinPointKind::EnvelopeCopy);
        let send = table.declare(Target::ACTOR_REF, "tell", JoinPointKind::EnvelopeSend);
        Arc::new(Self {
            table,
            invoke,
            create,
            copy,
            send,
        })
    }

    pub fn table(&self) -> &Arc<HookTable> {
        &self.table
    }

    /// Spawns an actor at `path`. The join handle resolves to the number of
    /// messages the actor handled once every `HostRef` to it is dropped.
    pub fn spawn(self: &Arc<Self>, path: &str) -> (HostRef, JoinHandle<usize>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor_ref = HostRef {
            path: path.to_string(),
            mailbox: tx,
            runtime: self.clone(),
        };
        let handle = tokio::spawn(self.clone().run(rx));
        (actor_ref, handle)
    }

    async fn run(self: Arc<Self>, mut mailbox: mpsc::UnboundedReceiver<Arc<HostEnvelope>>) -> usize {
        let mut handled = 0;
        while let Some(envelope) = mailbox.recv().await {
            let probe: EnvelopeRef = envelope.clone();
            let token = self.invoke.enter(&probe);
            let result = handle(envelope.work()).await;
            let failure = result.as_ref().err().map(Failure::from_error);
            self.invoke.exit(&probe, token, failure);
            handled += 1;
        }
        handled
    }
}

async fn handle(work: &Work) -> Result<(), HandlerFailed> {
    match work {
        Work::Noop => Ok(()),
        Work::Sleep(delay) => {
            tokio::time::sleep(*delay).await;
            Ok(())
        }
        Work::Fail => Err(HandlerFailed),
    }
}

/// Handle to a host actor's mailbox.
#[derive(Clone)]
pub struct HostRef {
    path: String,
    mailbox: mpsc::UnboundedSender<Arc<HostEnvelope>>,
    runtime: Arc<HostRuntime>,
}

impl HostRef {
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Builds an envelope addressed to this actor without sending it.
    pub fn envelope(&self, message_type: &'static str, work: Work) -> Arc<HostEnvelope> {
        let envelope = Arc::new(HostEnvelope {
            message_type,
            recipient: self.path.clone(),
            work,
        });
        let probe: EnvelopeRef = envelope.clone();
        self.runtime.create.created(&probe);
        envelope
    }

    /// Enqueues an existing envelope.
    pub fn send(&self, envelope: Arc<HostEnvelope>) -> bool {
        let probe: EnvelopeRef = envelope.clone();
        self.runtime.send.sent(&probe);
        self.mailbox.send(envelope).is_ok()
    }

    /// Builds and enqueues a message (fire-and-forget).
    pub fn tell(&self, message_type: &'static str, work: Work) -> bool {
        let envelope = self.envelope(message_type, work);
        self.send(envelope)
    }

    /// Copies `envelope` re-addressed to this actor and enqueues the copy.
    pub fn forward(&self, envelope: &Arc<HostEnvelope>) -> bool {
        let copy = Arc::new(HostEnvelope {
            message_type: envelope.message_type,
            recipient: self.path.clone(),
            work: envelope.work.clone(),
        });
        let original: EnvelopeRef = envelope.clone();
        let probe: EnvelopeRef = copy.clone();
        self.runtime.copy.copied(&original, &probe);
        self.send(copy)
    }
}
