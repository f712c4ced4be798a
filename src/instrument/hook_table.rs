// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use papaya::HashMap;

use super::{Advice, InstrumentationHandle, JoinPointKind, Target};
use crate::envelope::{EnvelopeRef, Failure};
use crate::error::{Error, Result};
use crate::failure;

/// One named extension point inside a host runtime.
///
/// The host keeps an `Arc<JoinPoint>` for each place it wants observed and
/// calls the method matching the join point's kind. With no advice attached
/// every call is a single atomic load.
///
/// ```rust,ignore
/// // host message loop
/// let token = invoke_point.enter(&envelope);
/// let result = actor.handle(payload).await;
/// invoke_point.exit(&envelope, token, result.as_ref().err().map(Failure::from_error));
/// ```
pub struct JoinPoint {
    type_name: String,
    method: String,
    kind: JoinPointKind,
    advice: ArcSwapOption<Advice>,
}

impl JoinPoint {
    fn new(type_name: String, method: String, kind: JoinPointKind) -> Self {
        Self {
            type_name,
            method,
            kind,
            advice: ArcSwapOption::empty(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn kind(&self) -> JoinPointKind {
        self.kind
    }

    pub fn is_attached(&self) -> bool {
        self.advice.load().is_some()
    }

    /// A call that does not match the declared kind is ignored and logged.
    #[inline]
    fn accepts(&self, called: JoinPointKind) -> bool {
        if self.kind == called {
            return true;
        }
        failure::misrouted_call(
            &self.type_name,
            &self.method,
            self.kind.as_str(),
            called.as_str(),
        );
        false
    }

    /// Processing of `envelope` starts. Returns the token to pass to
    /// [`exit`](JoinPoint::exit), `None` when nothing is attached.
    #[inline]
    pub fn enter(&self, envelope: &EnvelopeRef) -> Option<u64> {
        if !self.accepts(JoinPointKind::Invoke) {
            return None;
        }
        (*self.advice.load())
            .as_ref()
            .map(|advice| advice.enter(envelope))
    }

    /// Processing of `envelope` ended. A `None` token (advice attached after
    /// the matching enter) records nothing.
    #[inline]
    pub fn exit(&self, envelope: &EnvelopeRef, token: Option<u64>, failure: Option<Failure<'_>>) {
        let Some(start_nanos) = token else {
            return;
        };
        if !self.accepts(JoinPointKind::Invoke) {
            return;
        }
        if let Some(advice) = &*self.advice.load() {
            advice.exit(envelope, start_nanos, failure);
        }
    }

    #[inline]
    pub fn created(&self, envelope: &EnvelopeRef) {
        if !self.accepts(JoinPointKind::EnvelopeCreate) {
            return;
        }
        if let Some(advice) = &*self.advice.load() {
            advice.created(envelope);
        }
    }

    #[inline]
    pub fn copied(&self, original: &EnvelopeRef, copy: &EnvelopeRef) {
        if !self.accepts(JoinPointKind::EnvelopeCopy) {
            return;
        }
        if let Some(advice) = &*self.advice.load() {
            advice.copied(original, copy);
        }
    }

    #[inline]
    pub fn sent(&self, envelope: &EnvelopeRef) {
        if !self.accepts(JoinPointKind::EnvelopeSend) {
            return;
        }
        if let Some(advice) = &*self.advice.load() {
            advice.sent(envelope);
        }
    }

    fn attach(&self, advice: Arc<Advice>) {
        self.advice.store(Some(advice));
    }

    fn holds(&self, advice: &Arc<Advice>) -> bool {
        (*self.advice.load())
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, advice))
    }

    fn detach(&self) -> bool {
        self.advice.swap(None).is_some()
    }
}

impl std::fmt::Debug for JoinPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JoinPoint")
            .field("type_name", &self.type_name)
            .field("method", &self.method)
            .field("kind", &self.kind)
            .field("attached", &self.is_attached())
            .finish()
    }
}

/// Table of join points a host runtime embeds as its instrumentation handle.
///
/// The host declares its join points by type and method name at startup;
/// [`Instrumentation::install`](crate::Instrumentation::install) then
/// resolves configured targets against the table by name. Each join point
/// holds at most one advice, so attaching again replaces instead of
/// stacking.
pub struct HookTable {
    join_points: HashMap<(String, String), Arc<JoinPoint>>,
}

impl HookTable {
    pub fn new() -> Self {
        Self {
            join_points: HashMap::new(),
        }
    }

    /// Declares a join point, or returns the existing one with that name.
    pub fn declare(&self, type_name: &str, method: &str, kind: JoinPointKind) -> Arc<JoinPoint> {
        let key = (type_name.to_owned(), method.to_owned());
        self.join_points
            .pin()
            .get_or_insert_with(key, || {
                Arc::new(JoinPoint::new(type_name.to_owned(), method.to_owned(), kind))
            })
            .clone()
    }

    /// Declares one join point per target.
    pub fn declare_all(&self, targets: &[Target]) -> Vec<Arc<JoinPoint>> {
        targets
            .iter()
            .map(|t| self.declare(&t.type_name, &t.method, t.kind))
            .collect()
    }

    pub fn join_point(&self, type_name: &str, method: &str) -> Option<Arc<JoinPoint>> {
        self.join_points
            .pin()
            .get(&(type_name.to_owned(), method.to_owned()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.join_points.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl InstrumentationHandle for HookTable {
    fn attach(&self, target: &Target, advice: Arc<Advice>) -> Result<()> {
        let join_point = self
            .join_point(&target.type_name, &target.method)
            .ok_or_else(|| Error::Installation {
                type_name: target.type_name.clone(),
                method: target.method.clone(),
                details: "join point not declared by host".to_string(),
            })?;

        if join_point.kind() != target.kind {
            return Err(Error::Installation {
                type_name: target.type_name.clone(),
                method: target.method.clone(),
                details: format!(
                    "join point is declared as {} but target expects {}",
                    join_point.kind(),
                    target.kind
                ),
            });
        }

        join_point.attach(advice);
        Ok(())
    }

    fn detach(&self, target: &Target) -> bool {
        self.join_point(&target.type_name, &target.method)
            .map(|join_point| join_point.detach())
            .unwrap_or(false)
    }

    fn is_attached(&self, target: &Target, advice: &Arc<Advice>) -> bool {
        self.join_point(&target.type_name, &target.method)
            .is_some_and(|join_point| join_point.holds(advice))
    }
}

impl Default for HookTable {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HookTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookTable")
            .field("join_points", &self.len())
            .finish()
    }
}
