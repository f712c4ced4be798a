// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Runtime Instrumentation Layer
//!
//! Attaches [`Advice`] to a host runtime's join points:
//!
//! - the message invocation entry point of an actor's execution unit
//! - envelope construction, copy and send
//!
//! The host supplies an [`InstrumentationHandle`] that resolves join points
//! purely by type and method name. [`HookTable`] is a ready-made handle a
//! host can embed; hosts with their own interposition mechanism implement the
//! trait directly.
//!
//! Installation is idempotent per handle and never aborts the host: a target
//! the handle cannot resolve is logged and reported, and the remaining
//! targets are still attached.

mod advice;
mod hook_table;
mod target;

pub use advice::Advice;
pub use hook_table::{HookTable, JoinPoint};
pub use target::{JoinPointKind, Target};

use std::sync::Arc;

use log::{debug, info, warn};
use papaya::HashSet;

use crate::config::ProbeConfig;
use crate::context::ProbeContext;
use crate::error::{Error, Result};

/// Platform-supplied handle permitting advice to be attached to named host
/// join points.
pub trait InstrumentationHandle: Send + Sync {
    /// Attaches `advice` to the join point `target` names, replacing any
    /// advice already there. Fails with [`Error::Installation`] when the host
    /// has no such join point.
    fn attach(&self, target: &Target, advice: Arc<Advice>) -> Result<()>;

    /// Removes the advice from the join point `target` names. Returns
    /// `false` if nothing was attached.
    fn detach(&self, target: &Target) -> bool;

    /// `true` when the join point `target` names currently holds exactly
    /// `advice`.
    fn is_attached(&self, target: &Target, advice: &Arc<Advice>) -> bool;
}

/// Outcome of one [`Instrumentation::install`] call.
#[derive(Debug, Default)]
#[non_exhaustive]
pub struct InstallReport {
    /// Targets attached by this call.
    pub attached: Vec<Target>,
    /// Targets whose join point already holds this instrumentation's advice.
    pub already_installed: Vec<Target>,
    /// Targets the handle could not resolve.
    pub failed: Vec<Error>,
}

impl InstallReport {
    /// `true` when every configured target is attached to the handle.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

#[inline]
fn handle_id<H: ?Sized>(handle: &Arc<H>) -> usize {
    Arc::as_ptr(handle) as *const () as usize
}

/// Installs advice serving one [`ProbeContext`] into host handles.
///
/// Installed targets are remembered per handle address. An address can be
/// reused once its handle is dropped, so every remembered entry is confirmed
/// against the handle itself with [`InstrumentationHandle::is_attached`]
/// before it is trusted.
pub struct Instrumentation {
    context: Arc<ProbeContext>,
    advice: Arc<Advice>,
    targets: Vec<Target>,
    enabled: bool,
    installed: HashSet<(usize, Target)>,
}

impl Instrumentation {
    pub fn new(context: Arc<ProbeContext>, config: &ProbeConfig) -> Self {
        let advice = Arc::new(Advice::new(context.clone()));
        Self {
            context,
            advice,
            targets: config.targets.clone(),
            enabled: config.enabled,
            installed: HashSet::new(),
        }
    }

    pub fn context(&self) -> &Arc<ProbeContext> {
        &self.context
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    /// Attaches advice to every configured target the handle resolves.
    ///
    /// Returns an error only if no target at all is attached to the handle
    /// after the call; partial failures are listed in the report.
    pub fn install<H>(&self, handle: &Arc<H>) -> Result<InstallReport>
    where
        H: InstrumentationHandle + ?Sized,
    {
        let mut report = InstallReport::default();
        if !self.enabled {
            info!("Probes are disabled by configuration; nothing installed.");
            return Ok(report);
        }

        let id = handle_id(handle);
        let installed = self.installed.pin();
        for target in &self.targets {
            let key = (id, target.clone());
            if !installed.insert(key.clone()) {
                if handle.is_attached(target, &self.advice) {
                    debug!("Target {} already installed, skipping.", target);
                    report.already_installed.push(target.clone());
                    continue;
                }
                debug!("Stale install entry for {}, attaching again.", target);
            }

            match handle.attach(target, self.advice.clone()) {
                Ok(()) => {
                    debug!("Installed advice at {}.", target);
                    report.attached.push(target.clone());
                }
                Err(e) => {
                    installed.remove(&key);
                    warn!("{}. Continuing without this target.", e);
                    report.failed.push(e);
                }
            }
        }

        if report.attached.is_empty() && report.already_installed.is_empty() {
            return Err(report.failed.into_iter().next().unwrap_or_else(|| {
                Error::configuration("no instrumentation targets configured")
            }));
        }

        info!(
            "Instrumentation installed: {} attached, {} already present, {} failed.",
            report.attached.len(),
            report.already_installed.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Detaches every target previously installed into `handle` that still
    /// holds this instrumentation's advice. Returns how many were detached.
    pub fn uninstall<H>(&self, handle: &Arc<H>) -> usize
    where
        H: InstrumentationHandle + ?Sized,
    {
        let id = handle_id(handle);
        let installed = self.installed.pin();
        let mut detached = 0;
        for target in &self.targets {
            if installed.remove(&(id, target.clone()))
                && handle.is_attached(target, &self.advice)
            {
                handle.detach(target);
                detached += 1;
            }
        }
        if detached > 0 {
            info!("Instrumentation uninstalled: {} targets detached.", detached);
        }
        detached
    }

    pub fn is_installed<H>(&self, handle: &Arc<H>, target: &Target) -> bool
    where
        H: InstrumentationHandle + ?Sized,
    {
        self.installed
            .pin()
            .contains(&(handle_id(handle), target.clone()))
            && handle.is_attached(target, &self.advice)
    }
}

impl std::fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instrumentation")
            .field("targets", &self.targets)
            .field("enabled", &self.enabled)
            .field("installed", &self.installed.pin().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{Envelope, EnvelopeRef, Failure};
    use crate::listener::InvocationListener;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct TestEnvelope;

    impl Envelope for TestEnvelope {
        fn message_type(&self) -> &str {
            "Ping"
        }
    }

    #[derive(Default)]
    struct ExitCounter(AtomicUsize);

    impl InvocationListener for ExitCounter {
        fn on_exit(&self, _: &EnvelopeRef, _: u64, _: u64, _: Option<Failure<'_>>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn host() -> Arc<HookTable> {
        let table = Arc::new(HookTable::new());
        table.declare_all(&Target::defaults());
        table
    }

    #[test]
    fn test_install_is_idempotent() {
        let table = host();
        let instrumentation = Instrumentation::new(ProbeContext::new(), &ProbeConfig::default());
        let counter = Arc::new(ExitCounter::default());
        instrumentation
            .context()
            .registry()
            .register_invocation(counter.clone());

        let first = instrumentation.install(&table).unwrap();
        assert_eq!(first.attached.len(), 4);
        assert!(first.is_complete());

        let second = instrumentation.install(&table).unwrap();
        assert!(second.attached.is_empty());
        assert_eq!(second.already_installed.len(), 4);

        let invoke = table.join_point(Target::ACTOR_CELL, "invoke").unwrap();
        let e: EnvelopeRef = Arc::new(TestEnvelope);
        let token = invoke.enter(&e);
        invoke.exit(&e, token, None);

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_missing_join_point_is_reported_not_fatal() {
        let table = Arc::new(HookTable::new());
        table.declare(Target::ACTOR_CELL, "invoke", JoinPointKind::Invoke);

        let instrumentation = Instrumentation::new(ProbeContext::new(), &ProbeConfig::default());
        let report = instrumentation.install(&table).unwrap();

        assert_eq!(report.attached.len(), 1);
        assert_eq!(report.failed.len(), 3);
        assert!(!report.is_complete());
        assert!(report.failed.iter().all(Error::is_installation));
    }

    #[test]
    fn test_nothing_resolvable_is_an_error() {
        let table = Arc::new(HookTable::new());
        let instrumentation = Instrumentation::new(ProbeContext::new(), &ProbeConfig::default());
        let err = instrumentation.install(&table).unwrap_err();
        assert!(err.is_installation());
    }

    #[test]
    fn test_disabled_installs_nothing() {
        let table = host();
        let config = ProbeConfig {
            enabled: false,
            ..ProbeConfig::default()
        };
        let instrumentation = Instrumentation::new(ProbeContext::new(), &config);
        let report = instrumentation.install(&table).unwrap();
        assert!(report.attached.is_empty());
        assert!(!table
            .join_point(Target::ACTOR_CELL, "invoke")
            .unwrap()
            .is_attached());
    }

    #[test]
    fn test_uninstall_then_reinstall() {
        let table = host();
        let instrumentation = Instrumentation::new(ProbeContext::new(), &ProbeConfig::default());
        instrumentation.install(&table).unwrap();

        assert_eq!(instrumentation.uninstall(&table), 4);
        assert_eq!(instrumentation.uninstall(&table), 0);
        assert!(!table
            .join_point(Target::ENVELOPE, "new")
            .unwrap()
            .is_attached());

        let report = instrumentation.install(&table).unwrap();
        assert_eq!(report.attached.len(), 4);
    }

    #[test]
    fn test_handles_are_tracked_separately() {
        let first = host();
        let second = host();
        let instrumentation = Instrumentation::new(ProbeContext::new(), &ProbeConfig::default());

        instrumentation.install(&first).unwrap();
        let target = &Target::defaults()[0];
        assert!(instrumentation.is_installed(&first, target));
        assert!(!instrumentation.is_installed(&second, target));

        let report = instrumentation.install(&second).unwrap();
        assert_eq!(report.attached.len(), 4);
    }

    #[test]
    fn test_fresh_handle_at_reused_address_is_attached() {
        let instrumentation = Instrumentation::new(ProbeContext::new(), &ProbeConfig::default());

        // The allocator often hands the dropped table's address to the next
        // one.
        for _ in 0..50 {
            let first = host();
            instrumentation.install(&first).unwrap();
            drop(first);

            let second = host();
            let report = instrumentation.install(&second).unwrap();
            assert_eq!(report.attached.len(), 4);
            assert!(report.already_installed.is_empty());
            assert!(second
                .join_point(Target::ACTOR_CELL, "invoke")
                .unwrap()
                .is_attached());
            assert!(instrumentation.is_installed(&second, &Target::defaults()[0]));
        }
    }

    #[test]
    fn test_replaced_advice_is_attached_again() {
        let table = host();
        let context = ProbeContext::new();
        let config = ProbeConfig::default();
        let first = Instrumentation::new(context.clone(), &config);
        let second = Instrumentation::new(context, &config);

        first.install(&table).unwrap();
        second.install(&table).unwrap();
        let target = &Target::defaults()[0];
        assert!(!first.is_installed(&table, target));
        assert!(second.is_installed(&table, target));

        // Only the instrumentation whose advice is in place detaches it.
        assert_eq!(first.uninstall(&table), 0);
        assert!(second.is_installed(&table, target));

        let report = first.install(&table).unwrap();
        assert_eq!(report.attached.len(), 4);
        assert!(first.is_installed(&table, target));
    }
}
