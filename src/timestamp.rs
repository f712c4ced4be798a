// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Timestamp Correlation Store
//!
//! Remembers when each host envelope was created so the time it spent in a
//! mailbox can be computed when processing starts, even though envelopes are
//! copied and discarded entirely by the host.
//!
//! # Weak association
//!
//! A record holds a `Weak` to its envelope and never keeps the envelope
//! alive. Because the `Weak` also keeps the envelope's allocation reserved,
//! the address used as the record key cannot be handed to a different
//! envelope while the record exists. Records of dropped envelopes are purged
//! by sweeps that run inline on the inserting thread, or explicitly with
//! [`TimestampStore::sweep`].
//!
//! # Sweep budget
//!
//! A sweep walks every record. The next automatic sweep is due after
//! `max(sweep_interval, records left by this sweep)` further insertions, so a
//! sweep never examines more than twice the insertions since the previous
//! one and the cost per insertion stays O(1) amortized however many
//! envelopes are live.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use log::debug;
use papaya::HashMap;

use crate::clock::now_nanos;
use crate::config::TimestampConfig;
use crate::envelope::{Envelope, EnvelopeId, EnvelopeRef};
use crate::listener::EnvelopeListener;

struct TimestampRecord {
    envelope: Weak<dyn Envelope>,
    created_nanos: u64,
}

impl TimestampRecord {
    fn new(envelope: &EnvelopeRef, created_nanos: u64) -> Self {
        Self {
            envelope: Arc::downgrade(envelope),
            created_nanos,
        }
    }

    #[inline]
    fn is_alive(&self) -> bool {
        self.envelope.strong_count() > 0
    }
}

/// Work done by the sweeps of one [`TimestampStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Sweeps run, automatic and explicit.
    pub sweeps: u64,
    /// Records examined by all sweeps.
    pub examined: u64,
    /// Records examined by the most recent sweep.
    pub last_examined: u64,
    /// Records removed by all sweeps.
    pub removed: u64,
}

/// Envelope identity to creation time, in monotonic nanoseconds
/// (see [`clock::now_nanos`](crate::clock::now_nanos)).
///
/// Every operation is non-blocking and infallible.
pub struct TimestampStore {
    records: HashMap<EnvelopeId, TimestampRecord>,
    inserts: AtomicU64,
    /// insert count at which the next automatic sweep runs, `u64::MAX`
    /// while one is running
    next_sweep: AtomicU64,
    sweep_interval: u64,
    sweeps: AtomicU64,
    examined: AtomicU64,
    last_examined: AtomicU64,
    removed: AtomicU64,
}

impl TimestampStore {
    pub fn new() -> Self {
        Self::with_config(&TimestampConfig::default())
    }

    pub fn with_config(config: &TimestampConfig) -> Self {
        let sweep_interval = config.sweep_interval.max(1);
        Self {
            records: HashMap::new(),
            inserts: AtomicU64::new(0),
            next_sweep: AtomicU64::new(sweep_interval),
            sweep_interval,
            sweeps: AtomicU64::new(0),
            examined: AtomicU64::new(0),
            last_examined: AtomicU64::new(0),
            removed: AtomicU64::new(0),
        }
    }

    /// Stamps a freshly constructed envelope with the current time.
    pub fn on_envelope_created(&self, envelope: &EnvelopeRef) {
        self.insert(envelope, now_nanos());
    }

    /// Gives `copy` the timestamp of `original`, so copying does not reset the
    /// mailbox clock. An untracked original stamps the copy with now.
    pub fn on_envelope_copied(&self, original: &EnvelopeRef, copy: &EnvelopeRef) {
        let created_nanos = self.lookup(original).unwrap_or_else(now_nanos);
        self.insert(copy, created_nanos);
    }

    /// Stamps an envelope that is being sent without ever having been seen,
    /// e.g. one constructed before the probes were installed.
    pub fn on_envelope_sent(&self, envelope: &EnvelopeRef) {
        if self.lookup(envelope).is_some() {
            return;
        }
        let records = self.records.pin();
        let _ = records.try_insert(EnvelopeId::of(envelope), TimestampRecord::new(envelope, now_nanos()));
        drop(records);
        self.after_insert();
    }

    /// Creation time of `envelope`, or now when it was never stamped.
    #[inline]
    pub fn get_timestamp(&self, envelope: &EnvelopeRef) -> u64 {
        self.lookup(envelope).unwrap_or_else(now_nanos)
    }

    /// Stored creation time of `envelope`, if any.
    #[inline]
    pub fn lookup(&self, envelope: &EnvelopeRef) -> Option<u64> {
        // A record under this id can only belong to `envelope`: the record's
        // Weak keeps the address from being reused.
        self.records
            .pin()
            .get(&EnvelopeId::of(envelope))
            .map(|record| record.created_nanos)
    }

    /// Number of records, including dead ones not swept yet.
    pub fn len(&self) -> usize {
        self.records.pin().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes records whose envelope has been dropped. Returns how many
    /// were removed.
    pub fn sweep(&self) -> usize {
        let records = self.records.pin();
        let mut examined = 0u64;
        let mut removed = 0usize;
        records.retain(|_, record| {
            examined += 1;
            let alive = record.is_alive();
            if !alive {
                removed += 1;
            }
            alive
        });

        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.examined.fetch_add(examined, Ordering::Relaxed);
        self.last_examined.store(examined, Ordering::Relaxed);
        self.removed.fetch_add(removed as u64, Ordering::Relaxed);
        if removed > 0 {
            debug!(
                "Swept {} of {} timestamp records of dropped envelopes.",
                removed, examined
            );
        }
        removed
    }

    pub fn sweep_stats(&self) -> SweepStats {
        SweepStats {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            examined: self.examined.load(Ordering::Relaxed),
            last_examined: self.last_examined.load(Ordering::Relaxed),
            removed: self.removed.load(Ordering::Relaxed),
        }
    }

    /// Clears every association.
    pub fn reset(&self) {
        self.records.pin().clear();
        self.inserts.store(0, Ordering::Relaxed);
        self.next_sweep.store(self.sweep_interval, Ordering::Relaxed);
    }

    fn insert(&self, envelope: &EnvelopeRef, created_nanos: u64) {
        self.records
            .pin()
            .insert(EnvelopeId::of(envelope), TimestampRecord::new(envelope, created_nanos));
        self.after_insert();
    }

    #[inline]
    fn after_insert(&self) {
        let inserted = self.inserts.fetch_add(1, Ordering::Relaxed) + 1;
        let due = self.next_sweep.load(Ordering::Relaxed);
        if inserted < due {
            return;
        }
        // One thread claims the sweep; the others keep going.
        if self
            .next_sweep
            .compare_exchange(due, u64::MAX, Ordering::Relaxed, Ordering::Relaxed)
            .is_err()
        {
            return;
        }
        self.sweep();
        let remaining = self.len() as u64;
        self.next_sweep.store(
            inserted.saturating_add(self.sweep_interval.max(remaining)),
            Ordering::Relaxed,
        );
    }
}

impl Default for TimestampStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TimestampStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimestampStore")
            .field("records", &self.len())
            .field("sweep_interval", &self.sweep_interval)
            .field("sweep_stats", &self.sweep_stats())
            .finish()
    }
}

impl EnvelopeListener for TimestampStore {
    fn on_created(&self, envelope: &EnvelopeRef) {
        self.on_envelope_created(envelope);
    }

    fn on_copied(&self, original: &EnvelopeRef, copy: &EnvelopeRef) {
        self.on_envelope_copied(original, copy);
    }

    fn on_sent(&self, envelope: &EnvelopeRef) {
        self.on_envelope_sent(envelope);
    }
}
