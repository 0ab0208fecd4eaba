//! Concurrent per-client rate table.

use dashmap::DashMap;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, trace};

use super::key::ClientKey;
use super::window::{CallHistory, Decision, WindowPolicy};

/// One client's history plus its removal mark.
#[derive(Debug, Default)]
struct Slot {
    history: CallHistory,
    /// Set by the sweeper under the slot lock right before the slot leaves the map
    retired: bool,
}

/// The rate table mapping client keys to their call histories.
///
/// The map's shard lock is only held long enough to find or insert a slot.
/// Recording a call happens under the slot's own mutex, so clients never
/// wait on each other while concurrent calls from one client are serialized.
pub struct RateTable {
    /// Call histories indexed by client key
    slots: DashMap<ClientKey, Arc<Mutex<Slot>>>,
    /// Window and limit applied to every key
    policy: WindowPolicy,
    /// Fraction of evaluations that also run a sweep
    sweep_sample_rate: f64,
}

impl RateTable {
    /// Create an empty table.
    pub fn new(policy: WindowPolicy) -> Self {
        Self {
            slots: DashMap::new(),
            policy,
            sweep_sample_rate: 0.0,
        }
    }

    /// Run an opportunistic sweep on roughly this fraction of evaluations.
    ///
    /// Values are clamped to `[0, 1]`.
    pub fn with_sweep_sample_rate(mut self, rate: f64) -> Self {
        self.sweep_sample_rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        self
    }

    /// Record a call for `key` at `now` and decide whether it is admitted.
    pub fn evaluate(&self, key: &ClientKey, now: Instant) -> Decision {
        let decision = loop {
            let slot = self.slot(key);
            let mut slot = slot.lock();

            // The sweeper removed this slot after we looked it up; the next
            // lookup inserts a fresh one.
            if slot.retired {
                continue;
            }

            break slot.history.record(now, &self.policy);
        };

        trace!(
            key = %key,
            count = decision.count,
            limit = decision.limit,
            admitted = decision.admitted,
            "Evaluated call"
        );

        self.maybe_sweep(now);

        decision
    }

    /// Remove every key with no calls left inside the window ending at `now`.
    ///
    /// Returns the number of keys removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let window = self.policy.window();
        let candidates: Vec<ClientKey> = self
            .slots
            .iter()
            .filter(|entry| entry.value().lock().history.count_at(now, window) == 0)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in candidates {
            // A call may have landed since the scan; re-check under the slot lock.
            let evicted = self.slots.remove_if(&key, |_, slot| {
                let mut slot = slot.lock();
                slot.history.prune(now, window);
                if slot.history.is_empty() {
                    slot.retired = true;
                    true
                } else {
                    false
                }
            });

            if evicted.is_some() {
                removed += 1;
            }
        }

        if removed > 0 {
            debug!(
                removed_entries = removed,
                remaining_entries = self.slots.len(),
                "Rate table sweep completed"
            );
        }

        removed
    }

    /// Sweep with the configured probability.
    pub fn maybe_sweep(&self, now: Instant) -> usize {
        if self.sweep_sample_rate > 0.0 && rand::thread_rng().gen_bool(self.sweep_sample_rate) {
            self.sweep(now)
        } else {
            0
        }
    }

    /// Get the number of calls inside the window for `key`, if it is tracked.
    pub fn count(&self, key: &ClientKey, now: Instant) -> Option<usize> {
        let slot = self.slots.get(key).map(|entry| Arc::clone(entry.value()))?;
        let slot = slot.lock();
        Some(slot.history.count_at(now, self.policy.window()))
    }

    /// Whether `key` currently has an entry.
    pub fn contains(&self, key: &ClientKey) -> bool {
        self.slots.contains_key(key)
    }

    /// Get the number of tracked keys.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Look up the slot for `key`, inserting an empty one on first use.
    fn slot(&self, key: &ClientKey) -> Arc<Mutex<Slot>> {
        if let Some(entry) = self.slots.get(key) {
            return Arc::clone(entry.value());
        }

        let entry = self.slots.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, "Creating new call history");
            Arc::new(Mutex::new(Slot::default()))
        });
        Arc::clone(entry.value())
    }

    #[cfg(test)]
    fn with_key_locked<T>(&self, key: &ClientKey, f: impl FnOnce() -> T) -> T {
        let slot = self.slot(key);
        let _guard = slot.lock();
        f()
    }
}
