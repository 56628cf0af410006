//! Request-scoped visibility of pending calls.
//!
//! Several checks issued concurrently under one request context can all read the store before
//! any of them has written back. A batching cache records each check's timestamps against the
//! request context as soon as the check starts, so later siblings count them even though the
//! store does not yet know about them.
//!
//! Entries are keyed by the allocation of the caller's `Arc<C>` context, never by its
//! contents, and only a [`Weak`] handle is kept. Entries whose request dropped its context are
//! swept whenever the map has doubled since the last sweep.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

/// Accumulates pending timestamps per request context and field identity.
pub trait BatchCache<C>: Send + Sync {
    /// Record `new_timestamps` for `field_identity` under the request `token` and return every
    /// timestamp pending for that pair so far, including the new ones.
    ///
    /// The new timestamps are expected at the end of the returned list. An implementation that
    /// drops them makes the limiter undercount the call.
    fn contribute(&self, token: &Arc<C>, field_identity: &str, new_timestamps: &[u64]) -> Vec<u64>;

    /// Withdraw timestamps previously contributed under `token`.
    fn retract(&self, token: &Arc<C>, field_identity: &str, timestamps: &[u64]);
}

/// Cache used when batch deduplication is disabled: nothing is remembered.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBatchCache;

impl<C> BatchCache<C> for NoopBatchCache {
    fn contribute(&self, _token: &Arc<C>, _field_identity: &str, new_timestamps: &[u64]) -> Vec<u64> {
        new_timestamps.to_vec()
    }

    fn retract(&self, _token: &Arc<C>, _field_identity: &str, _timestamps: &[u64]) {}
}

/// Map size below which dead entries are never swept.
const SWEEP_FLOOR: usize = 64;

struct BatchEntry<C> {
    owner: Weak<C>,
    pending: HashMap<String, Vec<u64>>,
}

struct Batches<C> {
    entries: HashMap<usize, BatchEntry<C>>,
    sweep_at: usize,
}

/// Batching cache holding request contexts weakly.
pub struct WeakBatchCache<C> {
    batches: Mutex<Batches<C>>,
}

impl<C> Default for WeakBatchCache<C> {
    fn default() -> Self {
        Self { batches: Mutex::new(Batches { entries: HashMap::new(), sweep_at: SWEEP_FLOOR }) }
    }
}

impl<C> std::fmt::Debug for WeakBatchCache<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakBatchCache").field("tracked_batches", &self.tracked_batches()).finish()
    }
}

impl<C> WeakBatchCache<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of request contexts that are still alive and have pending entries.
    pub fn tracked_batches(&self) -> usize {
        let batches = self.batches.lock().expect("batch cache poisoned");
        batches.entries.values().filter(|entry| entry.owner.strong_count() > 0).count()
    }
}

fn token_key<C>(token: &Arc<C>) -> usize {
    Arc::as_ptr(token) as *const () as usize
}

impl<C: Send + Sync> BatchCache<C> for WeakBatchCache<C> {
    fn contribute(&self, token: &Arc<C>, field_identity: &str, new_timestamps: &[u64]) -> Vec<u64> {
        let mut batches = self.batches.lock().expect("batch cache poisoned");
        if batches.entries.len() >= batches.sweep_at {
            batches.entries.retain(|_, entry| entry.owner.strong_count() > 0);
            batches.sweep_at = (batches.entries.len() * 2).max(SWEEP_FLOOR);
        }

        // the held Weak keeps the allocation, so a key is never reused while its entry exists
        let entry = batches
            .entries
            .entry(token_key(token))
            .or_insert_with(|| BatchEntry { owner: Arc::downgrade(token), pending: HashMap::new() });
        let pending = entry.pending.entry(field_identity.to_string()).or_default();
        pending.extend_from_slice(new_timestamps);
        pending.clone()
    }

    fn retract(&self, token: &Arc<C>, field_identity: &str, timestamps: &[u64]) {
        let mut batches = self.batches.lock().expect("batch cache poisoned");
        let Some(entry) = batches.entries.get_mut(&token_key(token)) else {
            return;
        };
        if !Weak::ptr_eq(&entry.owner, &Arc::downgrade(token)) {
            return;
        }
        if let Some(pending) = entry.pending.get_mut(field_identity) {
            for ts in timestamps {
                if let Some(pos) = pending.iter().rposition(|p| p == ts) {
                    pending.remove(pos);
                }
            }
        }
    }
}
