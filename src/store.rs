//! Persistence for per-identity call timestamps.
//!
//! A [`Store`] only has to replace and return whole timestamp sequences; pruning of entries
//! that fell out of the window is done by the limiter before every write. Backends that can
//! expire records should use the window passed to [`Store::set_for_identity`] so idle
//! identities are reclaimed without a sweep.
//!
//! The limiter's read-filter-merge-write sequence is not atomic against other processes
//! writing the same identity; under heavy cross-process contention a few extra calls can be
//! admitted.

use crate::identity::Identity;
use crate::window::Window;
use async_trait::async_trait;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};

/// Abstract storage interface for timestamp history.
#[async_trait]
pub trait Store: Send + Sync {
    /// Error type for storage operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fetch the full known history (Unix millis) for `identity`, or an empty sequence.
    async fn get_for_identity(&self, identity: &Identity) -> Result<Vec<u64>, Self::Error>;

    /// Replace the history for `identity`.
    ///
    /// When `window` is given the record should expire `window` after its newest timestamp.
    async fn set_for_identity(
        &self,
        identity: &Identity,
        timestamps: &[u64],
        window: Option<Window>,
    ) -> Result<(), Self::Error>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    type Error = S::Error;

    async fn get_for_identity(&self, identity: &Identity) -> Result<Vec<u64>, Self::Error> {
        (**self).get_for_identity(identity).await
    }

    async fn set_for_identity(
        &self,
        identity: &Identity,
        timestamps: &[u64],
        window: Option<Window>,
    ) -> Result<(), Self::Error> {
        (**self).set_for_identity(identity, timestamps, window).await
    }
}

// context identity -> field identity -> timestamps
type Histories = HashMap<String, HashMap<String, Vec<u64>>>;

/// Simple in-process store.
///
/// Clones share the same state. Nothing is ever evicted: identities that stop calling keep
/// their last (stale) history until the store is dropped.
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    data: Arc<Mutex<Histories>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct context identities ever written.
    pub fn context_count(&self) -> usize {
        self.data.lock().expect("in-memory store poisoned").len()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    type Error = Infallible;

    async fn get_for_identity(&self, identity: &Identity) -> Result<Vec<u64>, Self::Error> {
        let guard = self.data.lock().expect("in-memory store poisoned");
        Ok(guard
            .get(&identity.context_identity)
            .and_then(|fields| fields.get(&identity.field_identity))
            .cloned()
            .unwrap_or_default())
    }

    async fn set_for_identity(
        &self,
        identity: &Identity,
        timestamps: &[u64],
        _window: Option<Window>,
    ) -> Result<(), Self::Error> {
        let mut guard = self.data.lock().expect("in-memory store poisoned");
        guard
            .entry(identity.context_identity.clone())
            .or_default()
            .insert(identity.field_identity.clone(), timestamps.to_vec());
        Ok(())
    }
}
