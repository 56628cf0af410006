//! Redis store for `windowguard` (companion crate).
//! Bring your own connection; each identity's history is one JSON array under
//! `<prefix>::<contextIdentity>:<fieldIdentity>`, expiring one window after its newest call.
//!
//! ```no_run
//! use windowguard::RateLimiter;
//! use windowguard_redis::RedisStore;
//! # struct Ctx { ip: String }
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let client = redis::Client::open("redis://127.0.0.1:6379/")?;
//! let store = RedisStore::new(client.get_connection_manager().await?);
//! let limiter = RateLimiter::<Ctx>::builder()
//!     .identify_context(|ctx: &Ctx| ctx.ip.clone())
//!     .store(store)
//!     .build()?;
//! # Ok(()) }
//! ```

use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::AsyncCommands;
use std::sync::Arc;
use windowguard::{Clock, Identity, Store, SystemClock, Window};

/// Key prefix used unless [`RedisStore::with_prefix`] overrides it.
pub const DEFAULT_PREFIX: &str = "redis-store-id";

/// Errors raised by [`RedisStore`].
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum RedisStoreError {
    /// The Redis command failed.
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    /// The stored value is not a JSON array of integer timestamps.
    #[error("malformed timestamp history under {key}: {source}")]
    Codec {
        /// Key holding the value.
        key: String,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
}

/// [`Store`] over any cloneable async Redis connection.
#[derive(Clone)]
pub struct RedisStore<Conn = ConnectionManager> {
    conn: Conn,
    prefix: String,
    clock: Arc<dyn Clock>,
}

impl<Conn> std::fmt::Debug for RedisStore<Conn> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("prefix", &self.prefix)
            .field("conn", &"<redis connection>")
            .field("clock", &self.clock)
            .finish()
    }
}

impl<Conn> RedisStore<Conn>
where
    Conn: ConnectionLike + Clone + Send + Sync + 'static,
{
    /// Create a store using an existing connection and the default key prefix.
    pub fn new(conn: Conn) -> Self {
        Self { conn, prefix: DEFAULT_PREFIX.to_string(), clock: Arc::new(SystemClock) }
    }

    /// Namespace keys under `prefix` instead of [`DEFAULT_PREFIX`].
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Override the clock used for expiry computation.
    pub fn with_clock<K: Clock + 'static>(mut self, clock: K) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// The Redis key holding `identity`'s history.
    pub fn key_for(&self, identity: &Identity) -> String {
        namespaced_key(&self.prefix, identity)
    }
}

/// `<prefix>::<contextIdentity>:<fieldIdentity>`
pub fn namespaced_key(prefix: &str, identity: &Identity) -> String {
    format!("{}::{}:{}", prefix, identity.context_identity, identity.field_identity)
}

/// Seconds until a history written at `now_millis` should expire: one window after its
/// newest timestamp, rounded up, never less than one second.
pub fn expiry_seconds(now_millis: u64, window: Window, timestamps: &[u64]) -> u64 {
    let remaining_ms = match timestamps.iter().max() {
        Some(newest) => now_millis.saturating_add(window.as_millis()).saturating_sub(*newest),
        None => window.as_millis(),
    };
    (remaining_ms / 1_000 + u64::from(remaining_ms % 1_000 != 0)).max(1)
}

#[async_trait]
impl<Conn> Store for RedisStore<Conn>
where
    Conn: ConnectionLike + Clone + Send + Sync + 'static,
{
    type Error = RedisStoreError;

    async fn get_for_identity(&self, identity: &Identity) -> Result<Vec<u64>, Self::Error> {
        let key = self.key_for(identity);
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(key.as_str()).await?;
        match raw {
            Some(json) => {
                serde_json::from_str(&json).map_err(|source| RedisStoreError::Codec { key, source })
            }
            None => Ok(Vec::new()),
        }
    }

    async fn set_for_identity(
        &self,
        identity: &Identity,
        timestamps: &[u64],
        window: Option<Window>,
    ) -> Result<(), Self::Error> {
        let key = self.key_for(identity);
        let payload = serde_json::to_string(timestamps)
            .map_err(|source| RedisStoreError::Codec { key: key.clone(), source })?;
        let mut conn = self.conn.clone();
        match window {
            Some(window) => {
                let ttl = expiry_seconds(self.clock.now_millis(), window, timestamps);
                tracing::trace!(target: "windowguard::redis", key = %key, ttl, "writing history");
                let _: () = conn.set_ex(key.as_str(), payload, ttl).await?;
            }
            None => {
                let _: () = conn.set(key.as_str(), payload).await?;
            }
        }
        Ok(())
    }
}
