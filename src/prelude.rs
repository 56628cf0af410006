//! Convenient re-exports for common windowguard types.
pub use crate::{
    error::{ConfigError, GuardError, RateLimitExceeded, StoreError},
    identity::Identity,
    limiter::{Decision, FieldConfig, Invocation, RateLimiter},
    middleware::RateLimitLayer,
    store::{InMemoryStore, Store},
    window::Window,
};
