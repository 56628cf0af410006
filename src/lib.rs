#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # windowguard
//!
//! Sliding-window rate limiting decisions for request handlers: given who is calling and
//! what they are calling, decide whether this invocation stays within `max` calls per
//! trailing window.
//!
//! ## Features
//!
//! - **Identity keys** built from an operation name plus selected (nested) argument values
//! - **Sliding-window counting** with array-weighted calls and strict `> max` rejection
//! - **Pluggable stores** via the async [`Store`] trait, with an in-process [`InMemoryStore`]
//!   (a Redis store lives in the `windowguard-redis` companion crate)
//! - **Batch awareness**: concurrent checks under one request context see each other's
//!   pending calls before the store round-trip completes
//! - **Tower middleware** for wrapping services
//!
//! ## Quick Start
//!
//! ```rust
//! use serde_json::json;
//! use std::sync::Arc;
//! use windowguard::{FieldConfig, Invocation, RateLimiter};
//!
//! struct Ctx { user_id: String }
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = RateLimiter::<Ctx>::builder()
//!         .identify_context(|ctx: &Ctx| ctx.user_id.clone())
//!         .enable_batch_request_cache(true)
//!         .build()
//!         .expect("identify_context is set");
//!
//!     let config = FieldConfig::parse(10, "1m").unwrap().with_identity_args(["id"]);
//!     let ctx = Arc::new(Ctx { user_id: "u-42".into() });
//!     let decision = limiter
//!         .check(&Invocation::new(ctx, "book", json!({ "id": 7 })), &config)
//!         .await
//!         .expect("in-memory store never fails");
//!     assert!(decision.is_allowed());
//! }
//! ```

pub mod batch;
pub mod clock;
pub mod error;
pub mod identity;
pub mod limiter;
pub mod middleware;
pub mod prelude;
pub mod store;
pub mod window;

// Re-exports
pub use batch::{BatchCache, NoopBatchCache, WeakBatchCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ConfigError, GuardError, RateLimitExceeded, StoreError, StoreOperation};
pub use identity::{resolve_field_identity, Identity};
pub use limiter::{
    Decision, FieldConfig, FormatErrorInput, Invocation, RateLimiter, RateLimiterBuilder,
};
pub use middleware::{RateLimitLayer, RateLimitService};
pub use store::{InMemoryStore, Store};
pub use window::Window;
