//! Sliding-window rate limit decisions.
//!
//! Semantics:
//! - Every check contributes `call_count` copies of the current timestamp: 1, or the length of
//!   the array found at the config's `array_length_field`.
//! - Stored timestamps older than the window are dropped; the rest are merged with the
//!   batch-pending ones and written back with the window as expiry hint.
//! - A call is rejected when the merged count is strictly greater than `max`. An
//!   array-weighted call that would cross `max` is rejected as a whole.
//! - The write happens whatever the outcome, unless `uncount_rejected` is set and the call was
//!   rejected; then the call's own timestamps are left out.
//!
//! Invariants:
//! - Store failures surface as [`StoreError`], or, when an observer is configured, are handed
//!   to it exactly once and the call is allowed.
//! - Inside a tokio runtime store writes run on a spawned task, so dropping a check after its
//!   write was issued does not lose the budget it consumed. Other executors await the write
//!   in place.
//!
//! Example
//! ```rust
//! use serde_json::json;
//! use std::sync::Arc;
//! use windowguard::{FieldConfig, Invocation, RateLimiter, Window};
//!
//! struct Request { ip: String }
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let limiter = RateLimiter::<Request>::builder()
//!     .identify_context(|req: &Request| req.ip.clone())
//!     .build()
//!     .unwrap();
//! let config = FieldConfig::new(1, Window::parse("10s").unwrap());
//! let request = Arc::new(Request { ip: "10.0.0.1".into() });
//! let call = Invocation::new(request, "signup", json!({}));
//!
//! assert!(limiter.check(&call, &config).await.unwrap().is_allowed());
//! let second = limiter.check(&call, &config).await.unwrap();
//! assert_eq!(second.error_message(), Some("You are trying to access 'signup' too often"));
//! # });
//! ```

use crate::batch::{BatchCache, NoopBatchCache, WeakBatchCache};
use crate::clock::{Clock, SystemClock};
use crate::error::{ConfigError, RateLimitExceeded, StoreError, StoreOperation};
use crate::identity::{lookup, resolve_field_identity, Identity};
use crate::store::{InMemoryStore, Store};
use crate::window::Window;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Budget used when a config does not set `max`.
pub const DEFAULT_MAX: u32 = 5;

type IdentifyContextFn<C> = Arc<dyn Fn(&C) -> String + Send + Sync>;
type FormatErrorFn = Arc<dyn Fn(&FormatErrorInput<'_>) -> String + Send + Sync>;
type StoreErrorObserver = Arc<dyn Fn(&StoreError) + Send + Sync>;

/// Per-operation limit configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, deny_unknown_fields))]
pub struct FieldConfig {
    max: u32,
    window: Window,
    #[cfg_attr(feature = "serde", serde(alias = "identityArgs"))]
    identity_args: Vec<String>,
    #[cfg_attr(feature = "serde", serde(alias = "arrayLengthField"))]
    array_length_field: Option<String>,
    message: Option<String>,
    #[cfg_attr(feature = "serde", serde(alias = "uncountRejected"))]
    uncount_rejected: bool,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            max: DEFAULT_MAX,
            window: Window::default(),
            identity_args: Vec::new(),
            array_length_field: None,
            message: None,
            uncount_rejected: false,
        }
    }
}

impl FieldConfig {
    /// Allow at most `max` calls per `window`.
    pub fn new(max: u32, window: Window) -> Self {
        Self { max, window, ..Self::default() }
    }

    /// Like [`FieldConfig::new`] with the window given as a string (`"10s"`, `"500"`).
    pub fn parse(max: u32, window: &str) -> Result<Self, ConfigError> {
        Ok(Self::new(max, Window::parse(window)?))
    }

    /// Argument paths whose values partition the budget.
    pub fn with_identity_args<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.identity_args = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Argument path of an array whose length is the number of calls this invocation costs.
    pub fn with_array_length_field(mut self, path: impl Into<String>) -> Self {
        self.array_length_field = Some(path.into());
        self
    }

    /// Fixed rejection message, overriding any formatter.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Do not record a call that is itself rejected.
    pub fn with_uncount_rejected(mut self, uncount: bool) -> Self {
        self.uncount_rejected = uncount;
        self
    }

    pub fn max(&self) -> u32 {
        self.max
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn identity_args(&self) -> &[String] {
        &self.identity_args
    }

    pub fn array_length_field(&self) -> Option<&str> {
        self.array_length_field.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn uncount_rejected(&self) -> bool {
        self.uncount_rejected
    }

    /// Units of budget one invocation with `args` consumes (always >= 1).
    pub fn call_count(&self, args: &Value) -> usize {
        self.array_length_field
            .as_deref()
            .and_then(|path| lookup(args, path))
            .and_then(Value::as_array)
            .map(Vec::len)
            .filter(|len| *len > 0)
            .unwrap_or(1)
    }
}

/// Input handed to a custom rejection message formatter.
#[derive(Debug, Clone, Copy)]
pub struct FormatErrorInput<'a> {
    pub field_name: &'a str,
    pub context_identity: &'a str,
    pub field_identity: &'a str,
    pub max: u32,
    pub window: Window,
}

/// Rejection message used when neither a config message nor a formatter is set.
pub fn default_error_message(field_name: &str) -> String {
    format!("You are trying to access '{}' too often", field_name)
}

/// One invocation of a rate limited operation.
///
/// `context` doubles as the batch token: checks sharing the same `Arc` allocation belong to
/// the same request. With the batch cache enabled the `Arc` must be request-scoped. Reusing
/// one `Arc` across requests (a per-connection context, say) keeps earlier calls pending in
/// the batch, so they are counted again on top of the stored history.
#[derive(Debug)]
pub struct Invocation<C> {
    context: Arc<C>,
    field_name: String,
    args: Value,
}

impl<C> Clone for Invocation<C> {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            field_name: self.field_name.clone(),
            args: self.args.clone(),
        }
    }
}

impl<C> Invocation<C> {
    pub fn new(context: Arc<C>, field_name: impl Into<String>, args: Value) -> Self {
        Self { context, field_name: field_name.into(), args }
    }

    pub fn context(&self) -> &Arc<C> {
        &self.context
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn args(&self) -> &Value {
        &self.args
    }

    /// Same request context, different operation and arguments.
    pub fn sibling(&self, field_name: impl Into<String>, args: Value) -> Self {
        Self::new(Arc::clone(&self.context), field_name, args)
    }
}

/// Outcome of a check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The call is within budget.
    Allowed,
    /// The call is over budget.
    Rejected(RateLimitExceeded),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed)
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Decision::Rejected(_))
    }

    /// Rejection message, absent when allowed.
    pub fn error_message(&self) -> Option<&str> {
        match self {
            Decision::Allowed => None,
            Decision::Rejected(e) => Some(e.message()),
        }
    }

    pub fn into_result(self) -> Result<(), RateLimitExceeded> {
        match self {
            Decision::Allowed => Ok(()),
            Decision::Rejected(e) => Err(e),
        }
    }
}

/// Sliding-window rate limiter over a [`Store`].
///
/// Clones share the store, the batch cache and all callbacks.
pub struct RateLimiter<C, S = InMemoryStore> {
    store: Arc<S>,
    identify_context: IdentifyContextFn<C>,
    format_error: Option<FormatErrorFn>,
    batch_cache: Arc<dyn BatchCache<C>>,
    on_store_error: Option<StoreErrorObserver>,
    clock: Arc<dyn Clock>,
}

impl<C, S> Clone for RateLimiter<C, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            identify_context: Arc::clone(&self.identify_context),
            format_error: self.format_error.clone(),
            batch_cache: Arc::clone(&self.batch_cache),
            on_store_error: self.on_store_error.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C, S> std::fmt::Debug for RateLimiter<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("store", &std::any::type_name::<S>())
            .field("identify_context", &"<fn>")
            .field("format_error", &self.format_error.as_ref().map(|_| "<fn>"))
            .field("on_store_error", &self.on_store_error.as_ref().map(|_| "<fn>"))
            .field("clock", &self.clock)
            .finish()
    }
}

impl<C> RateLimiter<C, InMemoryStore>
where
    C: Send + Sync + 'static,
{
    /// Start building a limiter; defaults to an [`InMemoryStore`] and no batch cache.
    pub fn builder() -> RateLimiterBuilder<C, InMemoryStore> {
        RateLimiterBuilder::new()
    }
}

impl<C, S> RateLimiter<C, S>
where
    C: Send + Sync + 'static,
    S: Store + 'static,
{
    /// Shared handle to the backing store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Resolve the identity of `invocation` and decide whether it is over `config`'s limit.
    pub async fn check(
        &self,
        invocation: &Invocation<C>,
        config: &FieldConfig,
    ) -> Result<Decision, StoreError> {
        let context_identity = (self.identify_context)(&invocation.context);
        let field_identity =
            resolve_field_identity(&invocation.field_name, config.identity_args(), &invocation.args);
        let call_count = config.call_count(&invocation.args);
        let identity = Identity { context_identity, field_identity };
        self.check_identity(&invocation.context, &invocation.field_name, &identity, call_count, config)
            .await
    }

    /// Decide for an already resolved identity.
    ///
    /// `batch` is the request context used to share pending calls with sibling checks.
    pub async fn check_identity(
        &self,
        batch: &Arc<C>,
        field_name: &str,
        identity: &Identity,
        call_count: usize,
        config: &FieldConfig,
    ) -> Result<Decision, StoreError> {
        match self.evaluate(batch, field_name, identity, call_count, config).await {
            Ok(decision) => Ok(decision),
            Err(err) => match &self.on_store_error {
                Some(observer) => {
                    warn!(
                        target: "windowguard::limiter",
                        operation = %err.operation(),
                        context_identity = %identity.context_identity,
                        field_identity = %identity.field_identity,
                        error = %err,
                        "rate limit store failed; allowing call"
                    );
                    observer(&err);
                    Ok(Decision::Allowed)
                }
                None => Err(err),
            },
        }
    }

    async fn evaluate(
        &self,
        batch: &Arc<C>,
        field_name: &str,
        identity: &Identity,
        call_count: usize,
        config: &FieldConfig,
    ) -> Result<Decision, StoreError> {
        let window = config.window();
        let now = self.clock.now_millis();
        let own = vec![now; call_count.max(1)];
        let pending = self.batch_cache.contribute(batch, &identity.field_identity, &own);
        let pending_len = pending.len();

        let history = self
            .store
            .get_for_identity(identity)
            .await
            .map_err(|e| StoreError::new(StoreOperation::Get, e))?;

        let mut merged = pending;
        merged.extend(
            history.into_iter().filter(|ts| ts.saturating_add(window.as_millis()) > now),
        );
        let count = merged.len();
        let rejected = count > config.max() as usize;

        if rejected && config.uncount_rejected() {
            // own timestamps are the tail of the pending prefix
            merged.drain(pending_len.saturating_sub(own.len())..pending_len);
            self.batch_cache.retract(batch, &identity.field_identity, &own);
        }
        self.persist(identity.clone(), merged, window).await?;

        debug!(
            target: "windowguard::limiter",
            context_identity = %identity.context_identity,
            field_identity = %identity.field_identity,
            count,
            max = config.max(),
            window_ms = window.as_millis(),
            rejected,
            "rate limit checked"
        );

        if !rejected {
            return Ok(Decision::Allowed);
        }
        let message = match (config.message(), &self.format_error) {
            (Some(message), _) => message.to_string(),
            (None, Some(format)) => format(&FormatErrorInput {
                field_name,
                context_identity: &identity.context_identity,
                field_identity: &identity.field_identity,
                max: config.max(),
                window,
            }),
            (None, None) => default_error_message(field_name),
        };
        Ok(Decision::Rejected(RateLimitExceeded::new(message)))
    }

    async fn persist(
        &self,
        identity: Identity,
        timestamps: Vec<u64>,
        window: Window,
    ) -> Result<(), StoreError> {
        let store = Arc::clone(&self.store);
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // no tokio runtime to detach onto; the write is tied to this future
            return store
                .set_for_identity(&identity, &timestamps, Some(window))
                .await
                .map_err(|e| StoreError::new(StoreOperation::Set, e));
        };
        let write = runtime.spawn(async move {
            store.set_for_identity(&identity, &timestamps, Some(window)).await
        });
        match write.await {
            Ok(result) => result.map_err(|e| StoreError::new(StoreOperation::Set, e)),
            Err(join_err) => Err(StoreError::new(StoreOperation::Set, join_err)),
        }
    }
}

/// Builder for [`RateLimiter`].
pub struct RateLimiterBuilder<C, S = InMemoryStore> {
    store: S,
    identify_context: Option<IdentifyContextFn<C>>,
    format_error: Option<FormatErrorFn>,
    enable_batch_request_cache: bool,
    batch_cache: Option<Arc<dyn BatchCache<C>>>,
    on_store_error: Option<StoreErrorObserver>,
    clock: Arc<dyn Clock>,
}

impl<C> RateLimiterBuilder<C, InMemoryStore> {
    pub fn new() -> Self {
        Self {
            store: InMemoryStore::new(),
            identify_context: None,
            format_error: None,
            enable_batch_request_cache: false,
            batch_cache: None,
            on_store_error: None,
            clock: Arc::new(SystemClock),
        }
    }
}

impl<C> Default for RateLimiterBuilder<C, InMemoryStore> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C, S> std::fmt::Debug for RateLimiterBuilder<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterBuilder")
            .field("store", &std::any::type_name::<S>())
            .field("identify_context", &self.identify_context.as_ref().map(|_| "<fn>"))
            .field("enable_batch_request_cache", &self.enable_batch_request_cache)
            .field("batch_cache", &self.batch_cache.as_ref().map(|_| "<custom>"))
            .finish()
    }
}

impl<C, S> RateLimiterBuilder<C, S>
where
    C: Send + Sync + 'static,
{
    /// Use `store` for timestamp history.
    pub fn store<S2: Store + 'static>(self, store: S2) -> RateLimiterBuilder<C, S2> {
        RateLimiterBuilder {
            store,
            identify_context: self.identify_context,
            format_error: self.format_error,
            enable_batch_request_cache: self.enable_batch_request_cache,
            batch_cache: self.batch_cache,
            on_store_error: self.on_store_error,
            clock: self.clock,
        }
    }

    /// Derive the caller identity (IP, account id, ...) from the request context. Required.
    pub fn identify_context<F>(mut self, identify: F) -> Self
    where
        F: Fn(&C) -> String + Send + Sync + 'static,
    {
        self.identify_context = Some(Arc::new(identify));
        self
    }

    /// Build rejection messages for configs without a fixed message.
    pub fn format_error<F>(mut self, format: F) -> Self
    where
        F: Fn(&FormatErrorInput<'_>) -> String + Send + Sync + 'static,
    {
        self.format_error = Some(Arc::new(format));
        self
    }

    /// Make concurrent checks under one request context see each other's pending calls.
    pub fn enable_batch_request_cache(mut self, enable: bool) -> Self {
        self.enable_batch_request_cache = enable;
        self
    }

    /// Use a custom batch cache; takes precedence over `enable_batch_request_cache`.
    pub fn batch_cache<B: BatchCache<C> + 'static>(mut self, cache: B) -> Self {
        self.batch_cache = Some(Arc::new(cache));
        self
    }

    /// Observe store failures instead of failing the check; observed failures allow the call.
    pub fn on_store_error<F>(mut self, observer: F) -> Self
    where
        F: Fn(&StoreError) + Send + Sync + 'static,
    {
        self.on_store_error = Some(Arc::new(observer));
        self
    }

    /// Override the clock (useful for deterministic tests).
    pub fn clock<K: Clock + 'static>(mut self, clock: K) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Validate and build. Fails when no `identify_context` was supplied.
    pub fn build(self) -> Result<RateLimiter<C, S>, ConfigError> {
        let identify_context = self.identify_context.ok_or(ConfigError::MissingIdentifyContext)?;
        let batch_cache: Arc<dyn BatchCache<C>> = match self.batch_cache {
            Some(cache) => cache,
            None if self.enable_batch_request_cache => Arc::new(WeakBatchCache::<C>::new()),
            None => Arc::new(NoopBatchCache),
        };
        Ok(RateLimiter {
            store: Arc::new(self.store),
            identify_context,
            format_error: self.format_error,
            batch_cache,
            on_store_error: self.on_store_error,
            clock: self.clock,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;

    #[derive(Debug)]
    struct Ctx {
        id: &'static str,
    }

    fn limiter(clock: &ManualClock) -> RateLimiter<Ctx> {
        RateLimiter::<Ctx>::builder()
            .identify_context(|ctx: &Ctx| ctx.id.to_string())
            .clock(clock.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn build_requires_identify_context() {
        let err = RateLimiter::<Ctx>::builder().build().unwrap_err();
        assert_eq!(err, ConfigError::MissingIdentifyContext);
    }

    #[test]
    fn field_config_defaults() {
        let config = FieldConfig::default();
        assert_eq!(config.max(), DEFAULT_MAX);
        assert_eq!(config.window().as_millis(), 60_000);
        assert!(config.identity_args().is_empty());
        assert!(config.array_length_field().is_none());
        assert!(!config.uncount_rejected());
        assert!(FieldConfig::parse(1, "nope").is_err());
    }

    #[test]
    fn call_count_from_array_field() {
        let config = FieldConfig::default().with_array_length_field("items");
        assert_eq!(config.call_count(&json!({"items": [1, 2, 3]})), 3);
        assert_eq!(config.call_count(&json!({"items": []})), 1);
        assert_eq!(config.call_count(&json!({"items": "abc"})), 1);
        assert_eq!(config.call_count(&json!({})), 1);
        let nested = FieldConfig::default().with_array_length_field("input.ids");
        assert_eq!(nested.call_count(&json!({"input": {"ids": [1, 2]}})), 2);
        assert_eq!(FieldConfig::default().call_count(&json!({"items": [1, 2]})), 1);
    }

    #[test]
    fn decision_accessors() {
        assert!(Decision::Allowed.is_allowed());
        assert!(Decision::Allowed.error_message().is_none());
        assert!(Decision::Allowed.into_result().is_ok());
        let rejected = Decision::Rejected(RateLimitExceeded::new("no"));
        assert!(rejected.is_rejected());
        assert_eq!(rejected.error_message(), Some("no"));
        assert!(rejected.into_result().unwrap_err().is_rate_limit_error());
    }

    #[tokio::test]
    async fn exactly_max_calls_are_allowed() {
        let clock = ManualClock::new(1_000_000);
        let limiter = limiter(&clock);
        let config = FieldConfig::parse(3, "1s").unwrap();
        let call = Invocation::new(Arc::new(Ctx { id: "1" }), "myField", json!({}));

        for _ in 0..3 {
            assert!(limiter.check(&call, &config).await.unwrap().is_allowed());
        }
        let fourth = limiter.check(&call, &config).await.unwrap();
        assert_eq!(fourth.error_message(), Some("You are trying to access 'myField' too often"));
    }

    #[tokio::test]
    async fn zero_max_always_rejects() {
        let clock = ManualClock::new(1_000_000);
        let limiter = limiter(&clock);
        let config = FieldConfig::parse(0, "1s").unwrap();
        let call = Invocation::new(Arc::new(Ctx { id: "1" }), "myField", json!({}));
        assert!(limiter.check(&call, &config).await.unwrap().is_rejected());
    }

    #[tokio::test]
    async fn stale_timestamps_are_pruned_from_the_store() {
        let clock = ManualClock::new(1_000_000);
        let limiter = limiter(&clock);
        let config = FieldConfig::parse(2, "1s").unwrap();
        let call = Invocation::new(Arc::new(Ctx { id: "1" }), "myField", json!({}));
        let identity = Identity::new("1", "myField");

        limiter.check(&call, &config).await.unwrap();
        clock.advance(600);
        limiter.check(&call, &config).await.unwrap();
        assert_eq!(limiter.store().get_for_identity(&identity).await.unwrap(), vec![1_000_600, 1_000_000]);

        // the first call is exactly one window old and no longer counts
        clock.set(1_001_000);
        assert!(limiter.check(&call, &config).await.unwrap().is_allowed());
        assert_eq!(
            limiter.store().get_for_identity(&identity).await.unwrap(),
            vec![1_001_000, 1_000_600]
        );
    }

    #[tokio::test]
    async fn message_precedence() {
        let clock = ManualClock::new(5_000);
        let limiter = RateLimiter::<Ctx>::builder()
            .identify_context(|ctx: &Ctx| ctx.id.to_string())
            .format_error(|input: &FormatErrorInput<'_>| {
                format!(
                    "{} ({}) hit {} per {} as {}",
                    input.field_name, input.field_identity, input.max, input.window, input.context_identity
                )
            })
            .clock(clock)
            .build()
            .unwrap();
        let call = Invocation::new(Arc::new(Ctx { id: "u1" }), "books", json!({"id": 4}));

        let formatted = FieldConfig::parse(0, "2s").unwrap().with_identity_args(["id"]);
        let decision = limiter.check(&call, &formatted).await.unwrap();
        assert_eq!(decision.error_message(), Some("books (books:4) hit 0 per 2000ms as u1"));

        let fixed = formatted.with_message("Stop!");
        let decision = limiter.check(&call, &fixed).await.unwrap();
        assert_eq!(decision.error_message(), Some("Stop!"));
    }

    #[tokio::test]
    async fn uncount_rejected_leaves_history_untouched() {
        let clock = ManualClock::new(10_000);
        let limiter = limiter(&clock);
        let config = FieldConfig::parse(1, "1s").unwrap().with_uncount_rejected(true);
        let call = Invocation::new(Arc::new(Ctx { id: "1" }), "f", json!({}));
        let identity = Identity::new("1", "f");

        assert!(limiter.check(&call, &config).await.unwrap().is_allowed());
        clock.advance(10);
        assert!(limiter.check(&call, &config).await.unwrap().is_rejected());
        clock.advance(10);
        assert!(limiter.check(&call, &config).await.unwrap().is_rejected());
        assert_eq!(limiter.store().get_for_identity(&identity).await.unwrap(), vec![10_000]);

        // once the counted call ages out the caller is admitted again
        clock.set(11_000);
        assert!(limiter.check(&call, &config).await.unwrap().is_allowed());
    }

    #[tokio::test]
    async fn rejected_calls_count_by_default() {
        let clock = ManualClock::new(10_000);
        let limiter = limiter(&clock);
        let config = FieldConfig::parse(1, "1s").unwrap();
        let call = Invocation::new(Arc::new(Ctx { id: "1" }), "f", json!({}));

        limiter.check(&call, &config).await.unwrap();
        clock.advance(500);
        assert!(limiter.check(&call, &config).await.unwrap().is_rejected());
        // the rejected call at 10_500 still holds the budget after the first one expires
        clock.set(11_000);
        assert!(limiter.check(&call, &config).await.unwrap().is_rejected());
    }

    #[test]
    fn checks_run_without_a_tokio_runtime() {
        let clock = ManualClock::new(10_000);
        let limiter = limiter(&clock);
        let config = FieldConfig::parse(1, "1s").unwrap();
        let call = Invocation::new(Arc::new(Ctx { id: "1" }), "f", json!({}));

        let first = futures::executor::block_on(limiter.check(&call, &config)).unwrap();
        assert!(first.is_allowed());
        let second = futures::executor::block_on(limiter.check(&call, &config)).unwrap();
        assert!(second.is_rejected());
        let stored =
            futures::executor::block_on(limiter.store().get_for_identity(&Identity::new("1", "f")))
                .unwrap();
        assert_eq!(stored, vec![10_000, 10_000]);
    }

    /// Keeps nothing, not even the timestamps it is handed.
    struct ForgetfulCache;

    impl BatchCache<Ctx> for ForgetfulCache {
        fn contribute(&self, _token: &Arc<Ctx>, _field_identity: &str, _new: &[u64]) -> Vec<u64> {
            Vec::new()
        }

        fn retract(&self, _token: &Arc<Ctx>, _field_identity: &str, _timestamps: &[u64]) {}
    }

    #[tokio::test]
    async fn short_batch_cache_results_do_not_panic() {
        let clock = ManualClock::new(10_000);
        let limiter = RateLimiter::<Ctx>::builder()
            .identify_context(|ctx: &Ctx| ctx.id.to_string())
            .batch_cache(ForgetfulCache)
            .clock(clock)
            .build()
            .unwrap();
        let identity = Identity::new("1", "f");
        limiter.store().set_for_identity(&identity, &[9_900, 9_950], None).await.unwrap();

        let config = FieldConfig::parse(1, "1s").unwrap().with_uncount_rejected(true);
        let call = Invocation::new(Arc::new(Ctx { id: "1" }), "f", json!({}));
        assert!(limiter.check(&call, &config).await.unwrap().is_rejected());
        assert_eq!(limiter.store().get_for_identity(&identity).await.unwrap(), vec![9_900, 9_950]);
    }
}
