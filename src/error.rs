//! Error types for rate limit checks
use std::error::Error as StdError;
use std::fmt;

/// Fatal setup errors: returned when a limiter or a per-operation config is built.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// No `identify_context` function was supplied to the builder.
    #[error("an identify_context function is required to build a rate limiter")]
    MissingIdentifyContext,
    /// The window could not be parsed or is out of range.
    #[error("invalid window {input:?}: {reason}")]
    InvalidWindow {
        /// Raw value provided by the caller.
        input: String,
        /// Why it was rejected.
        reason: &'static str,
    },
}

/// Which store call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    /// Reading the timestamp history.
    Get,
    /// Writing the merged timestamp history.
    Set,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOperation::Get => f.write_str("get"),
            StoreOperation::Set => f.write_str("set"),
        }
    }
}

/// A backend failure raised while reading or writing timestamp history.
#[derive(thiserror::Error, Debug)]
#[error("store {operation} failed: {source}")]
pub struct StoreError {
    operation: StoreOperation,
    source: Box<dyn StdError + Send + Sync + 'static>,
}

impl StoreError {
    /// Wrap a backend error raised by `operation`.
    pub fn new<E>(operation: StoreOperation, source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self { operation, source: source.into() }
    }

    /// The store call that failed.
    pub fn operation(&self) -> StoreOperation {
        self.operation
    }

    /// Borrow the underlying backend error.
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.source.as_ref()
    }

    /// Take ownership of the underlying backend error.
    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync + 'static> {
        self.source
    }
}

/// The negative outcome of a check: the caller went over its budget.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct RateLimitExceeded {
    message: String,
}

impl RateLimitExceeded {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }

    /// Human-readable rejection message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Marker so error formatting layers can tell rate limit rejections apart from other
    /// failures without downcasting.
    pub fn is_rate_limit_error(&self) -> bool {
        true
    }
}

/// Error returned by [`RateLimitService`](crate::middleware::RateLimitService).
#[derive(Debug)]
pub enum GuardError<E> {
    /// The request was over its rate limit and never reached the inner service.
    RateLimited(RateLimitExceeded),
    /// The store failed and no observer was configured on the limiter.
    Store(StoreError),
    /// The inner service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for GuardError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited(e) => write!(f, "rate limited: {}", e),
            Self::Store(e) => write!(f, "rate limit store unavailable: {}", e),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: StdError + 'static> StdError for GuardError<E> {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::RateLimited(e) => Some(e),
            Self::Store(e) => Some(e),
            Self::Inner(e) => Some(e),
        }
    }
}

impl<E> GuardError<E> {
    /// Check if the request was rejected by the rate limiter.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
    /// Check if the limiter's store failed.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }
    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }
    /// Rejection message, if this is a rate limit rejection.
    pub fn rate_limit_message(&self) -> Option<&str> {
        match self {
            Self::RateLimited(e) => Some(e.message()),
            _ => None,
        }
    }
    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
}

impl<E> From<RateLimitExceeded> for GuardError<E> {
    fn from(e: RateLimitExceeded) -> Self {
        Self::RateLimited(e)
    }
}

impl<E> From<StoreError> for GuardError<E> {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
