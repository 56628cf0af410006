//! Tower middleware that checks every request against a [`RateLimiter`].
//!
//! The layer does not know how to find the caller or the operation inside a request; an
//! extractor turns each request into an [`Invocation`]. Rejections and store failures are
//! returned as [`GuardError`] without calling the inner service.

use crate::error::GuardError;
use crate::limiter::{Decision, FieldConfig, Invocation, RateLimiter};
use crate::store::{InMemoryStore, Store};
use futures::future::BoxFuture;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// A layer that enforces one [`FieldConfig`] using a shared [`RateLimiter`].
pub struct RateLimitLayer<C, X, S = InMemoryStore> {
    limiter: RateLimiter<C, S>,
    config: Arc<FieldConfig>,
    extract: Arc<X>,
}

impl<C, X, S> Clone for RateLimitLayer<C, X, S> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            config: Arc::clone(&self.config),
            extract: Arc::clone(&self.extract),
        }
    }
}

impl<C, X, S> std::fmt::Debug for RateLimitLayer<C, X, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitLayer")
            .field("limiter", &self.limiter)
            .field("config", &self.config)
            .field("extract", &"<fn>")
            .finish()
    }
}

impl<C, X, S> RateLimitLayer<C, X, S> {
    /// Create a rate limit layer; `extract` maps a request to the invocation to check.
    pub fn new(limiter: RateLimiter<C, S>, config: FieldConfig, extract: X) -> Self {
        Self { limiter, config: Arc::new(config), extract: Arc::new(extract) }
    }
}

impl<Svc, C, X, S> Layer<Svc> for RateLimitLayer<C, X, S> {
    type Service = RateLimitService<Svc, C, X, S>;

    fn layer(&self, service: Svc) -> Self::Service {
        RateLimitService {
            inner: service,
            limiter: self.limiter.clone(),
            config: Arc::clone(&self.config),
            extract: Arc::clone(&self.extract),
        }
    }
}

/// Middleware service that enforces rate limits.
pub struct RateLimitService<Svc, C, X, S = InMemoryStore> {
    inner: Svc,
    limiter: RateLimiter<C, S>,
    config: Arc<FieldConfig>,
    extract: Arc<X>,
}

impl<Svc: Clone, C, X, S> Clone for RateLimitService<Svc, C, X, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: self.limiter.clone(),
            config: Arc::clone(&self.config),
            extract: Arc::clone(&self.extract),
        }
    }
}

impl<Svc, C, X, S> std::fmt::Debug for RateLimitService<Svc, C, X, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitService")
            .field("limiter", &self.limiter)
            .field("config", &self.config)
            .finish()
    }
}

impl<Svc, C, X, S, Req> Service<Req> for RateLimitService<Svc, C, X, S>
where
    Svc: Service<Req> + Clone + Send + 'static,
    Svc::Future: Send + 'static,
    Svc::Error: Send + 'static,
    C: Send + Sync + 'static,
    X: Fn(&Req) -> Invocation<C> + Send + Sync + 'static,
    S: Store + 'static,
    Req: Send + 'static,
{
    type Response = Svc::Response;
    type Error = GuardError<Svc::Error>;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(GuardError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = self.limiter.clone();
        let config = Arc::clone(&self.config);
        let invocation = (self.extract)(&req);
        // the clone may not be ready; keep the ready one for this request
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            match limiter.check(&invocation, &config).await? {
                Decision::Allowed => inner.call(req).await.map_err(GuardError::Inner),
                Decision::Rejected(exceeded) => Err(GuardError::RateLimited(exceeded)),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use serde_json::json;
    use std::convert::Infallible;
    use tower::ServiceExt;

    struct Conn {
        peer: String,
    }

    struct Request {
        conn: Arc<Conn>,
        op: &'static str,
    }

    #[tokio::test]
    async fn rejects_before_reaching_inner_service() {
        let limiter = RateLimiter::<Conn>::builder()
            .identify_context(|c: &Conn| c.peer.clone())
            .clock(ManualClock::new(1_000))
            .build()
            .unwrap();
        let layer = RateLimitLayer::new(limiter, FieldConfig::parse(1, "1s").unwrap(), |r: &Request| {
            Invocation::new(Arc::clone(&r.conn), r.op, json!({}))
        });
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let svc = layer.layer(tower::service_fn(move |r: Request| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            async move { Ok::<_, Infallible>(r.op) }
        }));

        let conn = Arc::new(Conn { peer: "10.0.0.1".into() });
        let first = svc.clone().oneshot(Request { conn: Arc::clone(&conn), op: "login" }).await;
        assert_eq!(first.unwrap(), "login");

        let second = svc.clone().oneshot(Request { conn, op: "login" }).await.unwrap_err();
        assert!(second.is_rate_limited());
        assert_eq!(second.rate_limit_message(), Some("You are trying to access 'login' too often"));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
