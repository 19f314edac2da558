//! Fixed-window rate limiting backed by a shared counter store.
//!
//! # Flow
//! ```text
//! request path matches an ignored glob → pass through, store untouched
//! otherwise:
//!     key   = key function(request)            (default: client IP)
//!     snap  = store.increment(prefix:key, window)   (atomic)
//!     count ≤ max → admit, annotate X-RateLimit-* headers
//!     count > max → 429, Retry-After = remaining window
//! store error → fail open or fail closed, as configured
//! ```

use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::State,
    http::{request::Parts, Extensions, HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::config::{KeyBy, RateLimitConfig, StoreFailurePolicy};
use crate::http::request::RequestContext;
use crate::http::response::ApiError;
use crate::observability::metrics;
use crate::security::paths::IgnoredPaths;
use crate::security::store::{CounterStore, StoreError};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Custom key derivation supplied by the integrator.
pub type KeyFn = Arc<dyn Fn(&Parts, IpAddr) -> String + Send + Sync>;

/// Outcome of one limiter evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub admitted: bool,
    /// Time until the current window resets.
    pub retry_after: Duration,
    pub limit: u64,
    pub remaining: u64,
}

/// Rate-limit state recorded on the request context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitStatus {
    /// Limiter not evaluated (disabled, or not reached yet).
    #[default]
    Pending,
    /// Path matched an ignored glob.
    Bypassed,
    Admitted,
    Denied,
    /// Store failed and the policy let the request through.
    Degraded,
}

/// Fixed-window limiter over a [`CounterStore`].
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }

    /// Count one hit for `key` and decide whether it fits in `quota`.
    pub async fn check(&self, key: &str, quota: u64, window: Duration) -> Result<Decision, StoreError> {
        let snap = self.store.increment(key, window).await?;
        Ok(Decision {
            admitted: snap.count <= quota,
            retry_after: snap.ttl,
            limit: quota,
            remaining: quota.saturating_sub(snap.count),
        })
    }
}

/// State for the rate-limit stage.
#[derive(Clone)]
pub struct RateLimitState {
    limiter: Arc<RateLimiter>,
    quota: u64,
    window: Duration,
    prefix: String,
    key_by: KeyBy,
    key_fn: Option<KeyFn>,
    ignored: IgnoredPaths,
    policy: StoreFailurePolicy,
    headers: bool,
}

impl RateLimitState {
    pub fn new(
        config: &RateLimitConfig,
        store: Arc<dyn CounterStore>,
        key_fn: Option<KeyFn>,
    ) -> Result<Self, globset::Error> {
        Ok(Self {
            limiter: Arc::new(RateLimiter::new(store)),
            quota: config.max,
            window: Duration::from_millis(config.window_ms),
            prefix: config.prefix.clone(),
            key_by: config.key_by.clone(),
            key_fn,
            ignored: IgnoredPaths::new(&config.ignored_globs)?,
            policy: config.on_store_error,
            headers: config.headers,
        })
    }

    fn key_for(&self, parts: &Parts, client_ip: IpAddr) -> String {
        let id = match (&self.key_fn, &self.key_by) {
            (Some(f), _) => f(parts, client_ip),
            (None, KeyBy::Ip) => client_ip.to_string(),
            (None, KeyBy::Header { name }) => parts
                .headers
                .get(name.as_str())
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| client_ip.to_string()),
        };
        if self.prefix.is_empty() {
            id
        } else {
            format!("{}:{}", self.prefix, id)
        }
    }
}

/// Middleware function for rate limiting.
pub async fn rate_limit_middleware(
    State(state): State<RateLimitState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if state.ignored.matches(request.uri().path()) {
        mark(request.extensions(), RateLimitStatus::Bypassed);
        return Ok(next.run(request).await);
    }

    let (parts, body) = request.into_parts();
    let client_ip = RequestContext::client_ip_of(&parts.extensions);
    let key = state.key_for(&parts, client_ip);

    let decision = match state.limiter.check(&key, state.quota, state.window).await {
        Ok(decision) => decision,
        Err(e) => {
            metrics::record_counter_store_error();
            return match state.policy {
                StoreFailurePolicy::FailOpen => {
                    tracing::warn!(key = %key, error = %e, "Counter store unavailable, admitting request");
                    mark(&parts.extensions, RateLimitStatus::Degraded);
                    Ok(next.run(Request::from_parts(parts, body)).await)
                }
                StoreFailurePolicy::FailClosed => {
                    tracing::error!(key = %key, error = %e, "Counter store unavailable, rejecting request");
                    Err(ApiError::ServiceUnavailable(
                        "Rate limiting is temporarily unavailable.".to_string(),
                    ))
                }
            };
        }
    };

    if !decision.admitted {
        mark(&parts.extensions, RateLimitStatus::Denied);
        tracing::warn!(key = %key, limit = decision.limit, "Rate limit exceeded");
        metrics::record_rate_limited("window_quota");
        let mut err = ApiError::TooManyRequests {
            retry_after: decision.retry_after,
        }
        .into_response();
        if state.headers {
            annotate(err.headers_mut(), &decision);
        }
        return Ok(err);
    }

    mark(&parts.extensions, RateLimitStatus::Admitted);
    let mut response = next.run(Request::from_parts(parts, body)).await;
    if state.headers {
        annotate(response.headers_mut(), &decision);
    }
    Ok(response)
}

fn mark(extensions: &Extensions, status: RateLimitStatus) {
    if let Some(ctx) = extensions.get::<RequestContext>() {
        ctx.set_rate_limit(status);
    }
}

fn annotate(headers: &mut HeaderMap, decision: &Decision) {
    let reset = SystemTime::now()
        .checked_add(decision.retry_after)
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or_default();

    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(reset));
}

/// Whole seconds a client should wait, rounded up and never zero.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}
