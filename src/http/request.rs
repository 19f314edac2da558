//! Per-request context and the stages that open every request.
//!
//! # Responsibilities
//! - Create the [`RequestContext`] (arrival markers, client IP, path)
//! - Generate or re-use the `X-Request-Id`
//! - Report `X-Response-Time`
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - Forwarded-address headers are only honored with `trust_proxy`
//! - The context is created per request and never shared between requests

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Instant, SystemTime};

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Extensions, HeaderMap, HeaderName, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tower_http::request_id::{MakeRequestId, RequestId};
use uuid::Uuid;

use crate::security::rate_limit::RateLimitStatus;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");
pub const X_RESPONSE_TIME: HeaderName = HeaderName::from_static("x-response-time");
const X_FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Debug)]
struct ContextInner {
    received_at: Instant,
    received_at_wall: SystemTime,
    client_ip: IpAddr,
    path: String,
    rate_limit: Mutex<RateLimitStatus>,
}

/// Mutable per-request state shared by every stage of one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

impl RequestContext {
    pub fn new(client_ip: IpAddr, path: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                received_at: Instant::now(),
                received_at_wall: SystemTime::now(),
                client_ip,
                path: path.into(),
                rate_limit: Mutex::new(RateLimitStatus::Pending),
            }),
        }
    }

    pub fn received_at(&self) -> Instant {
        self.inner.received_at
    }

    /// Wall-clock arrival time, used as the log timestamp.
    pub fn received_at_wall(&self) -> SystemTime {
        self.inner.received_at_wall
    }

    pub fn client_ip(&self) -> IpAddr {
        self.inner.client_ip
    }

    /// Request path as received, before any normalization.
    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn rate_limit(&self) -> RateLimitStatus {
        *self.inner.rate_limit.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_rate_limit(&self, status: RateLimitStatus) {
        *self.inner.rate_limit.lock().unwrap_or_else(|e| e.into_inner()) = status;
    }

    /// Client IP recorded for this request, or the peer address when the
    /// context stage did not run.
    pub fn client_ip_of(extensions: &Extensions) -> IpAddr {
        if let Some(ctx) = extensions.get::<RequestContext>() {
            return ctx.client_ip();
        }
        extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
    }
}

/// Derive the client IP from the connection and, when trusted, from
/// the left-most `X-Forwarded-For` entry.
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> IpAddr {
    if trust_proxy {
        let forwarded = headers
            .get(X_FORWARDED_FOR)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .and_then(|ip| ip.trim().parse::<IpAddr>().ok());
        if let Some(ip) = forwarded {
            return ip;
        }
    }
    peer.map(|addr| addr.ip())
        .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED))
}

/// Settings for the request-received stage.
#[derive(Debug, Clone, Copy)]
pub struct ReceivedState {
    pub trust_proxy: bool,
}

/// Tag the request with its arrival time and client identity.
pub async fn request_received(
    State(state): State<ReceivedState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let ip = client_ip(request.headers(), peer, state.trust_proxy);
    let ctx = RequestContext::new(ip, request.uri().path());
    request.extensions_mut().insert(ctx);
    next.run(request).await
}

/// Add `X-Response-Time` measured from the arrival marker.
pub async fn response_time(request: Request<Body>, next: Next) -> Response {
    let started = request
        .extensions()
        .get::<RequestContext>()
        .map(RequestContext::received_at)
        .unwrap_or_else(Instant::now);

    let mut response = next.run(request).await;

    let elapsed = started.elapsed();
    crate::observability::metrics::record_duration(elapsed);
    let value = format!("{:.3}ms", elapsed.as_secs_f64() * 1000.0);
    if let Ok(value) = HeaderValue::from_str(&value) {
        response.headers_mut().insert(X_RESPONSE_TIME, value);
    }
    response
}

/// Generates UUID v4 request IDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuid;

impl MakeRequestId for MakeRequestUuid {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Extension trait for reading the request ID set by the pipeline.
pub trait RequestIdExt {
    fn request_id(&self) -> Option<&str>;
}

impl<B> RequestIdExt for Request<B> {
    fn request_id(&self) -> Option<&str> {
        self.headers().get(X_REQUEST_ID).and_then(|v| v.to_str().ok())
    }
}
