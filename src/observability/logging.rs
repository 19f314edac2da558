//! Structured logging.
//!
//! JSON output for production, pretty output for development. `RUST_LOG`
//! overrides the configured level when set.

use std::time::UNIX_EPOCH;

use axum::{body::Body, http::Request};
use tracing::Span;
use tracing_subscriber::EnvFilter;

use crate::config::schema::{LogFormat, ObservabilityConfig};
use crate::http::request::{RequestContext, RequestIdExt};

/// Install the global subscriber.
///
/// Fails if a subscriber is already installed.
pub fn init(config: &ObservabilityConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(format!("{},tower_http=info", config.log_level)))?;

    match config.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(true)
            .with_target(false)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
    }
}

/// Span opened for every request by the logging stage.
pub fn request_span(request: &Request<Body>) -> Span {
    let request_id = request.request_id().unwrap_or("-").to_string();
    let client_ip = RequestContext::client_ip_of(request.extensions());
    let received_at_ms = request
        .extensions()
        .get::<RequestContext>()
        .and_then(|ctx| ctx.received_at_wall().duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis())
        .unwrap_or_default();

    tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
        client_ip = %client_ip,
        received_at_ms = received_at_ms as u64,
    )
}
