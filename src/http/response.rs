//! Error handling and response normalization.
//!
//! # Responsibilities
//! - Define [`ApiError`], the one failure channel every stage uses
//! - Render the error envelope in exactly one place ([`normalize_errors`])
//! - Turn unmatched requests into 404s and handler panics into 500s
//!
//! # Design Decisions
//! - `ApiError::into_response` only tags a bare response with the error;
//!   headers added on the way out (Retry-After, X-RateLimit-*) survive
//! - Internal failures never leak their source in the body
//! - Log severity follows the status class; timeouts are logged on their own

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, HttpBody},
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::observability::metrics;
use crate::security::rate_limit::retry_after_secs;

/// A request-scoped failure.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized { realm: String },

    #[error("Not Found")]
    NotFound,

    #[error("{0}")]
    PayloadTooLarge(String),

    #[error("{0}")]
    UnsupportedMediaType(String),

    #[error("Rate limit exceeded, retry in {} seconds.", retry_after_secs(*.retry_after))]
    TooManyRequests { retry_after: Duration },

    #[error("{0}")]
    ServiceUnavailable(String),

    #[error("{message}")]
    Timeout { message: String },

    /// Unexpected failure. The detail is logged, never sent to the client.
    #[error("internal error: {0}")]
    Internal(String),

    /// Failure raised by a router or collaborator with its own status.
    #[error("{message}")]
    Status { status: StatusCode, message: String },
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Status { status, .. } => *status,
        }
    }

    /// Message safe to show to clients.
    pub fn public_message(&self) -> String {
        match self {
            ApiError::Internal(_) => reason(StatusCode::INTERNAL_SERVER_ERROR).to_string(),
            ApiError::Status { status, .. } if status.is_server_error() => {
                reason(*status).to_string()
            }
            other => other.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout { .. })
    }
}

/// Marker attached to responses produced by an [`ApiError`].
#[derive(Debug, Clone)]
pub struct ErrorTag(pub Arc<ApiError>);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = self.status();

        match &self {
            ApiError::Unauthorized { realm } => {
                let challenge = format!("Basic realm=\"{}\"", realm.replace('"', ""));
                if let Ok(value) = HeaderValue::from_str(&challenge) {
                    response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
                }
            }
            ApiError::TooManyRequests { retry_after } => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(*retry_after)));
            }
            _ => {}
        }

        response.extensions_mut().insert(ErrorTag(Arc::new(self)));
        response
    }
}

/// The documented error body.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub status_code: u16,
    pub error: String,
    pub message: String,
}

impl ErrorEnvelope {
    pub fn from_error(err: &ApiError) -> Self {
        let status = err.status();
        Self {
            status_code: status.as_u16(),
            error: reason(status).to_string(),
            message: err.public_message(),
        }
    }
}

fn reason(status: StatusCode) -> &'static str {
    status.canonical_reason().unwrap_or("Error")
}

/// Render the envelope for any response carrying an [`ErrorTag`].
///
/// This is the only place an error body is written.
pub async fn normalize_errors(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let mut response = next.run(request).await;
    metrics::record_status(response.status().as_u16());

    let Some(ErrorTag(err)) = response.extensions_mut().remove::<ErrorTag>() else {
        return response;
    };

    let status = err.status();
    if err.is_timeout() {
        tracing::warn!(kind = "timeout", method = %method, path = %path, status = status.as_u16(), "Request timed out");
    } else if status.is_server_error() {
        tracing::error!(method = %method, path = %path, status = status.as_u16(), error = %err, "Request failed");
    } else {
        tracing::warn!(method = %method, path = %path, status = status.as_u16(), error = %err, "Request rejected");
    }

    let envelope = ErrorEnvelope::from_error(&err);
    let body = match serde_json::to_vec(&envelope) {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize error envelope");
            Vec::new()
        }
    };

    let (mut parts, _) = response.into_parts();
    parts.status = status;
    parts.headers.remove(header::CONTENT_LENGTH);
    parts.headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json; charset=utf-8"),
    );
    Response::from_parts(parts, Body::from(body))
}

/// Convert a router fall-through (an empty 4xx such as axum's bare 404 or
/// 405) into an [`ApiError`] so it gets the envelope.
///
/// Headers the router set, like `Allow`, are kept.
pub async fn not_found_fallback(request: Request<Body>, next: Next) -> Response {
    let response = next.run(request).await;

    let status = response.status();
    let unanswered = status.is_client_error()
        && response.extensions().get::<ErrorTag>().is_none()
        && response.body().size_hint().exact() == Some(0);
    if !unanswered {
        return response;
    }

    let err = if status == StatusCode::NOT_FOUND {
        ApiError::NotFound
    } else {
        ApiError::Status {
            status,
            message: reason(status).to_string(),
        }
    };
    let (mut parts, body) = response.into_parts();
    parts.extensions.insert(ErrorTag(Arc::new(err)));
    Response::from_parts(parts, body)
}

/// Panic handler for `CatchPanicLayer`: the panic becomes an internal error.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    };
    ApiError::Internal(format!("handler panicked: {detail}")).into_response()
}
