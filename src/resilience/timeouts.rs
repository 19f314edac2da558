//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound the time the rest of the pipeline may take per request
//! - Stop waiting on the downstream work once the deadline passes
//! - Produce the timeout error, localized when a translator is available
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the downstream future is dropped on
//!   expiry, so its late completion can never reach the client
//! - Timeout errors are distinct from other errors (504, logged as timeouts)
//! - A zero duration disables the guard

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::response::ApiError;
use crate::i18n::Localizer;
use crate::observability::metrics;

pub const DEFAULT_TIMEOUT_MESSAGE: &str =
    "Your request has timed out and we have been alerted of this issue. Please try again or contact us.";

/// Translation key looked up for the timeout message.
pub const TIMEOUT_MESSAGE_KEY: &str = "REQUEST_TIMED_OUT";

/// Where a guarded unit of work ended up.
#[derive(Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    Completed(T),
    TimedOut,
}

/// Races a unit of work against a deadline.
#[derive(Clone)]
pub struct TimeoutGuard {
    duration: Option<Duration>,
    localizer: Option<Arc<Localizer>>,
}

impl TimeoutGuard {
    /// A zero duration yields a pass-through guard.
    pub fn new(duration: Duration) -> Self {
        Self {
            duration: (!duration.is_zero()).then_some(duration),
            localizer: None,
        }
    }

    pub fn with_localizer(mut self, localizer: Arc<Localizer>) -> Self {
        self.localizer = Some(localizer);
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.duration.is_some()
    }

    /// Run `work` until it finishes or the deadline passes, whichever is first.
    pub async fn run<F: Future>(&self, work: F) -> Outcome<F::Output> {
        match self.duration {
            None => Outcome::Completed(work.await),
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(output) => Outcome::Completed(output),
                Err(_) => Outcome::TimedOut,
            },
        }
    }

    fn message_for(&self, uri: &Uri, headers: &HeaderMap) -> String {
        self.localizer
            .as_ref()
            .and_then(|l| {
                let locale = l.resolve(uri.query(), headers);
                l.translate(TIMEOUT_MESSAGE_KEY, &locale)
            })
            .unwrap_or_else(|| DEFAULT_TIMEOUT_MESSAGE.to_string())
    }
}

/// Middleware function wrapping all downstream stages with the guard.
pub async fn timeout_middleware(
    State(guard): State<TimeoutGuard>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if !guard.is_enabled() {
        return next.run(request).await;
    }

    // locale inputs, kept only when the message can be localized
    let origin = guard
        .localizer
        .is_some()
        .then(|| (request.uri().clone(), request.headers().clone()));

    match guard.run(next.run(request)).await {
        Outcome::Completed(response) => response,
        Outcome::TimedOut => {
            metrics::record_timeout();
            let message = match &origin {
                Some((uri, headers)) => guard.message_for(uri, headers),
                None => DEFAULT_TIMEOUT_MESSAGE.to_string(),
            };
            ApiError::Timeout { message }.into_response()
        }
    }
}
