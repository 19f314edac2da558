//! Authentication stages.
//!
//! Basic auth is checked against configured credentials. Session handling
//! is a collaborator: the server only decides where it runs.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::{header, request::Parts, Request},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::config::BasicAuthConfig;
use crate::http::response::ApiError;

/// Identity established for the current request by a session collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: String,
}

/// Session initialization collaborator.
///
/// Implementations typically read a cookie or token from `parts` and insert
/// an [`AuthenticatedUser`] into `parts.extensions` when it is valid.
#[async_trait]
pub trait SessionInitializer: Send + Sync {
    async fn initialize(&self, parts: &mut Parts) -> Result<(), ApiError>;
}

/// Credentials checked by the basic-auth stage.
#[derive(Debug, Clone)]
pub struct BasicAuthState {
    name: Arc<str>,
    pass: Arc<str>,
    realm: Arc<str>,
}

impl BasicAuthState {
    pub fn new(config: &BasicAuthConfig) -> Self {
        Self {
            name: config.name.as_str().into(),
            pass: config.pass.as_str().into(),
            realm: config.realm.as_str().into(),
        }
    }

    fn accepts(&self, authorization: Option<&str>) -> bool {
        let Some((user, pass)) = authorization.and_then(decode_basic) else {
            return false;
        };
        // evaluate both so timing does not reveal which half failed
        let user_ok = constant_time_eq(user.as_bytes(), self.name.as_bytes());
        let pass_ok = constant_time_eq(pass.as_bytes(), self.pass.as_bytes());
        user_ok & pass_ok
    }
}

/// Split a `Basic <base64(user:pass)>` header value.
pub fn decode_basic(value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = value.trim().split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub async fn basic_auth(
    State(state): State<BasicAuthState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    if state.accepts(authorization) {
        Ok(next.run(request).await)
    } else {
        Err(ApiError::Unauthorized {
            realm: state.realm.to_string(),
        })
    }
}

/// Run the session collaborator before anything downstream sees the request.
pub async fn session_middleware(
    State(session): State<Arc<dyn SessionInitializer>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = request.into_parts();
    session.initialize(&mut parts).await?;
    Ok(next.run(Request::from_parts(parts, body)).await)
}
