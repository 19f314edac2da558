//! Request body parsing.
//!
//! JSON, url-encoded forms and plain text are buffered (within their size
//! limits), parsed, and attached to the request as [`ParsedBody`]. The raw
//! bytes are put back so downstream extractors keep working. Paths matching
//! an ignored glob are passed through with the body stream untouched.

use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, Method, Request},
    middleware::Next,
    response::Response,
};

use crate::config::BodyParserConfig;
use crate::http::response::ApiError;
use crate::security::paths::IgnoredPaths;

/// Parsed request body, available to handlers as an extension.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Json,
    Form,
    Text,
}

/// State for the body-parsing stage.
#[derive(Debug, Clone)]
pub struct BodyParserState {
    inner: Arc<BodyParserInner>,
}

#[derive(Debug)]
struct BodyParserInner {
    ignored: IgnoredPaths,
    json_limit: usize,
    form_limit: usize,
    text_limit: usize,
}

impl BodyParserState {
    pub fn new(config: &BodyParserConfig) -> Result<Self, globset::Error> {
        Ok(Self {
            inner: Arc::new(BodyParserInner {
                ignored: IgnoredPaths::new(&config.ignored_globs)?,
                json_limit: config.json_limit,
                form_limit: config.form_limit,
                text_limit: config.text_limit,
            }),
        })
    }

    fn limit(&self, kind: Kind) -> usize {
        match kind {
            Kind::Json => self.inner.json_limit,
            Kind::Form => self.inner.form_limit,
            Kind::Text => self.inner.text_limit,
        }
    }
}

fn kind_of(headers: &HeaderMap) -> Option<Kind> {
    let content_type = headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
    let mime = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if mime == "application/json" || (mime.starts_with("application/") && mime.ends_with("+json")) {
        Some(Kind::Json)
    } else if mime == "application/x-www-form-urlencoded" {
        Some(Kind::Form)
    } else if mime == "text/plain" {
        Some(Kind::Text)
    } else {
        None
    }
}

fn parse(kind: Kind, bytes: &Bytes) -> Result<ParsedBody, ApiError> {
    match kind {
        Kind::Json => {
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(ParsedBody::Json(serde_json::Value::Object(Default::default())));
            }
            serde_json::from_slice(bytes)
                .map(ParsedBody::Json)
                .map_err(|e| ApiError::BadRequest(format!("Invalid JSON body: {e}")))
        }
        Kind::Form => Ok(ParsedBody::Form(
            url::form_urlencoded::parse(bytes).into_owned().collect(),
        )),
        Kind::Text => String::from_utf8(bytes.to_vec())
            .map(ParsedBody::Text)
            .map_err(|_| ApiError::BadRequest("Request body is not valid UTF-8".to_string())),
    }
}

pub async fn parse_body(
    State(state): State<BodyParserState>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    if matches!(*request.method(), Method::GET | Method::HEAD | Method::OPTIONS)
        || state.inner.ignored.matches(request.uri().path())
    {
        return Ok(next.run(request).await);
    }

    let Some(kind) = kind_of(request.headers()) else {
        return Ok(next.run(request).await);
    };

    let limit = state.limit(kind);
    let (mut parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| ApiError::PayloadTooLarge(format!("Request body exceeds {limit} bytes")))?;

    let parsed = parse(kind, &bytes)?;
    parts.extensions.insert(parsed);

    Ok(next.run(Request::from_parts(parts, Body::from(bytes))).await)
}
