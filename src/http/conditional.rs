//! Conditional GET support.
//!
//! Successful GET/HEAD responses with a known, bounded body get a strong
//! ETag when the router did not set one; a matching `If-None-Match` turns
//! the response into `304 Not Modified`.

use axum::{
    body::{Body, HttpBody},
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use sha1::{Digest, Sha1};

/// Bodies larger than this are streamed through without an ETag.
const MAX_ETAG_BODY: u64 = 1024 * 1024;

/// `"<len hex>-<base64 sha1>"`.
pub fn compute_etag(body: &[u8]) -> String {
    let digest = Sha1::digest(body);
    format!("\"{:x}-{}\"", body.len(), STANDARD_NO_PAD.encode(digest))
}

/// Returns true when `If-None-Match` lists `etag` (or `*`).
pub fn is_fresh(request_headers: &HeaderMap, etag: &str) -> bool {
    let Some(value) = request_headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    value.split(',').map(str::trim).any(|candidate| {
        candidate == "*" || candidate.trim_start_matches("W/") == etag.trim_start_matches("W/")
    })
}

pub async fn conditional_get(request: Request<Body>, next: Next) -> Response {
    let cacheable_method = matches!(*request.method(), Method::GET | Method::HEAD);
    let request_headers = request.headers().clone();

    let response = next.run(request).await;

    if !cacheable_method || !response.status().is_success() {
        return response;
    }

    let etag = match response.headers().get(header::ETAG) {
        Some(existing) => existing.to_str().ok().map(str::to_string),
        None => None,
    };

    let (mut parts, body) = response.into_parts();

    let (etag, body) = match etag {
        Some(etag) => (etag, body),
        None => {
            let bounded = body
                .size_hint()
                .exact()
                .is_some_and(|len| len <= MAX_ETAG_BODY);
            if !bounded {
                return Response::from_parts(parts, body);
            }
            let bytes = match axum::body::to_bytes(body, MAX_ETAG_BODY as usize).await {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to buffer response for ETag");
                    return Response::from_parts(parts, Body::empty());
                }
            };
            let etag = compute_etag(&bytes);
            if let Ok(value) = HeaderValue::from_str(&etag) {
                parts.headers.insert(header::ETAG, value);
            }
            (etag, Body::from(bytes))
        }
    };

    if is_fresh(&request_headers, &etag) {
        parts.status = StatusCode::NOT_MODIFIED;
        for name in [
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
            header::CONTENT_ENCODING,
            header::TRANSFER_ENCODING,
        ] {
            parts.headers.remove(name);
        }
        return Response::from_parts(parts, Body::empty());
    }

    Response::from_parts(parts, body)
}
