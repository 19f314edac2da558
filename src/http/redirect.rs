//! Trailing-slash normalization.
//!
//! `/foo/?x=1` is answered with `301 Location: /foo?x=1`. The root path and
//! protocol-relative looking paths (`//host/`) pass through untouched, the
//! latter so the redirect can never point at another host.

use axum::{
    body::Body,
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Returns the redirect target for `path` + `query`, if one is needed.
pub fn trailing_slash_target(path: &str, query: Option<&str>) -> Option<String> {
    if path.len() <= 1 || !path.ends_with('/') || path.starts_with("//") {
        return None;
    }

    let mut target = path[..path.len() - 1].to_string();
    if let Some(q) = query {
        target.push('?');
        target.push_str(q);
    }
    Some(target)
}

/// Redirect paths with a trailing slash before any body is read.
pub async fn remove_trailing_slash(request: Request<Body>, next: Next) -> Response {
    let target = trailing_slash_target(request.uri().path(), request.uri().query());

    match target.and_then(|t| HeaderValue::from_str(&t).ok()) {
        Some(location) => {
            tracing::debug!(from = %request.uri(), "Redirecting trailing slash");
            (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, location)]).into_response()
        }
        None => next.run(request).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_one_trailing_slash_and_keeps_query() {
        assert_eq!(trailing_slash_target("/foo/", Some("x=1")).as_deref(), Some("/foo?x=1"));
        assert_eq!(trailing_slash_target("/a/b/", None).as_deref(), Some("/a/b"));
        assert_eq!(trailing_slash_target("/a//", None).as_deref(), Some("/a/"));
    }

    #[test]
    fn leaves_other_paths_alone() {
        for path in ["/", "/foo", "//evil.example/", "//", "/foo.json"] {
            assert_eq!(trailing_slash_target(path, Some("q=1")), None, "{path}");
        }
    }
}
