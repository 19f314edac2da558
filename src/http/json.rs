//! JSON pretty printing.

use axum::{
    body::{Body, HttpBody},
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::config::schema::PrettyJsonConfig;

/// Responses larger than this are never re-serialized.
const MAX_PRETTY_BODY: u64 = 4 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct PrettyJsonState {
    always: bool,
    param: Option<String>,
}

impl PrettyJsonState {
    pub fn new(config: &PrettyJsonConfig) -> Self {
        Self {
            always: config.enabled,
            param: config.param.clone().filter(|p| !p.is_empty()),
        }
    }

    fn wants_pretty(&self, query: Option<&str>) -> bool {
        if self.always {
            return true;
        }
        let (Some(param), Some(query)) = (&self.param, query) else {
            return false;
        };
        url::form_urlencoded::parse(query.as_bytes()).any(|(k, v)| {
            k == param.as_str() && !matches!(v.as_ref(), "0" | "false")
        })
    }
}

fn is_json(response: &Response) -> bool {
    response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| {
            let mime = ct.split(';').next().unwrap_or_default().trim();
            mime == "application/json" || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

pub async fn pretty_json(
    State(state): State<PrettyJsonState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let pretty = state.wants_pretty(request.uri().query());
    let response = next.run(request).await;

    let bounded = response
        .body()
        .size_hint()
        .exact()
        .is_some_and(|len| len <= MAX_PRETTY_BODY);
    if !pretty || !is_json(&response) || !bounded {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, MAX_PRETTY_BODY as usize).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to buffer JSON response");
            return Response::from_parts(parts, Body::empty());
        }
    };

    let pretty = serde_json::from_slice::<serde_json::Value>(&bytes)
        .ok()
        .and_then(|value| serde_json::to_vec_pretty(&value).ok());

    match pretty {
        Some(formatted) => {
            parts.headers.insert(header::CONTENT_LENGTH, HeaderValue::from(formatted.len()));
            Response::from_parts(parts, Body::from(formatted))
        }
        None => Response::from_parts(parts, Body::from(bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{middleware, routing::get, Json, Router};
    use tower::ServiceExt;

    fn app(config: PrettyJsonConfig) -> Router {
        Router::new()
            .route("/", get(|| async { Json(serde_json::json!({ "ok": "ok" })) }))
            .route("/text", get(|| async { "{\"a\":1}" }))
            .layer(middleware::from_fn_with_state(PrettyJsonState::new(&config), pretty_json))
    }

    async fn get_text(app: Router, uri: &str) -> String {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn compact_by_default_pretty_on_param() {
        let config = PrettyJsonConfig::default();
        assert_eq!(get_text(app(config.clone()), "/").await, r#"{"ok":"ok"}"#);
        assert_eq!(
            get_text(app(config), "/?pretty").await,
            "{\n  \"ok\": \"ok\"\n}"
        );
    }

    #[tokio::test]
    async fn non_json_is_untouched() {
        let config = PrettyJsonConfig {
            enabled: true,
            param: None,
        };
        assert_eq!(get_text(app(config), "/text").await, "{\"a\":1}");
    }
}
