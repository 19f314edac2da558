//! Security response headers and CORS.
//!
//! The security set is the conventional hardening list for JSON APIs. Each
//! header is only added when the handler has not set it already.

use std::time::Duration;

use axum::{
    http::{header::InvalidHeaderValue, HeaderName, HeaderValue, Method},
    Router,
};
use tower_http::{
    cors::{AllowHeaders, AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
};

use crate::config::CorsConfig;

const HSTS: (&str, &str) = ("strict-transport-security", "max-age=15552000; includeSubDomains");

pub const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-permitted-cross-domain-policies", "none"),
    ("x-xss-protection", "0"),
    ("referrer-policy", "no-referrer"),
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
];

/// Wrap `router` with one header layer per entry of [`SECURITY_HEADERS`],
/// plus `Strict-Transport-Security` when serving https.
pub fn apply_security_headers(router: Router, https: bool) -> Router {
    SECURITY_HEADERS
        .iter()
        .chain(https.then_some(&HSTS))
        .fold(router, |router, &(name, value)| {
            router.layer(SetResponseHeaderLayer::if_not_present(
                HeaderName::from_static(name),
                HeaderValue::from_static(value),
            ))
        })
}

/// Build the CORS layer.
///
/// An empty origin list allows any origin. With credentials enabled the
/// request origin is mirrored instead, since `*` is not valid there.
pub fn cors_layer(config: &CorsConfig) -> Result<CorsLayer, InvalidHeaderValue> {
    let origin = if config.origins.is_empty() {
        if config.allow_credentials {
            AllowOrigin::mirror_request()
        } else {
            AllowOrigin::any()
        }
    } else {
        let origins = config
            .origins
            .iter()
            .map(|o| HeaderValue::from_str(o))
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(origins)
    };

    let mut layer = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(config.allow_credentials);

    if let Some(secs) = config.max_age_secs {
        layer = layer.max_age(Duration::from_secs(secs));
    }
    Ok(layer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, response::IntoResponse, routing::get};
    use tower::ServiceExt;

    #[tokio::test]
    async fn security_headers_do_not_override_handler() {
        let app = apply_security_headers(
            Router::new().route(
                "/",
                get(|| async { ([("x-frame-options", "DENY")], "ok").into_response() }),
            ),
            false,
        );

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let headers = response.headers();
        assert_eq!(headers["x-content-type-options"], "nosniff");
        assert_eq!(headers["x-frame-options"], "DENY");
        assert_eq!(headers["referrer-policy"], "no-referrer");
        assert!(headers.get("strict-transport-security").is_none());
    }

    #[tokio::test]
    async fn preflight_for_listed_origin() {
        let config = CorsConfig {
            origins: vec!["https://app.example.com".into()],
            allow_credentials: true,
            max_age_secs: Some(600),
        };
        let app = Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(cors_layer(&config).unwrap());

        let response = app
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/")
                    .header("origin", "https://app.example.com")
                    .header("access-control-request-method", "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let headers = response.headers();
        assert_eq!(
            headers["access-control-allow-origin"],
            "https://app.example.com"
        );
        assert_eq!(headers["access-control-allow-credentials"], "true");
        assert_eq!(headers["access-control-max-age"], "600");
    }

    #[test]
    fn invalid_origin_is_an_error() {
        let config = CorsConfig {
            origins: vec!["bad\norigin".into()],
            ..Default::default()
        };
        assert!(cors_layer(&config).is_err());
    }
}
