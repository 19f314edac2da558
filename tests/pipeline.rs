//! End-to-end behaviour of the request pipeline over real sockets.

use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use api_bootstrap::config::{BasicAuthConfig, I18nConfig, RateLimitConfig, StoreFailurePolicy};
use api_bootstrap::i18n::Translator;
use api_bootstrap::resilience::timeouts::TIMEOUT_MESSAGE_KEY;
use api_bootstrap::security::auth::{AuthenticatedUser, SessionInitializer};
use api_bootstrap::security::ip_store::IpAddressStore;
use api_bootstrap::security::store::StoreError;
use api_bootstrap::{ApiError, ApiServer, Stage};
use async_trait::async_trait;
use axum::{
    http::request::Parts,
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Extension, Json, Router,
};
use serde_json::{json, Value};

mod common;

fn ok_routes() -> Router {
    Router::new()
        .route("/", get(|| async { Json(json!({ "ok": "ok" })) }))
        .route("/foo", get(|| async { "foo" }))
        .route("/health", get(|| async { "up" }))
        .route("/slow", get(|| async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            "late"
        }))
        .route("/panic", get(|| async {
            if true {
                panic!("boom");
            }
            "unreachable"
        }))
        .route("/echo", post(|Json(v): Json<Value>| async move { Json(v) }))
}

fn rate_limited(max: u64) -> RateLimitConfig {
    RateLimitConfig {
        max,
        window_ms: 60_000,
        ..Default::default()
    }
}

#[tokio::test]
async fn custom_router_answers() {
    let server = ApiServer::builder(common::base_config())
        .routes(ok_routes)
        .build()
        .unwrap();
    let addr = common::start(&server).await;

    let response = common::client().get(common::url(addr, "/")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().contains_key("x-request-id"));
    assert!(response.headers().contains_key("etag"));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!({ "ok": "ok" }));

    server.close().await.unwrap();
}

#[tokio::test]
async fn second_request_in_window_is_limited() {
    let mut config = common::base_config();
    config.rate_limit = Some(rate_limited(1));
    let server = ApiServer::builder(config).routes(ok_routes()).build().unwrap();
    let addr = common::start(&server).await;
    let client = common::client();

    let first = client.get(common::url(addr, "/")).send().await.unwrap();
    assert_eq!(first.status(), 200);
    assert_eq!(first.headers()["x-ratelimit-limit"], "1");
    assert_eq!(first.headers()["x-ratelimit-remaining"], "0");

    let second = client.get(common::url(addr, "/")).send().await.unwrap();
    assert_eq!(second.status(), 429);
    let retry: u64 = second.headers()["retry-after"].to_str().unwrap().parse().unwrap();
    assert!((1..=60).contains(&retry));

    let body: Value = second.json().await.unwrap();
    assert_eq!(body["statusCode"], 429);
    assert_eq!(body["error"], "Too Many Requests");
    assert_eq!(
        body["message"],
        format!("Rate limit exceeded, retry in {retry} seconds.")
    );

    server.close().await.unwrap();
}

#[tokio::test]
async fn slow_handler_times_out() {
    let mut config = common::base_config();
    config.timeout_ms = 50;
    let server = ApiServer::builder(config).routes(ok_routes()).build().unwrap();
    let addr = common::start(&server).await;

    let started = Instant::now();
    let response = common::client().get(common::url(addr, "/slow")).send().await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(response.status(), 504);
    assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["statusCode"], 504);
    assert_eq!(
        body["message"],
        api_bootstrap::resilience::timeouts::DEFAULT_TIMEOUT_MESSAGE
    );

    // fast routes are unaffected
    let response = common::client().get(common::url(addr, "/foo")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    server.close().await.unwrap();
}

struct TimeoutPhrases;

impl Translator for TimeoutPhrases {
    fn translate(&self, key: &str, locale: &str) -> Option<String> {
        match (key, locale) {
            (TIMEOUT_MESSAGE_KEY, "es") => Some("La solicitud ha tardado demasiado.".into()),
            (TIMEOUT_MESSAGE_KEY, "en") => Some("The request took too long.".into()),
            _ => None,
        }
    }
}

#[tokio::test]
async fn timeout_message_is_localized() {
    let mut config = common::base_config();
    config.timeout_ms = 50;
    config.i18n = Some(I18nConfig {
        locales: vec!["en".into(), "es".into()],
        ..Default::default()
    });
    let server = ApiServer::builder(config)
        .routes(ok_routes())
        .translator(Arc::new(TimeoutPhrases))
        .build()
        .unwrap();
    let addr = common::start(&server).await;

    let response = common::client()
        .get(common::url(addr, "/slow"))
        .header("accept-language", "es")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 504);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["statusCode"], 504);
    assert_eq!(body["message"], "La solicitud ha tardado demasiado.");

    server.close().await.unwrap();
}

#[tokio::test]
async fn translator_without_i18n_section_uses_default_locale() {
    let mut config = common::base_config();
    config.timeout_ms = 50;
    let server = ApiServer::builder(config)
        .routes(ok_routes())
        .translator(Arc::new(TimeoutPhrases))
        .build()
        .unwrap();
    let addr = common::start(&server).await;

    let response = common::client()
        .get(common::url(addr, "/slow"))
        .header("accept-language", "es")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 504);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["message"], "The request took too long.");

    server.close().await.unwrap();
}

#[tokio::test]
async fn trailing_slash_redirects_with_query() {
    let server = ApiServer::builder(common::base_config())
        .routes(ok_routes())
        .build()
        .unwrap();
    let addr = common::start(&server).await;
    let client = common::client();

    let response = client.get(common::url(addr, "/foo/?x=1")).send().await.unwrap();
    assert_eq!(response.status(), 301);
    assert_eq!(response.headers()["location"], "/foo?x=1");

    let response = client.get(common::url(addr, "/")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    server.close().await.unwrap();
}

#[tokio::test]
async fn ignored_path_leaves_store_untouched() {
    let store = common::counting_store();
    let mut config = common::base_config();
    config.rate_limit = Some(RateLimitConfig {
        ignored_globs: vec!["/health".into()],
        ..rate_limited(1)
    });
    let server = ApiServer::builder(config)
        .routes(ok_routes())
        .counter_store(store.clone())
        .build()
        .unwrap();
    let addr = common::start(&server).await;
    let client = common::client();

    for _ in 0..3 {
        let response = client.get(common::url(addr, "/health")).send().await.unwrap();
        assert_eq!(response.status(), 200);
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
    }
    assert_eq!(store.calls(), 0);

    client.get(common::url(addr, "/foo")).send().await.unwrap();
    assert_eq!(store.calls(), 1, "one evaluation per request");

    server.close().await.unwrap();
}

#[tokio::test]
async fn store_outage_fails_open_by_default() {
    let mut config = common::base_config();
    config.rate_limit = Some(rate_limited(1));
    let server = ApiServer::builder(config)
        .routes(ok_routes())
        .counter_store(Arc::new(common::DownStore))
        .build()
        .unwrap();
    let addr = common::start(&server).await;
    let client = common::client();

    for _ in 0..3 {
        let response = client.get(common::url(addr, "/foo")).send().await.unwrap();
        assert_eq!(response.status(), 200);
    }

    server.close().await.unwrap();
}

#[tokio::test]
async fn store_outage_can_fail_closed() {
    let mut config = common::base_config();
    config.rate_limit = Some(RateLimitConfig {
        on_store_error: StoreFailurePolicy::FailClosed,
        ..rate_limited(1)
    });
    let server = ApiServer::builder(config)
        .routes(ok_routes())
        .counter_store(Arc::new(common::DownStore))
        .build()
        .unwrap();
    let addr = common::start(&server).await;

    let response = common::client().get(common::url(addr, "/foo")).send().await.unwrap();
    assert_eq!(response.status(), 503);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["statusCode"], 503);

    server.close().await.unwrap();
}

#[tokio::test]
async fn custom_key_function_groups_requests() {
    let mut config = common::base_config();
    config.rate_limit = Some(rate_limited(1));
    let server = ApiServer::builder(config)
        .routes(ok_routes())
        .key_fn(|parts: &Parts, _ip: IpAddr| {
            parts
                .headers
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("anonymous")
                .to_string()
        })
        .build()
        .unwrap();
    let addr = common::start(&server).await;
    let client = common::client();

    let a = client.get(common::url(addr, "/foo")).header("x-api-key", "a").send().await.unwrap();
    let b = client.get(common::url(addr, "/foo")).header("x-api-key", "b").send().await.unwrap();
    let a2 = client.get(common::url(addr, "/foo")).header("x-api-key", "a").send().await.unwrap();
    assert_eq!(a.status(), 200);
    assert_eq!(b.status(), 200);
    assert_eq!(a2.status(), 429);

    server.close().await.unwrap();
}

#[tokio::test]
async fn basic_auth_challenges_and_admits() {
    let mut config = common::base_config();
    config.auth = Some(BasicAuthConfig {
        name: "admin".into(),
        pass: "secret".into(),
        realm: "Secure Area".into(),
    });
    let server = ApiServer::builder(config).routes(ok_routes()).build().unwrap();
    let addr = common::start(&server).await;
    let client = common::client();

    let denied = client.get(common::url(addr, "/foo")).send().await.unwrap();
    assert_eq!(denied.status(), 401);
    assert_eq!(denied.headers()["www-authenticate"], "Basic realm=\"Secure Area\"");
    let body: Value = denied.json().await.unwrap();
    assert_eq!(body["statusCode"], 401);

    let admitted = client
        .get(common::url(addr, "/foo"))
        .basic_auth("admin", Some("secret"))
        .send()
        .await
        .unwrap();
    assert_eq!(admitted.status(), 200);

    server.close().await.unwrap();
}

#[tokio::test]
async fn panic_is_normalized_and_server_keeps_serving() {
    let server = ApiServer::builder(common::base_config())
        .routes(ok_routes())
        .build()
        .unwrap();
    let addr = common::start(&server).await;
    let client = common::client();

    let response = client.get(common::url(addr, "/panic")).send().await.unwrap();
    assert_eq!(response.status(), 500);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["statusCode"], 500);
    assert_eq!(body["message"], "Internal Server Error");

    let response = client.get(common::url(addr, "/foo")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    server.close().await.unwrap();
}

#[tokio::test]
async fn unknown_route_and_malformed_body() {
    let server = ApiServer::builder(common::base_config())
        .routes(ok_routes())
        .build()
        .unwrap();
    let addr = common::start(&server).await;
    let client = common::client();

    let response = client.get(common::url(addr, "/nope")).send().await.unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"], "Not Found");

    let response = client
        .post(common::url(addr, "/echo"))
        .header("content-type", "application/json")
        .body("{broken")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    let response = client
        .post(common::url(addr, "/echo?pretty"))
        .json(&json!({ "a": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "{\n  \"a\": 1\n}");

    server.close().await.unwrap();
}

#[tokio::test]
async fn hooks_and_extensions_reach_handlers() {
    #[derive(Clone)]
    struct Greeting(&'static str);

    async fn stamp(request: axum::http::Request<axum::body::Body>, next: Next) -> Response {
        let mut response = next.run(request).await;
        response.headers_mut().insert("x-hooked", "yes".parse().unwrap());
        response
    }

    let routes = Router::new().route(
        "/greet",
        get(|Extension(g): Extension<Greeting>| async move { g.0 }),
    );
    let server = ApiServer::builder(common::base_config())
        .routes(routes)
        .extension(Greeting("hi"))
        .hook_before_setup(|b| {
            b.push(Stage::custom("stamp", |r: Router| r.layer(middleware::from_fn(stamp))));
        })
        .build()
        .unwrap();
    assert!(server.pipeline().stage_names().contains(&"stamp"));

    let addr = common::start(&server).await;
    let response = common::client().get(common::url(addr, "/greet")).send().await.unwrap();
    assert_eq!(response.headers()["x-hooked"], "yes");
    assert_eq!(response.text().await.unwrap(), "hi");

    server.close().await.unwrap();
}

struct HeaderSession;

#[async_trait]
impl SessionInitializer for HeaderSession {
    async fn initialize(&self, parts: &mut Parts) -> Result<(), ApiError> {
        if let Some(id) = parts.headers.get("x-user").and_then(|v| v.to_str().ok()) {
            let user = AuthenticatedUser { id: id.to_string() };
            parts.extensions.insert(user);
        }
        Ok(())
    }
}

struct BrokenIpStore {
    calls: AtomicUsize,
}

#[async_trait]
impl IpAddressStore for BrokenIpStore {
    async fn store(&self, _: &str, _: IpAddr) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("database offline".into()))
    }
}

#[tokio::test]
async fn ip_store_failure_does_not_affect_response() {
    let ip_store = Arc::new(BrokenIpStore {
        calls: AtomicUsize::new(0),
    });
    let server = ApiServer::builder(common::base_config())
        .routes(ok_routes())
        .session(Arc::new(HeaderSession))
        .ip_store(ip_store.clone())
        .build()
        .unwrap();
    let addr = common::start(&server).await;

    let response = common::client()
        .get(common::url(addr, "/foo"))
        .header("x-user", "user-1")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "foo");

    for _ in 0..50 {
        if ip_store.calls.load(Ordering::SeqCst) > 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(ip_store.calls.load(Ordering::SeqCst), 1);

    server.close().await.unwrap();
}
