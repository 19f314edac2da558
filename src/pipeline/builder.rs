use std::sync::Arc;
use std::time::Duration;

use axum::{middleware, Router};
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::config::{ApiConfig, ConfigError, I18nConfig, Protocol};
use crate::http::{body, conditional, json, redirect, request, response};
use crate::i18n::{self, Localizer, Translator};
use crate::observability::logging;
use crate::resilience::timeouts::{timeout_middleware, TimeoutGuard};
use crate::security::auth::{self, BasicAuthState, SessionInitializer};
use crate::security::headers;
use crate::security::ip_store::{self, IpAddressStore, IpRecorder};
use crate::security::rate_limit::{self, KeyFn, RateLimitState};
use crate::security::store::{CounterStore, MemoryCounterStore};

use super::stage::{Stage, StageKind};

/// Extension callback run while the pipeline is being assembled.
pub type Hook = Arc<dyn Fn(&mut PipelineBuilder) + Send + Sync>;

/// Collaborator instances that do not belong in the serializable config.
#[derive(Clone, Default)]
pub struct Collaborators {
    /// Counter store for rate limiting. An in-memory store is used when
    /// rate limiting is configured without one.
    pub counter_store: Option<Arc<dyn CounterStore>>,
    pub key_fn: Option<KeyFn>,
    pub ip_store: Option<Arc<dyn IpAddressStore>>,
    pub session: Option<Arc<dyn SessionInitializer>>,
    pub translator: Option<Arc<dyn Translator>>,
    pub before_setup: Vec<Hook>,
    pub before_routes: Vec<Hook>,
    /// Typed values attached to every request.
    pub extensions: Vec<Stage>,
}

/// In-progress stage list, outermost first.
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage after everything pushed so far.
    pub fn push(&mut self, stage: Stage) -> &mut Self {
        self.stages.push(stage);
        self
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(Stage::name).collect()
    }

    pub fn finish(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }

    fn builtin<F>(&mut self, kind: StageKind, apply: F)
    where
        F: Fn(Router) -> Router + Send + Sync + 'static,
    {
        self.stages.push(Stage::builtin(kind, apply));
    }

    fn run_hooks(&mut self, hooks: &[Hook]) {
        for hook in hooks {
            hook(self);
        }
    }
}

/// The ordered, immutable stage list.
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// Decide which stages run and in what order.
    ///
    /// Inclusion is evaluated here, once. Per-request decisions (ignored
    /// paths, locale, auth) are made by the stages themselves.
    pub fn build(config: &ApiConfig, collaborators: &Collaborators) -> Result<Self, ConfigError> {
        let mut builder = PipelineBuilder::new();

        let received = request::ReceivedState {
            trust_proxy: config.trust_proxy,
        };
        builder.builtin(StageKind::RequestReceived, move |r| {
            r.layer(middleware::from_fn_with_state(received, request::request_received))
        });

        if !collaborators.extensions.is_empty() {
            let extensions = collaborators.extensions.clone();
            builder.builtin(StageKind::Extensions, move |r| {
                extensions.iter().rev().fold(r, |r, stage| stage.apply(r))
            });
        }

        builder.builtin(StageKind::RequestId, |r| {
            r.layer(PropagateRequestIdLayer::x_request_id())
                .layer(SetRequestIdLayer::x_request_id(request::MakeRequestUuid))
        });

        builder.builtin(StageKind::ResponseTime, |r| {
            r.layer(middleware::from_fn(request::response_time))
        });

        builder.builtin(StageKind::Logging, |r| {
            r.layer(TraceLayer::new_for_http().make_span_with(logging::request_span))
        });

        builder.builtin(StageKind::ErrorNormalization, |r| {
            r.layer(middleware::from_fn(response::normalize_errors))
        });

        builder.builtin(StageKind::PanicRecovery, |r| {
            r.layer(CatchPanicLayer::custom(response::panic_response))
        });

        // a translator alone enables localization with the default locales
        let localizer = match (&config.i18n, &collaborators.translator) {
            (Some(i18n), translator) => Some(Arc::new(Localizer::new(i18n, translator.clone()))),
            (None, Some(translator)) => Some(Arc::new(Localizer::new(
                &I18nConfig::default(),
                Some(translator.clone()),
            ))),
            (None, None) => None,
        };

        let mut guard = TimeoutGuard::new(Duration::from_millis(config.timeout_ms));
        if guard.is_enabled() {
            if let Some(localizer) = &localizer {
                guard = guard.with_localizer(localizer.clone());
            }
            builder.builtin(StageKind::Timeout, move |r| {
                r.layer(middleware::from_fn_with_state(guard.clone(), timeout_middleware))
            });
        }

        builder.run_hooks(&collaborators.before_setup);

        if let Some(auth) = &config.auth {
            let state = BasicAuthState::new(auth);
            builder.builtin(StageKind::BasicAuth, move |r| {
                r.layer(middleware::from_fn_with_state(state.clone(), auth::basic_auth))
            });
        }

        if let Some(limits) = &config.rate_limit {
            let store = collaborators
                .counter_store
                .clone()
                .unwrap_or_else(|| Arc::new(MemoryCounterStore::new()));
            let state = RateLimitState::new(limits, store, collaborators.key_fn.clone())?;
            builder.builtin(StageKind::RateLimit, move |r| {
                r.layer(middleware::from_fn_with_state(
                    state.clone(),
                    rate_limit::rate_limit_middleware,
                ))
            });
        }

        builder.builtin(StageKind::TrailingSlash, |r| {
            r.layer(middleware::from_fn(redirect::remove_trailing_slash))
        });

        if let Some(localizer) = localizer {
            builder.builtin(StageKind::Locale, move |r| {
                r.layer(middleware::from_fn_with_state(
                    localizer.clone(),
                    i18n::locale_middleware,
                ))
            });
        }

        builder.builtin(StageKind::ConditionalGet, |r| {
            r.layer(middleware::from_fn(conditional::conditional_get))
        });

        if let Some(cors) = &config.cors {
            let layer = headers::cors_layer(cors)?;
            builder.builtin(StageKind::Cors, move |r| r.layer(layer.clone()));
        }

        if config.security_headers {
            let https = config.server.protocol == Protocol::Https;
            builder.builtin(StageKind::SecurityHeaders, move |r| {
                headers::apply_security_headers(r, https)
            });
        }

        if config.body_parser.enabled {
            let state = body::BodyParserState::new(&config.body_parser)?;
            builder.builtin(StageKind::BodyParser, move |r| {
                r.layer(middleware::from_fn_with_state(state.clone(), body::parse_body))
            });
        }

        let pretty = json::PrettyJsonState::new(&config.pretty_json);
        builder.builtin(StageKind::PrettyJson, move |r| {
            r.layer(middleware::from_fn_with_state(pretty.clone(), json::pretty_json))
        });

        if let Some(session) = &collaborators.session {
            let session = session.clone();
            builder.builtin(StageKind::Session, move |r| {
                r.layer(middleware::from_fn_with_state(
                    session.clone(),
                    auth::session_middleware,
                ))
            });
        }

        if let Some(store) = &collaborators.ip_store {
            let capacity = config
                .store_ip_address
                .clone()
                .unwrap_or_default()
                .queue_capacity;
            let recorder = IpRecorder::spawn(store.clone(), capacity)?;
            builder.builtin(StageKind::IpAddress, move |r| {
                r.layer(middleware::from_fn_with_state(
                    recorder.clone(),
                    ip_store::store_ip_address,
                ))
            });
        }

        builder.builtin(StageKind::NotFound, |r| {
            r.layer(middleware::from_fn(response::not_found_fallback))
        });

        builder.run_hooks(&collaborators.before_routes);

        Ok(builder.finish())
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(Stage::name).collect()
    }

    pub fn contains(&self, kind: StageKind) -> bool {
        self.stages.iter().any(|s| s.kind() == kind)
    }

    /// Wrap `routes` so the first stage sees each request first.
    pub fn wrap(&self, routes: Router) -> Router {
        self.stages
            .iter()
            .rev()
            .fold(routes, |router, stage| stage.apply(router))
    }
}
