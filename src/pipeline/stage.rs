use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use axum::Router;

/// Function that wraps a router with one stage's layers.
pub type Apply = Arc<dyn Fn(Router) -> Router + Send + Sync>;

/// What a stage does. Positions are fixed by [`super::Pipeline::build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    RequestReceived,
    Extensions,
    RequestId,
    ResponseTime,
    Logging,
    ErrorNormalization,
    PanicRecovery,
    Timeout,
    BasicAuth,
    RateLimit,
    TrailingSlash,
    Locale,
    ConditionalGet,
    Cors,
    SecurityHeaders,
    BodyParser,
    PrettyJson,
    Session,
    IpAddress,
    NotFound,
    /// Supplied by a hook.
    Custom,
}

impl StageKind {
    pub fn name(self) -> &'static str {
        match self {
            StageKind::RequestReceived => "request_received",
            StageKind::Extensions => "extensions",
            StageKind::RequestId => "request_id",
            StageKind::ResponseTime => "response_time",
            StageKind::Logging => "logging",
            StageKind::ErrorNormalization => "error_normalization",
            StageKind::PanicRecovery => "panic_recovery",
            StageKind::Timeout => "timeout",
            StageKind::BasicAuth => "basic_auth",
            StageKind::RateLimit => "rate_limit",
            StageKind::TrailingSlash => "trailing_slash",
            StageKind::Locale => "locale",
            StageKind::ConditionalGet => "conditional_get",
            StageKind::Cors => "cors",
            StageKind::SecurityHeaders => "security_headers",
            StageKind::BodyParser => "body_parser",
            StageKind::PrettyJson => "pretty_json",
            StageKind::Session => "session",
            StageKind::IpAddress => "ip_address",
            StageKind::NotFound => "not_found",
            StageKind::Custom => "custom",
        }
    }
}

/// A named unit of request processing.
#[derive(Clone)]
pub struct Stage {
    kind: StageKind,
    name: Cow<'static, str>,
    apply: Apply,
}

impl Stage {
    pub(crate) fn builtin<F>(kind: StageKind, apply: F) -> Self
    where
        F: Fn(Router) -> Router + Send + Sync + 'static,
    {
        Self {
            kind,
            name: Cow::Borrowed(kind.name()),
            apply: Arc::new(apply),
        }
    }

    /// A hook-supplied stage. `apply` receives the router built so far
    /// (everything downstream) and returns it wrapped.
    pub fn custom<F>(name: impl Into<Cow<'static, str>>, apply: F) -> Self
    where
        F: Fn(Router) -> Router + Send + Sync + 'static,
    {
        Self {
            kind: StageKind::Custom,
            name: name.into(),
            apply: Arc::new(apply),
        }
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn apply(&self, router: Router) -> Router {
        (self.apply)(router)
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("kind", &self.kind)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
