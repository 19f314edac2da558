//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the API server.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the API server.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ApiConfig {
    /// Listener configuration (protocol, bind host/port, TLS).
    pub server: ServerConfig,

    /// Honor `X-Forwarded-For` when identifying clients.
    pub trust_proxy: bool,

    /// Per-request deadline in milliseconds. `0` disables the timeout guard.
    pub timeout_ms: u64,

    /// Rate limiting configuration. `None` disables the stage.
    pub rate_limit: Option<RateLimitConfig>,

    /// Request body parsing.
    pub body_parser: BodyParserConfig,

    /// Basic-auth credentials. `None` disables the stage.
    pub auth: Option<BasicAuthConfig>,

    /// CORS policy. `None` disables the stage.
    pub cors: Option<CorsConfig>,

    /// Localization. `None` disables the stage.
    pub i18n: Option<I18nConfig>,

    /// Add common security response headers.
    pub security_headers: bool,

    /// JSON pretty printing.
    pub pretty_json: PrettyJsonConfig,

    /// Background persistence of client IP addresses.
    pub store_ip_address: Option<StoreIpConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Wire protocol served by the listener.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Http,
    Https,
}

impl Protocol {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "http" => Some(Protocol::Http),
            "https" => Some(Protocol::Https),
            _ => None,
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub protocol: Protocol,

    /// Bind host (e.g., "0.0.0.0").
    pub host: String,

    /// Bind port. `0` picks an ephemeral port.
    pub port: u16,

    /// TLS material, required when `protocol = "https"`.
    pub ssl: Option<SslConfig>,

    /// Upper bound on how long `close()` waits for in-flight requests.
    /// Unset means wait for all of them.
    pub shutdown_grace_ms: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Http,
            host: "0.0.0.0".to_string(),
            port: 4000,
            ssl: None,
            shutdown_grace_ms: None,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SslConfig {
    /// Path to private key file (PEM).
    pub key: Option<String>,

    /// Path to certificate file (PEM).
    pub cert: Option<String>,

    /// Path to intermediate CA bundle (PEM), appended to the served chain.
    pub ca: Option<String>,
}

/// What the rate limiter counts requests against.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(tag = "by", rename_all = "lowercase")]
pub enum KeyBy {
    /// Client IP (honoring `trust_proxy`).
    #[default]
    Ip,
    /// Value of a request header, falling back to the client IP.
    Header { name: String },
}

/// What to do when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreFailurePolicy {
    /// Admit the request and log the outage.
    #[default]
    FailOpen,
    /// Reject the request with 503.
    FailClosed,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Fixed window length in milliseconds.
    pub window_ms: u64,

    /// Maximum requests per key per window.
    pub max: u64,

    /// Key derivation strategy.
    pub key_by: KeyBy,

    /// Namespace prepended to every counter key.
    pub prefix: String,

    /// Path globs that bypass rate limiting entirely.
    pub ignored_globs: Vec<String>,

    /// Behavior while the counter store is unavailable.
    pub on_store_error: StoreFailurePolicy,

    /// Emit `X-RateLimit-*` headers.
    pub headers: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 60 * 60 * 1000,
            max: 1000,
            key_by: KeyBy::Ip,
            prefix: "limit".to_string(),
            ignored_globs: Vec::new(),
            on_store_error: StoreFailurePolicy::FailOpen,
            headers: true,
        }
    }
}

/// Body parser configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BodyParserConfig {
    pub enabled: bool,

    /// Path globs whose bodies are left untouched.
    pub ignored_globs: Vec<String>,

    /// Maximum JSON body size in bytes.
    pub json_limit: usize,

    /// Maximum url-encoded form body size in bytes.
    pub form_limit: usize,

    /// Maximum text body size in bytes.
    pub text_limit: usize,
}

impl Default for BodyParserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ignored_globs: Vec::new(),
            json_limit: 1024 * 1024,
            form_limit: 56 * 1024,
            text_limit: 1024 * 1024,
        }
    }
}

/// Basic-auth credentials.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BasicAuthConfig {
    pub name: String,
    pub pass: String,

    #[serde(default = "default_realm")]
    pub realm: String,
}

fn default_realm() -> String {
    "Secure Area".to_string()
}

/// CORS policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins. Empty means any origin.
    pub origins: Vec<String>,

    pub allow_credentials: bool,

    /// Preflight cache lifetime in seconds.
    pub max_age_secs: Option<u64>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: Vec::new(),
            allow_credentials: false,
            max_age_secs: None,
        }
    }
}

/// Localization configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct I18nConfig {
    pub locales: Vec<String>,
    pub default_locale: String,

    /// Query parameter that overrides `Accept-Language`.
    pub query_param: String,
}

impl Default for I18nConfig {
    fn default() -> Self {
        Self {
            locales: vec!["en".to_string()],
            default_locale: "en".to_string(),
            query_param: "locale".to_string(),
        }
    }
}

/// JSON pretty-printing configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PrettyJsonConfig {
    /// Pretty print every JSON response.
    pub enabled: bool,

    /// Query parameter that turns pretty printing on for one request.
    pub param: Option<String>,
}

impl Default for PrettyJsonConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            param: Some("pretty".to_string()),
        }
    }
}

/// IP persistence worker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreIpConfig {
    /// Pending writes kept before new ones are dropped.
    pub queue_capacity: usize,
}

impl Default for StoreIpConfig {
    fn default() -> Self {
        Self { queue_capacity: 1024 }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
