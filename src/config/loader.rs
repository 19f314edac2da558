//! Configuration loading.
//!
//! Resolution runs once at startup: built-in defaults, then environment
//! defaults, then the TOML file. Nothing reads the environment afterwards.

use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::config::schema::{ApiConfig, Protocol, RateLimitConfig, SslConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value `{value}` for environment variable {name}")]
    Env { name: &'static str, value: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),

    #[error("{0} requires a running Tokio runtime")]
    NoRuntime(&'static str),

    #[error("invalid glob pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error("invalid header value: {0}")]
    Header(#[from] axum::http::header::InvalidHeaderValue),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file, on top of process
/// environment defaults.
pub fn load_config(path: &Path) -> Result<ApiConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let base = resolve_env(ApiConfig::default(), |name| std::env::var(name).ok())?;
    let config = merge_toml(base, &content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Defaults plus process environment, validated. Used when no file is given.
pub fn from_env() -> Result<ApiConfig, ConfigError> {
    let config = resolve_env(ApiConfig::default(), |name| std::env::var(name).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Apply environment defaults to `config` using `lookup` to read variables.
pub fn resolve_env<F>(mut config: ApiConfig, lookup: F) -> Result<ApiConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup("API_PROTOCOL") {
        config.server.protocol = Protocol::parse(&value).ok_or(ConfigError::Env {
            name: "API_PROTOCOL",
            value,
        })?;
    }
    if let Some(value) = lookup("API_HOST") {
        config.server.host = value;
    }
    if let Some(value) = lookup("API_PORT") {
        config.server.port = parse_env("API_PORT", value)?;
    }
    if let Some(value) = lookup("TRUST_PROXY") {
        config.trust_proxy = parse_bool("TRUST_PROXY", value)?;
    }
    if let Some(value) = lookup("API_TIMEOUT_MS") {
        config.timeout_ms = parse_env("API_TIMEOUT_MS", value)?;
    }

    let max = lookup("API_RATELIMIT_MAX");
    let window = lookup("API_RATELIMIT_WINDOW_MS");
    if max.is_some() || window.is_some() {
        let rl = config.rate_limit.get_or_insert_with(RateLimitConfig::default);
        if let Some(value) = max {
            rl.max = parse_env("API_RATELIMIT_MAX", value)?;
        }
        if let Some(value) = window {
            rl.window_ms = parse_env("API_RATELIMIT_WINDOW_MS", value)?;
        }
    }

    let key = lookup("API_SSL_KEY_PATH");
    let cert = lookup("API_SSL_CERT_PATH");
    let ca = lookup("API_SSL_CA_PATH");
    if key.is_some() || cert.is_some() || ca.is_some() {
        let ssl = config.server.ssl.get_or_insert_with(SslConfig::default);
        ssl.key = key.or(ssl.key.take());
        ssl.cert = cert.or(ssl.cert.take());
        ssl.ca = ca.or(ssl.ca.take());
    }

    Ok(config)
}

/// Overlay a TOML document on an already-resolved configuration.
///
/// Only keys present in the document replace values from `base`.
pub fn merge_toml(base: ApiConfig, content: &str) -> Result<ApiConfig, ConfigError> {
    let overrides: toml::Table = toml::from_str(content)?;
    let mut merged = match toml::Value::try_from(&base)? {
        toml::Value::Table(table) => table,
        _ => toml::Table::new(),
    };
    deep_merge(&mut merged, overrides);
    Ok(toml::Value::Table(merged).try_into()?)
}

fn deep_merge(target: &mut toml::Table, overrides: toml::Table) {
    for (key, value) in overrides {
        match (target.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                target.insert(key, value);
            }
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Env { name, value })
}

fn parse_bool(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::Env { name, value }),
    }
}
