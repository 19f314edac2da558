//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Require TLS material when serving https
//! - Validate value ranges (quota and window > 0)
//! - Reject glob patterns and CORS origins that cannot be compiled
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ApiConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use axum::http::HeaderValue;
use thiserror::Error;

use crate::config::schema::{ApiConfig, KeyBy, Protocol};
use crate::security::paths::compile_glob;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("https requires ssl.{0}")]
    MissingTlsMaterial(&'static str),

    #[error("rate_limit.max must be greater than zero")]
    ZeroQuota,

    #[error("rate_limit.window_ms must be greater than zero")]
    ZeroWindow,

    #[error("rate_limit.key_by header name must not be empty")]
    EmptyKeyHeader,

    #[error("invalid glob `{pattern}` in {field}: {reason}")]
    InvalidGlob {
        field: &'static str,
        pattern: String,
        reason: String,
    },

    #[error("invalid CORS origin `{0}`")]
    InvalidOrigin(String),

    #[error("i18n.default_locale `{0}` is not listed in i18n.locales")]
    UnknownDefaultLocale(String),

    #[error("store_ip_address.queue_capacity must be greater than zero")]
    ZeroQueueCapacity,
}

/// Validate a resolved configuration, collecting every problem found.
pub fn validate_config(config: &ApiConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.protocol == Protocol::Https {
        let ssl = config.server.ssl.clone().unwrap_or_default();
        if ssl.key.as_deref().map_or(true, str::is_empty) {
            errors.push(ValidationError::MissingTlsMaterial("key"));
        }
        if ssl.cert.as_deref().map_or(true, str::is_empty) {
            errors.push(ValidationError::MissingTlsMaterial("cert"));
        }
    }

    if let Some(rl) = &config.rate_limit {
        if rl.max == 0 {
            errors.push(ValidationError::ZeroQuota);
        }
        if rl.window_ms == 0 {
            errors.push(ValidationError::ZeroWindow);
        }
        if let KeyBy::Header { name } = &rl.key_by {
            if name.trim().is_empty() {
                errors.push(ValidationError::EmptyKeyHeader);
            }
        }
        check_globs("rate_limit.ignored_globs", &rl.ignored_globs, &mut errors);
    }

    check_globs(
        "body_parser.ignored_globs",
        &config.body_parser.ignored_globs,
        &mut errors,
    );

    if let Some(cors) = &config.cors {
        for origin in &cors.origins {
            if HeaderValue::from_str(origin).is_err() {
                errors.push(ValidationError::InvalidOrigin(origin.clone()));
            }
        }
    }

    if let Some(i18n) = &config.i18n {
        if !i18n.locales.iter().any(|l| l == &i18n.default_locale) {
            errors.push(ValidationError::UnknownDefaultLocale(
                i18n.default_locale.clone(),
            ));
        }
    }

    if let Some(ip) = &config.store_ip_address {
        if ip.queue_capacity == 0 {
            errors.push(ValidationError::ZeroQueueCapacity);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_globs(field: &'static str, patterns: &[String], errors: &mut Vec<ValidationError>) {
    for pattern in patterns {
        if let Err(e) = compile_glob(pattern) {
            errors.push(ValidationError::InvalidGlob {
                field,
                pattern: pattern.clone(),
                reason: e.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{RateLimitConfig, SslConfig};

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ApiConfig::default()).is_ok());
    }

    #[test]
    fn https_without_material_reports_both_fields() {
        let mut config = ApiConfig::default();
        config.server.protocol = Protocol::Https;
        config.server.ssl = Some(SslConfig::default());

        let errors = validate_config(&config).unwrap_err();
        assert!(errors.contains(&ValidationError::MissingTlsMaterial("key")));
        assert!(errors.contains(&ValidationError::MissingTlsMaterial("cert")));
    }

    #[test]
    fn collects_every_rate_limit_problem() {
        let mut config = ApiConfig::default();
        config.rate_limit = Some(RateLimitConfig {
            max: 0,
            window_ms: 0,
            ignored_globs: vec!["/a/[".into()],
            ..Default::default()
        });

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::ZeroQuota));
        assert!(errors.contains(&ValidationError::ZeroWindow));
        assert!(matches!(errors[2], ValidationError::InvalidGlob { field: "rate_limit.ignored_globs", .. }));
    }
}
