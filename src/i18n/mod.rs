//! Localization context.
//!
//! The server only decides *which* locale a request is in; string lookup
//! belongs to a [`Translator`] supplied by the integrator.
//!
//! # Resolution order
//! 1. `?locale=xx` query parameter
//! 2. `Accept-Language`, highest quality first
//! 3. the configured default
//!
//! Only configured locales are ever selected.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};

use crate::config::I18nConfig;

/// String lookup collaborator.
pub trait Translator: Send + Sync {
    /// Translation of `key` in `locale`, if one exists.
    fn translate(&self, key: &str, locale: &str) -> Option<String>;
}

/// Locale chosen for the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale(pub String);

/// Locale resolution plus the optional translator.
pub struct Localizer {
    locales: Vec<String>,
    default_locale: String,
    query_param: String,
    translator: Option<Arc<dyn Translator>>,
}

impl Localizer {
    pub fn new(config: &I18nConfig, translator: Option<Arc<dyn Translator>>) -> Self {
        Self {
            locales: config.locales.iter().map(|l| l.to_ascii_lowercase()).collect(),
            default_locale: config.default_locale.to_ascii_lowercase(),
            query_param: config.query_param.clone(),
            translator,
        }
    }

    fn supported(&self, candidate: &str) -> Option<String> {
        let candidate = candidate.trim().to_ascii_lowercase();
        if candidate.is_empty() {
            return None;
        }
        if self.locales.contains(&candidate) {
            return Some(candidate);
        }
        // `en-US` falls back to `en`
        let primary = candidate.split(['-', '_']).next()?;
        self.locales.iter().find(|l| *l == primary).cloned()
    }

    pub fn resolve(&self, query: Option<&str>, headers: &HeaderMap) -> String {
        if let Some(query) = query {
            let requested = url::form_urlencoded::parse(query.as_bytes())
                .find(|(k, _)| k == self.query_param.as_str())
                .and_then(|(_, v)| self.supported(&v));
            if let Some(locale) = requested {
                return locale;
            }
        }

        if let Some(accept) = headers
            .get(header::ACCEPT_LANGUAGE)
            .and_then(|v| v.to_str().ok())
        {
            let mut ranked: Vec<(f32, &str)> = accept
                .split(',')
                .filter_map(|entry| {
                    let mut pieces = entry.split(';');
                    let tag = pieces.next()?.trim();
                    let q = pieces
                        .find_map(|p| p.trim().strip_prefix("q="))
                        .and_then(|q| q.parse::<f32>().ok())
                        .unwrap_or(1.0);
                    Some((q, tag))
                })
                .collect();
            ranked.sort_by(|a, b| b.0.total_cmp(&a.0));

            if let Some(locale) = ranked
                .into_iter()
                .filter(|(q, _)| *q > 0.0)
                .find_map(|(_, tag)| self.supported(tag))
            {
                return locale;
            }
        }

        self.default_locale.clone()
    }

    pub fn translate(&self, key: &str, locale: &str) -> Option<String> {
        self.translator.as_ref()?.translate(key, locale)
    }
}

/// Attach the request's [`Locale`] and advertise it in `Content-Language`.
pub async fn locale_middleware(
    State(localizer): State<Arc<Localizer>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let locale = localizer.resolve(request.uri().query(), request.headers());
    request.extensions_mut().insert(Locale(locale.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&locale) {
        response
            .headers_mut()
            .entry(header::CONTENT_LANGUAGE)
            .or_insert(value);
    }
    response
}
