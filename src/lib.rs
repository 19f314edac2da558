//! Bootstrap for JSON API servers.
//!
//! Wraps an integrator-supplied [`axum::Router`] in a fixed pipeline of
//! stages (request context, logging, error normalization, timeout, auth,
//! rate limiting, body parsing and friends) and manages the listener.
//!
//! ```no_run
//! use api_bootstrap::{ApiConfig, ApiServer};
//! use axum::{routing::get, Router};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let server = ApiServer::builder(ApiConfig::default())
//!     .routes(Router::new().route("/", get(|| async { "hello" })))
//!     .build()?;
//! let addr = server.listen(Some(0), Some("127.0.0.1")).await?;
//! println!("listening on {addr}");
//! server.close().await?;
//! # Ok(())
//! # }
//! ```

// Core subsystems
pub mod config;
pub mod http;
pub mod net;
pub mod pipeline;

// Cross-cutting concerns
pub mod i18n;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;

pub use config::schema::ApiConfig;
pub use http::{ApiBuilder, ApiError, ApiServer, ServerError};
pub use pipeline::{Pipeline, PipelineBuilder, Stage, StageKind};
