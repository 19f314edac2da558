//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! built-in defaults
//!     → loader.rs (environment defaults, read once)
//!     → loader.rs (TOML file overrides)
//!     → validation.rs (semantic checks)
//!     → ApiConfig (validated, immutable)
//!     → shared via Arc with every pipeline stage
//! ```
//!
//! # Design Decisions
//! - Config is immutable once the pipeline is built
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Collaborator instances (router, stores, hooks) live on `ApiBuilder`,
//!   not in the serializable schema

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::ConfigError;
pub use schema::ApiConfig;
pub use schema::BasicAuthConfig;
pub use schema::BodyParserConfig;
pub use schema::CorsConfig;
pub use schema::I18nConfig;
pub use schema::KeyBy;
pub use schema::Protocol;
pub use schema::RateLimitConfig;
pub use schema::ServerConfig;
pub use schema::SslConfig;
pub use schema::StoreFailurePolicy;
