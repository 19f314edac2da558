//! Request pipeline assembly.
//!
//! # Data Flow
//! ```text
//! ApiConfig + Collaborators
//!     → Pipeline::build (stage inclusion decided once)
//!     → Pipeline::wrap(routes) (stages applied innermost first)
//!     → axum Router served by http::server
//! ```
//!
//! # Stage order (outermost first)
//! ```text
//! request_received → extensions → request_id → response_time → logging
//! → error_normalization → panic_recovery → timeout
//! → [before-setup hooks] → basic_auth → rate_limit → trailing_slash
//! → locale → conditional_get → cors → security_headers → body_parser
//! → pretty_json → session → ip_address → not_found
//! → [before-routes hooks] → routes
//! ```
//!
//! # Design Decisions
//! - Relative order is fixed; configuration only removes stages
//! - Errors are rendered by `error_normalization`, which sits inside the
//!   logging span and outside the timeout guard, so timeouts and panics
//!   get the same envelope as every other failure
//! - Hooks receive the [`PipelineBuilder`] and may push [`Stage::custom`]
//!   stages at their fixed positions

mod builder;
mod stage;

pub use builder::{Collaborators, Hook, Pipeline, PipelineBuilder};
pub use stage::{Apply, Stage, StageKind};
