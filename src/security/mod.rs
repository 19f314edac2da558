//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → auth.rs (basic auth challenge)
//!     → rate_limit.rs (fixed-window quota per key, store in store/)
//!     → headers.rs (CORS, security response headers)
//!     → auth.rs (session collaborator)
//!     → ip_store.rs (queue client IP for the authenticated user)
//!     → Pass to routing
//! ```
//!
//! # Design Decisions
//! - Ignored paths (paths.rs) are compiled once and matched per request
//! - Store outages follow an explicit fail-open or fail-closed policy

pub mod auth;
pub mod headers;
pub mod ip_store;
pub mod paths;
pub mod rate_limit;
pub mod store;
