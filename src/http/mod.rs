//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (listener, pipeline-wrapped router)
//!     → request.rs (context, request ID, response time)
//!     → redirect.rs, conditional.rs, body.rs, json.rs (pipeline stages)
//!     → integrator routes
//!     → response.rs (error envelope, 404 and panic handling)
//!     → Send to client
//! ```

pub mod body;
pub mod conditional;
pub mod json;
pub mod redirect;
pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestContext, RequestIdExt, X_REQUEST_ID, X_RESPONSE_TIME};
pub use response::{ApiError, ErrorEnvelope};
pub use server::{ApiBuilder, ApiServer, Routes, ServerError};
