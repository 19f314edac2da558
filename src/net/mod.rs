//! Network layer.
//!
//! # Data Flow
//! ```text
//! listen():
//!     → listener.rs (resolve host, bind synchronously, report AddrInUse)
//!     → tls.rs (validate PEM material, build rustls config) when https
//!     → hand the socket to axum-server
//! ```
//!
//! # Design Decisions
//! - Binding happens before the serve task is spawned, so bind errors
//!   surface from `listen()` instead of a background task
//! - TLS material is validated before the socket is bound

pub mod listener;
pub mod tls;
