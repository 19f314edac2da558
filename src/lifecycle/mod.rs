//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Binary:
//!     Load config → Validate → Build server → listen()
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → close() → drain in-flight requests → exit
//! ```
//!
//! # Design Decisions
//! - The library never installs signal handlers; the binary decides
//! - Graceful close is bounded by `server.shutdown_grace_ms` when set

pub mod signals;
