//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request entering the guarded part of the pipeline:
//!     → timeouts.rs (race downstream stages against the deadline)
//!     → On expiry: drop downstream work, emit 504 through the error channel
//! ```

pub mod timeouts;
