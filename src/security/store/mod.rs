//! Counter storage for fixed-window rate limiting.
//!
//! # Design Decisions
//! - The only operation is an atomic increment that also reports the
//!   remaining window. There is deliberately no get/set pair, so callers
//!   cannot build a racy read-modify-write on top of it.
//! - The first increment of a window starts the window; later increments in
//!   the same window never extend it.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
#[cfg(feature = "redis")]
pub mod redis;

pub use memory::MemoryCounterStore;
#[cfg(feature = "redis")]
pub use self::redis::RedisCounterStore;

/// State of a counter right after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterSnapshot {
    /// Hits recorded in the current window, including this one.
    pub count: u64,
    /// Time until the current window expires.
    pub ttl: Duration,
}

/// Error returned by a counter store that could not serve a request.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    #[error("counter store returned an unexpected reply: {0}")]
    Protocol(String),
}

/// Shared key → counter-with-expiry storage.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Atomically increment `key`. If this is the first hit of a window,
    /// the key expires after `window`.
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterSnapshot, StoreError>;
}
