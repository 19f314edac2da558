//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use api_bootstrap::config::ApiConfig;
use api_bootstrap::security::store::{CounterSnapshot, CounterStore, MemoryCounterStore, StoreError};
use api_bootstrap::ApiServer;
use async_trait::async_trait;

/// Defaults with the guard disabled and the body parser on.
pub fn base_config() -> ApiConfig {
    let mut config = ApiConfig::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = 0;
    config
}

/// Listen on an ephemeral loopback port.
pub async fn start(server: &ApiServer) -> SocketAddr {
    server
        .listen(Some(0), Some("127.0.0.1"))
        .await
        .expect("server should start")
}

/// HTTP client that reports redirects instead of following them.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

pub fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

/// In-memory store that counts how often it is asked to increment.
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryCounterStore,
    calls: AtomicUsize,
}

impl CountingStore {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CounterStore for CountingStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<CounterSnapshot, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.increment(key, window).await
    }
}

/// Store that is always unreachable.
pub struct DownStore;

#[async_trait]
impl CounterStore for DownStore {
    async fn increment(&self, _: &str, _: Duration) -> Result<CounterSnapshot, StoreError> {
        Err(StoreError::Unavailable("connection refused".into()))
    }
}

pub fn counting_store() -> Arc<CountingStore> {
    Arc::new(CountingStore::default())
}
