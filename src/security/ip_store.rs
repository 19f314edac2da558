//! Client IP persistence for authenticated users.
//!
//! The stage never waits on the store. Records go through a bounded queue
//! to a background worker; a full queue or a failing store is logged and
//! counted, and the response is unaffected.

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::config::ConfigError;
use crate::http::request::RequestContext;
use crate::observability::metrics;
use crate::security::auth::AuthenticatedUser;
use crate::security::store::StoreError;

/// Persistence collaborator for the last IP seen per user.
#[async_trait]
pub trait IpAddressStore: Send + Sync {
    async fn store(&self, user_id: &str, ip: IpAddr) -> Result<(), StoreError>;
}

#[derive(Debug)]
struct IpRecord {
    user_id: String,
    ip: IpAddr,
}

/// Handle to the background writer.
#[derive(Clone)]
pub struct IpRecorder {
    tx: mpsc::Sender<IpRecord>,
    last_seen: Arc<DashMap<String, IpAddr>>,
}

impl IpRecorder {
    /// Start the worker on the current Tokio runtime.
    pub fn spawn(store: Arc<dyn IpAddressStore>, capacity: usize) -> Result<Self, ConfigError> {
        let handle = Handle::try_current().map_err(|_| ConfigError::NoRuntime("store_ip_address"))?;
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let last_seen = Arc::new(DashMap::new());

        handle.spawn(run_worker(store, rx, last_seen.clone()));
        Ok(Self { tx, last_seen })
    }

    /// Queue a write unless `ip` is already the last one stored for the user.
    pub fn record(&self, user_id: &str, ip: IpAddr) {
        if self.last_seen.get(user_id).is_some_and(|seen| *seen == ip) {
            return;
        }

        let record = IpRecord {
            user_id: user_id.to_string(),
            ip,
        };
        match self.tx.try_send(record) {
            Ok(()) => {}
            Err(TrySendError::Full(record)) => {
                metrics::record_ip_store_error();
                tracing::warn!(user_id = %record.user_id, "IP store queue full, dropping write");
            }
            Err(TrySendError::Closed(_)) => {
                metrics::record_ip_store_error();
                tracing::error!("IP store worker has stopped");
            }
        }
    }
}

async fn run_worker(
    store: Arc<dyn IpAddressStore>,
    mut rx: mpsc::Receiver<IpRecord>,
    last_seen: Arc<DashMap<String, IpAddr>>,
) {
    while let Some(IpRecord { user_id, ip }) = rx.recv().await {
        if last_seen.get(&user_id).is_some_and(|seen| *seen == ip) {
            continue;
        }
        match store.store(&user_id, ip).await {
            Ok(()) => {
                last_seen.insert(user_id, ip);
            }
            Err(e) => {
                metrics::record_ip_store_error();
                tracing::warn!(user_id = %user_id, ip = %ip, error = %e, "Failed to store IP address");
            }
        }
    }
    tracing::debug!("IP store worker exiting");
}

/// Hand the client IP of an authenticated request to the recorder.
pub async fn store_ip_address(
    State(recorder): State<IpRecorder>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(user) = request.extensions().get::<AuthenticatedUser>() {
        let ip = RequestContext::client_ip_of(request.extensions());
        recorder.record(&user.id, ip);
    }
    next.run(request).await
}
