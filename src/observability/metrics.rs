//! Metrics collection and exposition.
//!
//! # Metrics
//! - `api_requests_total` (counter): responses by status code
//! - `api_request_duration_seconds` (histogram): time from arrival to response
//! - `api_timeouts_total` (counter): requests cut off by the timeout guard
//! - `api_rate_limited_total` (counter): requests rejected by the limiter
//! - `api_counter_store_errors_total` (counter): rate-limit store failures
//! - `api_ip_store_errors_total` (counter): dropped or failed IP writes
//!
//! Without an installed recorder every call here is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape listener.
///
/// Must be called from inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_status(status: u16) {
    counter!("api_requests_total", "status" => status.to_string()).increment(1);
}

pub fn record_duration(elapsed: Duration) {
    histogram!("api_request_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_timeout() {
    counter!("api_timeouts_total").increment(1);
}

pub fn record_rate_limited(reason: &'static str) {
    counter!("api_rate_limited_total", "reason" => reason).increment(1);
}

pub fn record_counter_store_error() {
    counter!("api_counter_store_errors_total").increment(1);
}

pub fn record_ip_store_error() {
    counter!("api_ip_store_errors_total").increment(1);
}
