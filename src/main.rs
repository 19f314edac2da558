//! `api-bootstrap` binary.
//!
//! Loads configuration, installs logging and (optionally) the Prometheus
//! exporter, serves a health route and closes gracefully on SIGINT/SIGTERM.

use std::path::PathBuf;

use axum::{routing::get, Json, Router};
use clap::Parser;
use serde_json::json;

use api_bootstrap::config::loader;
use api_bootstrap::lifecycle::signals::shutdown_signal;
use api_bootstrap::observability::{logging, metrics};
use api_bootstrap::ApiServer;

#[derive(Parser)]
#[command(name = "api-bootstrap")]
#[command(about = "Run a bootstrap API server", long_about = None)]
struct Cli {
    /// TOML configuration file. Without it, defaults and environment apply.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured port.
    #[arg(short, long)]
    port: Option<u16>,

    /// Override the configured bind host.
    #[arg(long)]
    host: Option<String>,
}

fn routes() -> Router {
    Router::new().route(
        "/health",
        get(|| async { Json(json!({ "status": "ok" })) }),
    )
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => loader::load_config(path)?,
        None => loader::from_env()?,
    };

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "api-bootstrap starting");

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = ApiServer::builder(config).routes(routes).build()?;
    server.listen(cli.port, cli.host.as_deref()).await?;

    shutdown_signal().await;
    server.close().await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
