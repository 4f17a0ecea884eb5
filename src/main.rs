//! roundtrip-proxy
//!
//! Pass-through reverse proxy built on the roundtrip filter pipelines.
//! Reads its configuration from the TOML file named by `ROUNDTRIP_CONFIG`,
//! or runs on defaults when the variable is unset.

use std::path::PathBuf;

use tokio::net::TcpListener;

use roundtrip::config::{load_config, ProxyConfig};
use roundtrip::lifecycle::{signals, Shutdown};
use roundtrip::observability::{logging, metrics};
use roundtrip::HttpServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::var_os("ROUNDTRIP_CONFIG") {
        Some(path) => load_config(&PathBuf::from(path))?,
        None => ProxyConfig::default(),
    };

    logging::init(&config.observability);
    tracing::info!("roundtrip-proxy v{} starting", env!("CARGO_PKG_VERSION"));

    tracing::info!(
        bind_address = %config.listener.bind_address,
        upstream = config.upstream.url.as_deref().unwrap_or("none"),
        buffer_size = config.streaming.buffer_size,
        request_timeout_secs = config.timeouts.request_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;

    let shutdown = Shutdown::new();
    let ctx = shutdown.context();
    tokio::spawn(async move { signals::trigger_on_signal(&shutdown).await });

    HttpServer::new(config, Vec::new()).run(listener, ctx).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
