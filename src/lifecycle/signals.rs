//! OS signal handling.
//!
//! # Responsibilities
//! - Wait for SIGINT (Ctrl+C)
//! - Translate it into a `Shutdown` trigger
//!
//! # Design Decisions
//! - Uses Tokio's signal handling (async-safe)
//! - A failure to install the handler is logged, never fatal

use crate::lifecycle::Shutdown;

/// Wait for Ctrl+C.
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

/// Trigger `shutdown` once Ctrl+C arrives.
pub async fn trigger_on_signal(shutdown: &Shutdown) {
    shutdown_signal().await;
    shutdown.trigger();
}
