//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define pipeline metrics (filter outcomes, workers, bytes, errors)
//! - Expose a Prometheus-compatible endpoint when enabled
//!
//! # Metrics
//! - `roundtrip_request_filter_total` (counter): request filter outcomes by `outcome`
//! - `roundtrip_stream_workers_active` (gauge): running streaming workers
//! - `roundtrip_stream_bytes_total` (counter): bytes by `direction` (upstream, client)
//! - `roundtrip_stream_errors_total` (counter): worker failures by `kind`
//! - `roundtrip_modifier_errors_total` (counter): failed modifier runs
//! - `roundtrip_buffers_outstanding` (gauge): pooled buffers checked out
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request_filter(outcome: &'static str) {
    metrics::counter!("roundtrip_request_filter_total", "outcome" => outcome).increment(1);
}

pub fn record_stream_bytes(direction: &'static str, bytes: usize) {
    metrics::counter!("roundtrip_stream_bytes_total", "direction" => direction).increment(bytes as u64);
}

pub fn record_stream_error(kind: &'static str) {
    metrics::counter!("roundtrip_stream_errors_total", "kind" => kind).increment(1);
}

pub fn record_modifier_error() {
    metrics::counter!("roundtrip_modifier_errors_total").increment(1);
}

pub fn set_buffers_outstanding(count: usize) {
    metrics::gauge!("roundtrip_buffers_outstanding").set(count as f64);
}

/// Keeps `roundtrip_stream_workers_active` up while alive.
#[derive(Debug)]
pub struct ActiveWorker(());

impl ActiveWorker {
    pub fn start() -> Self {
        metrics::gauge!("roundtrip_stream_workers_active").increment(1.0);
        Self(())
    }
}

impl Drop for ActiveWorker {
    fn drop(&mut self) {
        metrics::gauge!("roundtrip_stream_workers_active").decrement(1.0);
    }
}
