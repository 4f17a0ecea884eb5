//! Configuration schema definitions.
//!
//! This module defines the configuration structure for the bundled proxy
//! server. All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

use crate::buffer::pool::{DEFAULT_BUFFER_SIZE, DEFAULT_MAX_IDLE};

/// Root configuration for the filtering reverse proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Upstream the proxy forwards to.
    pub upstream: UpstreamConfig,

    /// Streaming pipeline tuning.
    pub streaming: StreamingConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL requests are rewritten to (e.g., "http://127.0.0.1:3000").
    /// Without one the proxy answers every request with an empty 200.
    pub url: Option<String>,
}

/// Streaming pipeline configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Size of each pooled read buffer in bytes.
    pub buffer_size: usize,

    /// Idle buffers retained by the pool.
    pub max_idle_buffers: usize,

    /// Chunks the worker may queue ahead of the client.
    pub pipe_capacity: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_idle_buffers: DEFAULT_MAX_IDLE,
            pipe_capacity: 1,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed until response headers arrive, in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
