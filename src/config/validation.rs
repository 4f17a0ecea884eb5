//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (buffer sizes, timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid {field} address `{value}`")]
    Address { field: &'static str, value: String },

    #[error("upstream url `{0}` is not an absolute http url")]
    UpstreamUrl(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),
}

/// Check `config` for semantic errors.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::Address {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }

    if let Some(raw) = &config.upstream.url {
        let ok = Url::parse(raw)
            .map(|u| u.scheme() == "http" && u.host_str().is_some())
            .unwrap_or(false);
        if !ok {
            errors.push(ValidationError::UpstreamUrl(raw.clone()));
        }
    }

    if config.streaming.buffer_size == 0 {
        errors.push(ValidationError::Zero("streaming.buffer_size"));
    }
    if config.streaming.pipe_capacity == 0 {
        errors.push(ValidationError::Zero("streaming.pipe_capacity"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::Zero("timeouts.request_secs"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::Address {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
