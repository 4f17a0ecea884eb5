//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipelines produce:
//!     → tracing events under the Context's span (logging.rs installs the subscriber)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout (pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Log sites: debug at end of stream, warn on upstream read failures,
//!   error on filter failures
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
