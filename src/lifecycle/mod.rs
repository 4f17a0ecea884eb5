//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     owns the cancellation source → hands out Contexts
//!
//! Context (context.rs):
//!     threaded through every filter stage and streaming worker
//!
//! Signals (signals.rs):
//!     SIGINT → Shutdown::trigger → server stops accepting, workers cancel
//! ```
//!
//! # Design Decisions
//! - Cancellation is cooperative: workers observe it at their read point
//! - Cancelled workers still flush filters and release their resources

pub mod context;
pub mod shutdown;
pub mod signals;

pub use context::Context;
pub use shutdown::Shutdown;
