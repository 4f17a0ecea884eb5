//! HTTP surface of the bundled proxy.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, timeout / request-id / trace layers)
//!     → RequestFilterService → ReverseProxy (proxy/)
//!     → response.rs (responses the pipeline produces on its own)
//!     → Send to client
//! ```

pub mod response;
pub mod server;

pub use server::HttpServer;
