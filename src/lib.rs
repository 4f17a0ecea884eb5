//! Streaming filter middleware for HTTP reverse proxies.
//!
//! Filters attach to three points of a proxied exchange: the inbound request,
//! the response body as it streams back, and the response metadata once the
//! round trip returned. One declared filter list drives all three.
//!
//! ```text
//! request → RequestFilterService → ReverseProxy → StreamFilterTransport → upstream
//!                                                        │
//! client ← body pipe ← streaming worker (filters) ←──────┘
//!            ↑
//!        ModifierChain (status, headers)
//! ```

// Filter model and pipelines
pub mod buffer;
pub mod filter;
pub mod pipeline;

// Proxy and transports
pub mod proxy;
pub mod transport;

// Bundled server
pub mod config;
pub mod http;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use buffer::BufferPool;
pub use config::ProxyConfig;
pub use filter::{
    Filter, FilterError, RequestFilter, RequestInfo, ResponseInfo, ResponseModifierFilter,
    ResponseStreamFilter, Signal,
};
pub use http::HttpServer;
pub use lifecycle::{Context, Shutdown};
pub use pipeline::ResponseSink;
pub use proxy::{wrap_reverse_proxy, ReverseProxy};
pub use transport::Transport;
