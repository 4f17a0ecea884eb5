//! The three filter pipelines and the pipe between worker and client.
//!
//! # Data Flow
//! ```text
//! inbound request
//!     → request.rs   RequestFilterService (may answer on its own)
//!     → proxy / handler
//!         → stream.rs   StreamFilterTransport::round_trip
//!             → upstream transport
//!             → spawn worker: upstream body → filters → pipe.rs → client body
//!         → modifier.rs ModifierChain (hook, then filters)
//!     → request.rs   staged sink headers, then release_head (worker starts)
//!     → client
//! ```

pub mod modifier;
pub mod pipe;
pub mod request;
pub mod stream;

pub use modifier::{ModifierChain, ModifyResponse};
pub use pipe::{pipe, PipeReader, PipeWriter};
pub use request::{RequestFilterLayer, RequestFilterService, ResponseSink};
pub use stream::{release_head, StreamFilterTransport, DEFAULT_PIPE_CAPACITY};
