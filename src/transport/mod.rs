//! Upstream transport boundary.
//!
//! # Data Flow
//! ```text
//! ReverseProxy
//!     → StreamFilterTransport (pipeline/stream.rs, itself a Transport)
//!         → HyperTransport (hyper.rs) → upstream
//! ```
//!
//! # Design Decisions
//! - One operation: a single round trip, request in, response or error out
//! - Wrappers implement the same trait, so they stack transparently
//! - Errors are boxed, the same convention tower uses

pub mod hyper;
pub mod noop;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, Response};
use futures_util::future::BoxFuture;

pub use self::hyper::HyperTransport;
pub use self::noop::NoopTransport;

/// Type-erased error crossing the transport boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Future returned by [`Transport::round_trip`].
pub type RoundTripFuture = BoxFuture<'static, Result<Response<Body>, BoxError>>;

/// Performs one HTTP round trip.
pub trait Transport: Send + Sync + 'static {
    fn round_trip(&self, request: Request<Body>) -> RoundTripFuture;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn round_trip(&self, request: Request<Body>) -> RoundTripFuture {
        (**self).round_trip(request)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn round_trip(&self, request: Request<Body>) -> RoundTripFuture {
        (**self).round_trip(request)
    }
}
