//! Reverse proxy service.
//!
//! # Data Flow
//! ```text
//! Request<Body>
//!     → director (rewrite target URI / Host)
//!     → strip hop-by-hop headers, append X-Forwarded-For
//!     → transport.round_trip
//!     → strip hop-by-hop headers from the response
//!     → modify_response hook
//!     → Response<Body> (body may still be streaming)
//! ```
//!
//! # Design Decisions
//! - Plain struct with builder methods; `wrap_reverse_proxy` rewires its
//!   transport and hook in place
//! - Transport and modifier failures become a `502`; the cause is logged,
//!   not sent

pub mod compose;
pub mod headers;

use std::convert::Infallible;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::HOST;
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderValue, Request, Response, Uri};
use futures_util::future::BoxFuture;
use tower::Service;

use crate::buffer::BufferPool;
use crate::http::response::bad_gateway;
use crate::pipeline::{ModifyResponse, DEFAULT_PIPE_CAPACITY};
use crate::transport::{BoxError, HyperTransport, Transport};

pub use compose::wrap_reverse_proxy;

/// Rewrites an inbound request into the request sent upstream.
pub type Director = Arc<dyn Fn(&mut Request<Body>) + Send + Sync>;

#[derive(Clone)]
pub struct ReverseProxy {
    pub(crate) director: Option<Director>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) modify_response: Option<ModifyResponse>,
    pub(crate) buffer_pool: Option<Arc<BufferPool>>,
    pub(crate) pipe_capacity: usize,
}

impl ReverseProxy {
    /// A proxy with no director and a default hyper transport.
    pub fn new() -> Self {
        Self {
            director: None,
            transport: Arc::new(HyperTransport::new()),
            modify_response: None,
            buffer_pool: None,
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
        }
    }

    /// A proxy sending every request to `target`.
    pub fn single_host(target: Uri) -> Self {
        Self {
            director: Some(single_host_director(target)),
            ..Self::new()
        }
    }

    pub fn with_director<F>(mut self, director: F) -> Self
    where
        F: Fn(&mut Request<Body>) + Send + Sync + 'static,
    {
        self.director = Some(Arc::new(director));
        self
    }

    pub fn with_transport(mut self, transport: impl Transport) -> Self {
        self.transport = Arc::new(transport);
        self
    }

    pub fn with_modify_response<F>(mut self, modify: F) -> Self
    where
        F: Fn(&mut Response<Body>) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.modify_response = Some(Arc::new(modify));
        self
    }

    pub fn with_buffer_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.buffer_pool = Some(pool);
        self
    }

    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity.max(1);
        self
    }

    pub fn has_director(&self) -> bool {
        self.director.is_some()
    }

    /// Forward one request and return the upstream response.
    pub async fn forward(&self, mut request: Request<Body>) -> Response<Body> {
        let client = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        if let Some(director) = &self.director {
            director(&mut request);
        }
        headers::remove_hop_by_hop(request.headers_mut());
        if let Some(ip) = client {
            headers::append_forwarded_for(request.headers_mut(), ip);
        }

        let method = request.method().clone();
        let uri = request.uri().clone();
        tracing::debug!(method = %method, uri = %uri, "Proxying request");

        let mut response = match self.transport.round_trip(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(method = %method, uri = %uri, error = %e, "Upstream error");
                return bad_gateway();
            }
        };

        headers::remove_hop_by_hop(response.headers_mut());

        if let Some(modify) = &self.modify_response {
            if let Err(e) = modify(&mut response) {
                tracing::warn!(method = %method, uri = %uri, error = %e, "Response rejected by modifier");
                return bad_gateway();
            }
        }

        response
    }
}

impl Default for ReverseProxy {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<Request<Body>> for ReverseProxy {
    type Response = Response<Body>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response<Body>, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<Body>) -> Self::Future {
        let proxy = self.clone();
        Box::pin(async move { Ok(proxy.forward(request).await) })
    }
}

/// Director pointing requests at `target`, keeping the request path and
/// query beneath the target's own path.
pub fn single_host_director(target: Uri) -> Director {
    let host = target
        .authority()
        .and_then(|a| HeaderValue::from_str(a.as_str()).ok());

    Arc::new(move |request: &mut Request<Body>| {
        let mut parts = request.uri().clone().into_parts();
        parts.scheme = target.scheme().cloned();
        parts.authority = target.authority().cloned();

        let base = target.path().trim_end_matches('/');
        let suffix = parts.path_and_query.as_ref().map_or("/", |pq| pq.as_str());
        if let Ok(joined) = PathAndQuery::from_str(&format!("{base}{suffix}")) {
            parts.path_and_query = Some(joined);
        }

        match Uri::from_parts(parts) {
            Ok(uri) => *request.uri_mut() = uri,
            Err(e) => tracing::warn!(error = %e, "Director could not rewrite request URI"),
        }
        if let Some(host) = &host {
            request.headers_mut().insert(HOST, host.clone());
        }
    })
}
