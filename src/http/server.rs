//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the reverse proxy for the configured upstream
//! - Attach the filter pipelines to it
//! - Wire up middleware (timeout, request ID, tracing)
//! - Serve on a listener until the shutdown context is cancelled

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::Uri;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::buffer::BufferPool;
use crate::config::ProxyConfig;
use crate::filter::Filter;
use crate::lifecycle::Context;
use crate::proxy::{wrap_reverse_proxy, ReverseProxy};
use crate::transport::HyperTransport;

/// HTTP server fronting the filtered reverse proxy.
pub struct HttpServer {
    config: ProxyConfig,
    filters: Vec<Arc<dyn Filter>>,
    pool: Arc<BufferPool>,
}

impl HttpServer {
    /// Create a server proxying to `config.upstream` through `filters`,
    /// declared closest-to-the-client first.
    pub fn new(config: ProxyConfig, filters: Vec<Arc<dyn Filter>>) -> Self {
        let pool = Arc::new(BufferPool::with_max_idle(
            config.streaming.buffer_size,
            config.streaming.max_idle_buffers,
        ));
        Self {
            config,
            filters,
            pool,
        }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// `ctx` is handed to every filter and cancels streaming workers.
    #[allow(deprecated)]
    pub fn router(&self, ctx: Context) -> Router {
        let service = wrap_reverse_proxy(ctx, self.build_proxy(), &self.filters);

        Router::new()
            .fallback_service(service)
            .layer(TimeoutLayer::new(Duration::from_secs(self.config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
    }

    fn build_proxy(&self) -> ReverseProxy {
        let upstream = self.config.upstream.url.as_deref().and_then(|url| {
            url.parse::<Uri>()
                .map_err(|e| tracing::warn!(url, error = %e, "Ignoring unparseable upstream URL"))
                .ok()
        });

        let proxy = match upstream {
            Some(target) => {
                tracing::info!(upstream = %target, "Proxying to upstream");
                ReverseProxy::single_host(target)
            }
            None => {
                tracing::warn!("No upstream configured, answering every request with 200");
                ReverseProxy::new()
            }
        };

        proxy
            .with_transport(HyperTransport::with_connect_timeout(Duration::from_secs(
                self.config.timeouts.connect_secs,
            )))
            .with_buffer_pool(Arc::clone(&self.pool))
            .with_pipe_capacity(self.config.streaming.pipe_capacity)
    }

    /// Run the server, accepting connections on the given listener until
    /// `ctx` is cancelled.
    pub async fn run(self, listener: TcpListener, ctx: Context) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            filters = self.filters.len(),
            "HTTP server starting"
        );

        let app = self
            .router(ctx.clone())
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { ctx.cancelled().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Pool the streaming workers draw their read buffers from.
    pub fn buffer_pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}
