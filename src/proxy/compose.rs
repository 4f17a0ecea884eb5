//! Attach a declared filter list to a reverse proxy.

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use tower::Layer;

use crate::buffer::BufferPool;
use crate::filter::{Filter, FilterChains};
use crate::lifecycle::Context;
use crate::pipeline::{ModifierChain, RequestFilterLayer, RequestFilterService, StreamFilterTransport};
use crate::proxy::ReverseProxy;
use crate::transport::NoopTransport;

/// Wire `filters` into `proxy`.
///
/// Filters are declared closest-to-the-client first. Request filters run in
/// that order; stream filters and modifiers run in reverse, so the first
/// declared filter is also the last to touch the response.
///
/// A proxy without a director is not wired at all: it answers every request
/// with an empty `200 OK`.
pub fn wrap_reverse_proxy(
    ctx: Context,
    mut proxy: ReverseProxy,
    filters: &[Arc<dyn Filter>],
) -> RequestFilterService<ReverseProxy> {
    if !proxy.has_director() {
        tracing::debug!("Proxy has no director, filters not attached");
        proxy.director = Some(Arc::new(|_: &mut Request<Body>| {}));
        proxy.transport = Arc::new(NoopTransport::default());
        return RequestFilterLayer::new(ctx, Vec::new()).layer(proxy);
    }

    let chains = FilterChains::classify(filters);
    tracing::debug!(?chains, "Filter pipelines composed");

    let pool = proxy.buffer_pool.clone().unwrap_or_else(BufferPool::shared);
    proxy.buffer_pool = Some(Arc::clone(&pool));

    proxy.transport = Arc::new(
        StreamFilterTransport::new(ctx.clone(), proxy.transport, chains.stream)
            .with_buffer_pool(pool)
            .with_pipe_capacity(proxy.pipe_capacity)
            .hold_until_released(),
    );
    proxy.modify_response = Some(
        ModifierChain::new(ctx.clone(), proxy.modify_response.take(), chains.modifier).into_hook(),
    );

    RequestFilterLayer::new(ctx, chains.request).layer(proxy)
}
