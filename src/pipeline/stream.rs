//! Response streaming pipeline.
//!
//! # Responsibilities
//! - Wrap a transport so every successful round trip streams its body
//!   through the stream-filter chain
//! - Run one worker task per response that reads upstream, threads each
//!   chunk through the filters and writes the result into a pipe
//! - Flush every filter once upstream is exhausted, failed or cancelled
//! - Release the upstream body, the pooled buffer and the pipe exactly once
//!
//! # Design Decisions
//! - Filters run strictly one after another per chunk; a filter's writer
//!   output is the next filter's chunk
//! - The pipe write end is the chain's terminal stage; user filters never
//!   see it
//! - A chunk filter's `Signal` is ignored; only errors stop the chain
//! - The worker body runs under `catch_unwind` so a panicking filter still
//!   fails the client read instead of ending the body cleanly
//! - A held worker reads nothing until [`release_head`] hands it the final
//!   status and headers; from then on [`SharedHeaders`] is the only header
//!   map stream filters see

use std::io;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};

use axum::body::Body;
use axum::http::header::CONTENT_LENGTH;
use axum::http::{Request, Response, StatusCode};
use bytes::Bytes;
use futures_util::{FutureExt, TryStreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;
use tokio_util::io::StreamReader;
use tracing::Instrument;
use uuid::Uuid;

use crate::buffer::{BufferPool, PooledBuffer};
use crate::filter::{PipelineError, ResponseInfo, ResponseStreamFilter, SharedHeaders, Signal, StreamPhase};
use crate::lifecycle::Context;
use crate::observability::metrics;
use crate::pipeline::pipe::{pipe, PipeWriter};
use crate::transport::{RoundTripFuture, Transport};

/// Chunks a worker may queue ahead of a slow client.
pub const DEFAULT_PIPE_CAPACITY: usize = 1;

/// Transport wrapper that streams response bodies through filters.
pub struct StreamFilterTransport<T> {
    inner: T,
    ctx: Context,
    filters: Arc<[Arc<dyn ResponseStreamFilter>]>,
    pool: Arc<BufferPool>,
    pipe_capacity: usize,
    hold: bool,
}

impl<T: Transport> StreamFilterTransport<T> {
    /// Stream `inner`'s responses through `filters`, in the given order.
    pub fn new(ctx: Context, inner: T, filters: Vec<Arc<dyn ResponseStreamFilter>>) -> Self {
        Self {
            inner,
            ctx,
            filters: filters.into(),
            pool: BufferPool::shared(),
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            hold: false,
        }
    }

    pub fn with_buffer_pool(mut self, pool: Arc<BufferPool>) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity.max(1);
        self
    }

    /// Keep each worker idle until [`release_head`] is called on its
    /// response. Whoever finishes the response head must release it; a
    /// response dropped unreleased just ends its worker.
    pub fn hold_until_released(mut self) -> Self {
        self.hold = true;
        self
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }
}

impl<T: Transport> Transport for StreamFilterTransport<T> {
    fn round_trip(&self, request: Request<Body>) -> RoundTripFuture {
        let upstream = self.inner.round_trip(request);
        let ctx = self.ctx.clone();
        let filters = Arc::clone(&self.filters);
        let pool = Arc::clone(&self.pool);
        let capacity = self.pipe_capacity;
        let hold = self.hold;

        Box::pin(async move {
            let mut response = upstream.await?;

            let body = std::mem::take(response.body_mut());
            let (writer, reader) = pipe(capacity);
            *response.body_mut() = reader.into_body();

            // Filters may change the body length.
            if !filters.is_empty() {
                response.headers_mut().remove(CONTENT_LENGTH);
            }

            let headers = SharedHeaders::new(response.headers().clone());
            response.extensions_mut().insert(headers.clone());

            let gate = hold.then(|| {
                let (tx, rx) = oneshot::channel();
                response
                    .extensions_mut()
                    .insert(PendingHead(Arc::new(Mutex::new(Some(tx)))));
                rx
            });

            let worker = StreamWorker {
                ctx,
                filters,
                upstream: Box::pin(StreamReader::new(
                    body.into_data_stream().map_err(io::Error::other),
                )),
                buf: pool.checkout(),
                acc: Vec::new(),
                next: Vec::new(),
                headers,
                status: response.status(),
                gate,
            };
            worker.spawn(writer);

            Ok(response)
        })
    }
}

/// Hand a held response's final head to its streaming worker.
///
/// Copies the response's current headers into its [`SharedHeaders`] and
/// lets the worker start reading upstream with the current status. Does
/// nothing for a response that was never held or is already released.
pub fn release_head(response: &mut Response<Body>) {
    let Some(PendingHead(slot)) = response.extensions_mut().remove::<PendingHead>() else {
        return;
    };
    if let Some(shared) = response.extensions().get::<SharedHeaders>() {
        *shared.lock() = response.headers().clone();
    }
    let sender = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    if let Some(tx) = sender {
        let _ = tx.send(response.status());
    }
}

/// Marks a response whose worker waits for [`release_head`].
#[derive(Clone)]
struct PendingHead(Arc<Mutex<Option<oneshot::Sender<StatusCode>>>>);

type UpstreamReader = Pin<Box<dyn AsyncRead + Send>>;

enum ReadOutcome {
    Data(usize),
    Eof,
    Failed(io::Error),
    Cancelled,
}

/// Owns everything one response's body transfer needs.
struct StreamWorker {
    ctx: Context,
    filters: Arc<[Arc<dyn ResponseStreamFilter>]>,
    upstream: UpstreamReader,
    buf: PooledBuffer,
    /// Output of the last stage that ran.
    acc: Vec<u8>,
    /// Writer handed to the stage currently running.
    next: Vec<u8>,
    headers: SharedHeaders,
    status: StatusCode,
    /// Set while the response head is still being finished.
    gate: Option<oneshot::Receiver<StatusCode>>,
}

impl StreamWorker {
    fn spawn(self, mut pipe: PipeWriter) {
        let span = tracing::debug_span!(
            parent: self.ctx.span(),
            "response_stream",
            stream_id = %Uuid::new_v4(),
        );

        tokio::spawn(
            async move {
                let _active = metrics::ActiveWorker::start();

                // `run` consumes the worker: upstream and buffer are released
                // before the pipe is closed below.
                let result = AssertUnwindSafe(self.run(&mut pipe))
                    .catch_unwind()
                    .await
                    .unwrap_or(Err(PipelineError::Panicked));

                let written = pipe.written();
                match result {
                    Ok(()) => {
                        tracing::debug!(bytes = written, "Response stream complete");
                        pipe.close();
                    }
                    Err(PipelineError::ClientGone) => {
                        tracing::debug!(bytes = written, "Client went away, stream abandoned");
                        metrics::record_stream_error("client_gone");
                    }
                    Err(err) => {
                        if matches!(err, PipelineError::Panicked) {
                            tracing::error!(bytes = written, "Stream filter panicked");
                        }
                        metrics::record_stream_error(err.kind());
                        pipe.close_with_error(err.into_io()).await;
                    }
                }
            }
            .instrument(span),
        );
    }

    async fn run(mut self, pipe: &mut PipeWriter) -> Result<(), PipelineError> {
        if let Some(gate) = self.gate.take() {
            // An unreleased response was dropped along with its body.
            self.status = tokio::select! {
                biased;
                _ = pipe.closed() => return Err(PipelineError::ClientGone),
                released = gate => released.map_err(|_| PipelineError::ClientGone)?,
            };
            tracing::trace!(status = %self.status, "Response head released");
        }

        loop {
            let read = tokio::select! {
                biased;
                _ = self.ctx.cancelled() => ReadOutcome::Cancelled,
                _ = pipe.closed() => return Err(PipelineError::ClientGone),
                result = self.upstream.read(&mut self.buf[..]) => match result {
                    Ok(0) => ReadOutcome::Eof,
                    Ok(n) => ReadOutcome::Data(n),
                    Err(e) => ReadOutcome::Failed(e),
                },
            };

            let cause = match read {
                ReadOutcome::Data(n) => {
                    metrics::record_stream_bytes("upstream", n);
                    self.propagate(n, StreamPhase::Chunk)?;
                    self.deliver(pipe).await?;
                    continue;
                }
                ReadOutcome::Eof => {
                    tracing::debug!("Upstream body reached EOF");
                    None
                }
                ReadOutcome::Cancelled => {
                    tracing::debug!("Context cancelled during body copy");
                    Some(PipelineError::Cancelled)
                }
                ReadOutcome::Failed(e) => {
                    tracing::warn!(error = %e, "Upstream read error during body copy");
                    Some(PipelineError::UpstreamRead(e))
                }
            };

            self.next.clear();
            self.propagate(0, StreamPhase::Eof)?;
            self.deliver(pipe).await?;
            return cause.map_or(Ok(()), Err);
        }
    }

    /// Thread `buf[..n]` through every filter; the result lands in `acc`.
    fn propagate(&mut self, n: usize, phase: StreamPhase) -> Result<(), PipelineError> {
        let Self {
            ctx,
            filters,
            buf,
            acc,
            next,
            headers,
            status,
            ..
        } = self;

        let mut raw_input = true;
        for filter in filters.iter() {
            next.clear();
            let info = ResponseInfo::new(ctx, *status, headers);
            let chunk: &mut [u8] = if raw_input { &mut buf[..n] } else { &mut acc[..] };

            let result = match phase {
                StreamPhase::Chunk => filter
                    .on_response_chunk(ctx, &info, &mut *next, chunk)
                    .map(|signal| {
                        if signal == Signal::Intercept {
                            tracing::trace!(filter = filter.name(), "Intercept has no effect mid-stream");
                        }
                    }),
                StreamPhase::Eof => filter.on_response_eof(ctx, &info, &mut *next, chunk),
            };

            if let Err(source) = result {
                tracing::error!(filter = filter.name(), %phase, error = %source, "Stream filter failed");
                return Err(PipelineError::StreamFilter {
                    filter: filter.name(),
                    phase,
                    source,
                });
            }

            std::mem::swap(acc, next);
            raw_input = false;
        }

        if raw_input {
            acc.clear();
            acc.extend_from_slice(&buf[..n]);
        }
        Ok(())
    }

    /// Terminal stage: hand the chain's output to the pipe.
    async fn deliver(&mut self, pipe: &mut PipeWriter) -> Result<(), PipelineError> {
        if self.acc.is_empty() {
            return Ok(());
        }
        let len = self.acc.len();
        pipe.write(Bytes::copy_from_slice(&self.acc))
            .await
            .map_err(|_| PipelineError::ClientGone)?;
        metrics::record_stream_bytes("client", len);
        Ok(())
    }
}
