//! Bounded pipe between a streaming worker and the client-visible body.
//!
//! # Responsibilities
//! - Carry transformed chunks from the worker to the response body
//! - Suspend the worker while the client has not caught up
//! - Carry a terminal error to the client when the worker fails
//!
//! # Design Decisions
//! - A tokio mpsc channel of `Result<Bytes, io::Error>`; capacity bounds how
//!   far the worker may run ahead
//! - Dropping the writer is a clean end of stream; `close_with_error` makes
//!   the reader's last item an error instead
//! - Empty writes are skipped so the body never yields empty frames

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::body::Body;
use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::mpsc;

type Item = Result<Bytes, io::Error>;

/// Create a pipe that queues at most `capacity` chunks.
pub fn pipe(capacity: usize) -> (PipeWriter, PipeReader) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (PipeWriter { tx, written: 0 }, PipeReader { rx })
}

/// Write end, owned by the streaming worker.
#[derive(Debug)]
pub struct PipeWriter {
    tx: mpsc::Sender<Item>,
    written: u64,
}

impl PipeWriter {
    /// Queue `data`, waiting while the pipe is full.
    ///
    /// Fails with `BrokenPipe` once the reader is gone.
    pub async fn write(&mut self, data: Bytes) -> io::Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let len = data.len();
        self.tx
            .send(Ok(data))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader closed"))?;
        self.written += len as u64;
        Ok(())
    }

    /// Bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Resolves once the reader has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// End the stream cleanly.
    pub fn close(self) {}

    /// End the stream with `err` as the reader's final item.
    pub async fn close_with_error(self, err: io::Error) {
        // The reader may already be gone; nobody is left to tell.
        let _ = self.tx.send(Err(err)).await;
    }
}

/// Read end, exposed to the client as the response body.
#[derive(Debug)]
pub struct PipeReader {
    rx: mpsc::Receiver<Item>,
}

impl PipeReader {
    /// Next chunk, the terminal error, or `None` at a clean end.
    pub async fn read(&mut self) -> Option<Item> {
        self.rx.recv().await
    }

    pub fn into_body(self) -> Body {
        Body::from_stream(self)
    }
}

impl Stream for PipeReader {
    type Item = Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
