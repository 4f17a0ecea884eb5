//! Pass-through stream filter that keeps a copy of what it sees.

use std::io::Write;
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;

use crate::filter::{FilterError, ResponseInfo, ResponseStreamFilter, Signal};
use crate::lifecycle::Context;

/// Records every chunk into an internal buffer and forwards it unchanged.
///
/// Useful as a building block for filters that need the bytes seen so far.
/// One instance records across every response it is attached to.
#[derive(Debug, Default)]
pub struct RecordingFilter {
    recorded: Mutex<Vec<u8>>,
}

impl RecordingFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything recorded so far.
    pub fn recorded(&self) -> Bytes {
        Bytes::copy_from_slice(&self.recorded.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Drain the recorded bytes.
    pub fn take(&self) -> Bytes {
        Bytes::from(std::mem::take(
            &mut *self.recorded.lock().unwrap_or_else(PoisonError::into_inner),
        ))
    }

    fn record_and_forward(&self, writer: &mut dyn Write, chunk: &[u8]) -> Result<(), FilterError> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(chunk);
        writer.write_all(chunk)?;
        Ok(())
    }
}

impl ResponseStreamFilter for RecordingFilter {
    fn on_response_chunk(
        &self,
        _ctx: &Context,
        _info: &ResponseInfo<'_>,
        writer: &mut dyn Write,
        chunk: &mut [u8],
    ) -> Result<Signal, FilterError> {
        self.record_and_forward(writer, chunk)?;
        Ok(Signal::Continue)
    }

    fn on_response_eof(
        &self,
        _ctx: &Context,
        _info: &ResponseInfo<'_>,
        writer: &mut dyn Write,
        chunk: &mut [u8],
    ) -> Result<(), FilterError> {
        self.record_and_forward(writer, chunk)
    }
}

crate::filter_capabilities!(RecordingFilter: stream);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::SharedHeaders;
    use axum::http::StatusCode;

    #[test]
    fn forwards_and_records() {
        let filter = RecordingFilter::new();
        let ctx = Context::background();
        let headers = SharedHeaders::default();
        let info = ResponseInfo::new(&ctx, StatusCode::OK, &headers);

        let mut out = Vec::new();
        let mut chunk = *b"hello ";
        filter.on_response_chunk(&ctx, &info, &mut out, &mut chunk).unwrap();
        let mut chunk = *b"world";
        filter.on_response_chunk(&ctx, &info, &mut out, &mut chunk).unwrap();
        filter.on_response_eof(&ctx, &info, &mut out, &mut []).unwrap();

        assert_eq!(out, b"hello world");
        assert_eq!(filter.recorded(), Bytes::from_static(b"hello world"));
        assert_eq!(filter.take(), Bytes::from_static(b"hello world"));
        assert!(filter.recorded().is_empty());
    }
}
