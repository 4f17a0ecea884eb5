//! Error types for filters and pipelines.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::transport::BoxError;

/// Error returned by a filter.
///
/// The message is what clients see in a request-filter error response.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct FilterError {
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl FilterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// Wrap an underlying error, using its display text as the message.
    pub fn from_source(source: impl Into<BoxError>) -> Self {
        let source = source.into();
        Self {
            message: source.to_string(),
            source: Some(source),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<io::Error> for FilterError {
    fn from(e: io::Error) -> Self {
        Self::from_source(e)
    }
}

/// Which stream-filter callback failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Chunk,
    Eof,
}

impl fmt::Display for StreamPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamPhase::Chunk => f.write_str("on_response_chunk"),
            StreamPhase::Eof => f.write_str("on_response_eof"),
        }
    }
}

/// Why a pipeline invocation stopped early.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("request filter `{filter}` failed: {source}")]
    RequestFilter {
        filter: &'static str,
        source: FilterError,
    },

    #[error("stream filter `{filter}` failed in {phase}: {source}")]
    StreamFilter {
        filter: &'static str,
        phase: StreamPhase,
        source: FilterError,
    },

    #[error("upstream body read failed: {0}")]
    UpstreamRead(#[source] io::Error),

    #[error("context cancelled")]
    Cancelled,

    #[error("response modifier failed: {0}")]
    Modifier(#[source] BoxError),

    #[error("client stopped reading the response body")]
    ClientGone,

    #[error("streaming worker panicked")]
    Panicked,
}

impl PipelineError {
    /// Label for the `roundtrip_stream_errors_total` metric.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::RequestFilter { .. } => "request_filter",
            PipelineError::StreamFilter { .. } => "stream_filter",
            PipelineError::UpstreamRead(_) => "upstream_read",
            PipelineError::Cancelled => "cancelled",
            PipelineError::Modifier(_) => "modifier",
            PipelineError::ClientGone => "client_gone",
            PipelineError::Panicked => "panicked",
        }
    }

    /// Turn the error into what the client-visible body reader yields.
    pub(crate) fn into_io(self) -> io::Error {
        let kind = match &self {
            PipelineError::UpstreamRead(e) => e.kind(),
            PipelineError::Cancelled => io::ErrorKind::Interrupted,
            PipelineError::ClientGone => io::ErrorKind::BrokenPipe,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }
}
