//! Per-pipeline context.
//!
//! # Responsibilities
//! - Carry cancellation into every pipeline stage
//! - Carry the parent span that pipeline log events attach to
//!
//! # Design Decisions
//! - Cancellation is a watch channel owned by `Shutdown`; a context without
//!   a source is never cancelled
//! - Logging is injected through the span rather than read from process state

use tokio::sync::watch;
use tracing::Span;

/// Context threaded through request filters, stream filters and modifiers.
#[derive(Debug, Clone)]
pub struct Context {
    cancel: Option<watch::Receiver<bool>>,
    span: Span,
}

impl Context {
    /// A context that is never cancelled and logs under the current span.
    pub fn background() -> Self {
        Self {
            cancel: None,
            span: Span::current(),
        }
    }

    pub(crate) fn with_cancel(cancel: watch::Receiver<bool>) -> Self {
        Self {
            cancel: Some(cancel),
            span: Span::current(),
        }
    }

    /// Replace the span pipeline events are recorded under.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// The span pipeline events are recorded under.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Returns true once the owning `Shutdown` has been triggered.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().map(|rx| *rx.borrow()).unwrap_or(false)
    }

    /// Resolves when the context is cancelled.
    ///
    /// Never resolves for a background context, or if the cancellation
    /// source is dropped without being triggered.
    pub async fn cancelled(&self) {
        if let Some(rx) = &self.cancel {
            let mut rx = rx.clone();
            if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
                return;
            }
        }
        std::future::pending::<()>().await
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
