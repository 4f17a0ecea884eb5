//! Shutdown coordination for the proxy.

use tokio::sync::watch;

use crate::lifecycle::Context;

/// Coordinator for graceful shutdown.
///
/// Owns the cancellation source behind every `Context` it hands out.
/// Triggering it stops the server accept loop and cancels in-flight
/// streaming workers.
pub struct Shutdown {
    /// Watch channel sender.
    tx: watch::Sender<bool>,
}

impl Shutdown {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// A context cancelled when this coordinator triggers.
    pub fn context(&self) -> Context {
        Context::with_cancel(self.tx.subscribe())
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Whether `trigger` has been called.
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Get the number of live contexts (tasks still holding one).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_cancels_every_context() {
        let shutdown = Shutdown::new();
        let a = shutdown.context();
        let b = a.clone();
        assert!(!a.is_cancelled());

        shutdown.trigger();
        assert!(shutdown.is_triggered());
        a.cancelled().await;
        b.cancelled().await;
        assert!(b.is_cancelled());
    }

    #[tokio::test]
    async fn context_created_after_trigger_is_cancelled() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let ctx = shutdown.context();
        assert!(ctx.is_cancelled());
        ctx.cancelled().await;
    }
}
