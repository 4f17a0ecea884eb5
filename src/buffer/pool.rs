//! Reusable byte buffers for streaming workers.
//!
//! # Responsibilities
//! - Hand out fixed-size byte slabs to concurrent workers
//! - Take them back exactly once when the worker lets go
//! - Track how many slabs are checked out
//!
//! # Design Decisions
//! - Checkout returns an RAII guard; return happens in `Drop`, so every exit
//!   path (including unwinding) gives the slab back
//! - Idle slabs are capped; surplus slabs are freed instead of retained
//! - Slabs are not zeroed on return

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use crate::observability::metrics;

/// Size of slabs in the shared pool.
pub const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// Idle slabs the shared pool keeps around.
pub const DEFAULT_MAX_IDLE: usize = 256;

static SHARED: OnceLock<Arc<BufferPool>> = OnceLock::new();

/// A pool of fixed-size byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    /// Length of every slab.
    buffer_size: usize,
    /// Maximum slabs retained while idle.
    max_idle: usize,
    /// Slabs waiting for reuse.
    idle: Mutex<Vec<Box<[u8]>>>,
    /// Slabs currently checked out.
    outstanding: AtomicUsize,
}

impl BufferPool {
    /// Create a pool of `buffer_size`-byte slabs.
    pub fn new(buffer_size: usize) -> Self {
        Self::with_max_idle(buffer_size, DEFAULT_MAX_IDLE)
    }

    /// Create a pool that retains at most `max_idle` returned slabs.
    pub fn with_max_idle(buffer_size: usize, max_idle: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            max_idle,
            idle: Mutex::new(Vec::new()),
            outstanding: AtomicUsize::new(0),
        }
    }

    /// The process-wide pool used when a proxy does not bring its own.
    pub fn shared() -> Arc<BufferPool> {
        SHARED
            .get_or_init(|| Arc::new(BufferPool::new(DEFAULT_BUFFER_SIZE)))
            .clone()
    }

    /// Check a slab out. It goes back to the pool when the guard drops.
    pub fn checkout(self: &Arc<Self>) -> PooledBuffer {
        let slab = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_size].into_boxed_slice());

        let outstanding = self.outstanding.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::set_buffers_outstanding(outstanding);

        PooledBuffer {
            slab: Some(slab),
            pool: Arc::clone(self),
        }
    }

    /// Length of every slab handed out.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of slabs currently checked out.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Number of slabs waiting for reuse.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn give_back(&self, slab: Box<[u8]>) {
        {
            let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
            if idle.len() < self.max_idle {
                idle.push(slab);
            }
        }
        let outstanding = self.outstanding.fetch_sub(1, Ordering::AcqRel) - 1;
        metrics::set_buffers_outstanding(outstanding);
    }
}

/// A checked-out slab. Returned to its pool on drop.
#[derive(Debug)]
pub struct PooledBuffer {
    slab: Option<Box<[u8]>>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = [u8];
    fn deref(&self) -> &Self::Target {
        self.slab.as_deref().unwrap_or_default()
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.slab.as_deref_mut().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(slab) = self.slab.take() {
            self.pool.give_back(slab);
        }
    }
}
