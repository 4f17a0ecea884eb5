//! Buffer management subsystem.
//!
//! # Data Flow
//! ```text
//! streaming worker starts
//!     → pool.rs checkout (reuse idle slab or allocate)
//!     → worker reads upstream bytes into the slab
//!     → worker terminates (any path) → guard drop → slab back to idle list
//! ```

pub mod pool;

pub use pool::{BufferPool, PooledBuffer, DEFAULT_BUFFER_SIZE};
