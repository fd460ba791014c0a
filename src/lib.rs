//! ruby_pool - managed pool of embedded Ruby interpreter workers.
//!
//! This crate provides the pool lifecycle engine a server uses to run
//! user code on heavyweight, single-threaded interpreter instances
//! without paying per-request initialization cost: a bounded blocking
//! queue with an exclusive pool lock, a single-threaded mutator agent
//! serializing every state change, a bounded creation executor for
//! parallel construction, and poison-pill signaling so waiting borrowers
//! never hang on a dead pool.
//!
//! # Features
//!
//! - **Priming**: parallel construction of all instances, with the first
//!   one built alone so shared filesystem state settles first
//! - **Borrow / return**: blocking, bounded hand-out of exclusive
//!   instance ownership
//! - **Flushing**: replace one instance or the whole pool, atomically
//!   from the borrowers' perspective
//! - **Fail-stop**: fatal lifecycle failures clear the pool and leave an
//!   error pill carrying the real cause
//! - **Shutdown**: a persistent shutdown pill that every future borrower
//!   observes
//!
//! # Example
//!
//! ```rust,ignore
//! use ruby_pool::{PoolConfig, PoolContext};
//!
//! let config = PoolConfig::new().with_pool_size(4);
//! let pool = PoolContext::new(config, lifecycle)?;
//! pool.prime().wait();
//!
//! let mut worker = pool.borrow()?;
//! // ... run user code on the worker's interpreter ...
//! worker.note_request();
//! if pool.should_flush(&worker) {
//!     pool.flush_one(worker);
//! } else {
//!     pool.return_worker(worker);
//! }
//! ```

/// Package version from Cargo.toml
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod config;
pub mod logging;
pub mod pool;

// Re-exports for convenience
pub use config::{default_pool_size, ConfigError, PoolConfig};
pub use pool::{
    next_instance_id, Completion, PoolContext, PoolElement, PoolError, PoolResult, PoolStats,
    RuntimeHandle, Worker, WorkerLifecycle, WorkerQueue,
};
