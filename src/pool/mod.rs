//! Managed pool of heavyweight interpreter workers.
//!
//! The embedded Ruby interpreter is expensive to construct and not
//! thread-shareable, so the server keeps a fixed set of instances and
//! hands them out one borrower at a time. All state-changing operations
//! are serialized through a single mutator thread; construction within
//! one operation is parallelized by a bounded creation executor.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        PoolContext                           │
//! ├──────────────────────────────────────────────────────────────┤
//! │  borrowers ──────────────┐                                   │
//! │                          ▼                                   │
//! │                  ┌───────────────┐                           │
//! │                  │  WorkerQueue  │  (bounded, pool lock,     │
//! │                  └───────▲───────┘   poison pills)           │
//! │                          │ register / take                   │
//! │  prime / flush ──► ┌─────┴────────┐     ┌─────────────────┐  │
//! │  (serialized)      │ MutatorAgent │ ──► │CreationExecutor │  │
//! │                    └──────────────┘     │ (parallel init) │  │
//! │                                         └─────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Fatal lifecycle failures clear the queue and leave an error pill so
//! waiting borrowers fail fast instead of hanging; shutdown leaves a
//! persistent shutdown pill that every future borrower observes.

mod agent;
mod context;
mod creation;
mod error;
mod queue;
mod worker;

pub use agent::{AgentTask, Completion, MutatorAgent};
pub use context::{next_instance_id, PoolContext, PoolStats};
pub use creation::{CreationExecutor, CreationJob};
pub use error::{PoolError, PoolResult};
pub use queue::{PoolElement, PoolLockGuard, WorkerQueue};
pub use worker::{RuntimeHandle, Worker, WorkerLifecycle};
