//! Pooled worker instances and the caller-supplied lifecycle hooks.

use std::any::Any;
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::PoolConfig;

use super::error::PoolError;

/// Opaque handle to an embedded interpreter.
///
/// Created by [`WorkerLifecycle::initialize`] and released by
/// [`WorkerLifecycle::cleanup`]; the pool itself never inspects it.
pub type RuntimeHandle = Box<dyn Any + Send>;

/// A pooled, single-threaded, expensive-to-create interpreter instance.
///
/// A worker is owned exclusively: by the queue while idle, by exactly one
/// borrower while in use, and by the cleanup hook when it is retired.
pub struct Worker {
    id: i32,
    runtime: RuntimeHandle,
    created_at: Instant,
    requests: u64,
}

impl Worker {
    /// Wraps a freshly constructed interpreter handle.
    pub fn new(id: i32, runtime: RuntimeHandle) -> Self {
        Self {
            id,
            runtime,
            created_at: Instant::now(),
            requests: 0,
        }
    }

    /// Stable instance id, unique while the worker exists.
    pub fn id(&self) -> i32 {
        self.id
    }

    /// The interpreter handle.
    pub fn runtime(&self) -> &(dyn Any + Send) {
        &*self.runtime
    }

    /// Mutable access to the interpreter handle.
    pub fn runtime_mut(&mut self) -> &mut (dyn Any + Send) {
        &mut *self.runtime
    }

    /// Consumes the worker, yielding the interpreter handle.
    pub fn into_runtime(self) -> RuntimeHandle {
        self.runtime
    }

    /// Time elapsed since this worker was constructed.
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Requests served so far.
    pub fn request_count(&self) -> u64 {
        self.requests
    }

    /// Records one served request.
    pub fn note_request(&mut self) {
        self.requests += 1;
    }
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.id)
            .field("requests", &self.requests)
            .finish()
    }
}

/// Caller-supplied worker lifecycle hooks.
///
/// `initialize` and `cleanup` are invoked only from the mutator agent or
/// from construction threads dispatched synchronously by it; they never
/// interleave for the same slot.
pub trait WorkerLifecycle: Send + Sync {
    /// Constructs one worker.
    ///
    /// When `splay` is true, many instances are being constructed at once
    /// and the hook may jitter startup-affecting scheduling to avoid
    /// hammering downstream resources. Purely advisory.
    fn initialize(&self, id: i32, config: &PoolConfig, splay: bool) -> Result<Worker, String>;

    /// Releases a worker's resources.
    fn cleanup(&self, worker: Worker) -> Result<(), String>;

    /// Runs `task`, initiating process-level shutdown if it fails.
    ///
    /// The default logs the failure and swallows it. The pool records the
    /// real cause out-of-band before `task` returns, so the value returned
    /// here is never load-bearing.
    fn shutdown_on_error(
        &self,
        task: &mut dyn FnMut() -> Result<(), PoolError>,
    ) -> Result<(), PoolError> {
        if let Err(e) = task() {
            tracing::error!(error = %e, "fatal pool error");
        }
        Ok(())
    }
}
