//! Pool context and orchestration protocols.
//!
//! [`PoolContext`] ties the queue, the mutator agent, the creation
//! executor and the caller-supplied lifecycle hooks together and exposes
//! the lifecycle protocols: prime, flush-one, drain-and-refill and
//! flush-for-shutdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::config::{ConfigError, PoolConfig};

use super::agent::{Completion, CompletionHandle, MutatorAgent};
use super::creation::{CreationExecutor, CreationJob};
use super::error::{PoolError, PoolResult};
use super::queue::{PoolElement, WorkerQueue};
use super::worker::{Worker, WorkerLifecycle};

/// Snapshot of pool state for observability.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Configured pool size.
    pub size: usize,
    /// Live workers owned by the pool, idle or borrowed.
    pub registered: usize,
    /// Workers sitting idle in the queue.
    pub idle: usize,
    /// Workers currently held by borrowers.
    pub borrowed: usize,
    /// Whether a drain currently holds the pool lock.
    pub locked: bool,
}

struct PoolShared {
    // The agent is declared first so that it drains and stops before the
    // creation executor and queue are torn down.
    agent: MutatorAgent,
    creation: CreationExecutor,
    queue: WorkerQueue,
    lifecycle: Arc<dyn WorkerLifecycle>,
    config: PoolConfig,
    /// One-slot side channel holding the true cause of the last fatal
    /// error. The fatal-error hook swallows failures, so the cause is
    /// recorded here before the hook observes it.
    fatal_cause: Mutex<Option<PoolError>>,
}

/// Handle to a managed pool of interpreter workers.
///
/// Cloning is cheap; all clones share one pool.
#[derive(Clone)]
pub struct PoolContext {
    shared: Arc<PoolShared>,
}

impl PoolContext {
    /// Builds an empty pool from a validated configuration.
    ///
    /// The pool holds no workers until [`prime`](Self::prime) runs.
    pub fn new(
        config: PoolConfig,
        lifecycle: Arc<dyn WorkerLifecycle>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let pool_size = config.pool_size();
        let threads = pool_size.min(num_cpus::get()).max(1);

        let shared = Arc::new(PoolShared {
            agent: MutatorAgent::new("pool-mutator"),
            creation: CreationExecutor::new(threads, "worker-create"),
            queue: WorkerQueue::new(pool_size),
            lifecycle,
            config,
            fatal_cause: Mutex::new(None),
        });

        Ok(Self { shared })
    }

    /// Configured pool size.
    pub fn pool_size(&self) -> usize {
        self.shared.config.pool_size()
    }

    /// Time a drain waits for the exclusive pool lock.
    pub fn flush_timeout(&self) -> Duration {
        self.shared.config.flush_timeout()
    }

    /// Snapshot of the pool's current state.
    pub fn stats(&self) -> PoolStats {
        let queue = &self.shared.queue;
        PoolStats {
            size: self.pool_size(),
            registered: queue.registered_count(),
            idle: queue.idle_count(),
            borrowed: queue.borrowed_count(),
            locked: queue.is_locked(),
        }
    }

    /// Blocks until a worker is available.
    pub fn borrow(&self) -> PoolResult<Worker> {
        self.shared.queue.borrow()
    }

    /// Blocks until a worker is available or `timeout` expires.
    pub fn borrow_timeout(&self, timeout: Duration) -> PoolResult<Option<Worker>> {
        self.shared.queue.borrow_timeout(timeout)
    }

    /// Places a borrowed worker back into the pool.
    pub fn return_worker(&self, worker: Worker) {
        self.shared.queue.return_worker(worker);
    }

    /// True when `worker` has served the configured number of requests
    /// and is due for replacement.
    pub fn should_flush(&self, worker: &Worker) -> bool {
        let max = self.shared.config.max_requests_per_instance();
        max > 0 && worker.request_count() >= max
    }

    /// Drains the one-slot fatal-cause side channel.
    pub fn take_fatal_cause(&self) -> Option<PoolError> {
        self.shared.fatal_cause.lock().unwrap().take()
    }

    /// Fills an empty pool.
    ///
    /// Dispatched to the mutator agent; the returned waiter resolves when
    /// priming has finished, successfully or not.
    pub fn prime(&self) -> Completion {
        let (handle, completion) = Completion::new();
        self.submit_guarded("prime-pool", handle, prime_pool);
        completion
    }

    /// Replaces a single borrowed worker with a fresh one.
    ///
    /// The replacement id advances by the pool size so the slot keeps a
    /// stable residue. Cleanup and recreation run on the mutator agent;
    /// the returned waiter resolves when the replacement is in place.
    pub fn flush_one(&self, worker: Worker) -> Completion {
        let old_id = worker.id();
        let new_id = next_instance_id(old_id, self.pool_size());
        let (handle, completion) = Completion::new();
        self.submit_guarded("flush-instance", handle, move |shared| {
            tracing::info!(old = old_id, new = new_id, "flushing worker");
            shared.queue.unregister();
            cleanup_worker(shared, worker).map_err(|e| {
                poison(shared, &e);
                e
            })?;
            create_and_register(shared, new_id, false).map_err(|e| {
                poison(shared, &e);
                e
            })
        });
        completion
    }

    /// Takes every worker out of circulation and dispatches their cleanup
    /// (and, when `refill` is true, their recreation) to the mutator.
    ///
    /// The lock/borrow phase runs on the calling thread: the pool lock is
    /// acquired within the flush timeout, all instances are collected as
    /// borrowers return them, and the lock is released before any cleanup
    /// begins. The returned waiter resolves once cleanup-and-refill has
    /// finished; it is fulfilled even on failure.
    pub fn drain_and_refill(&self, refill: bool) -> PoolResult<Completion> {
        let shared = &self.shared;
        let pool_size = self.pool_size();

        let lock = shared.queue.lock_with_timeout(self.flush_timeout())?;

        let mut old = Vec::with_capacity(pool_size);
        let mut failure: Option<PoolError> = None;
        for _ in 0..pool_size {
            match lock.try_take() {
                Some(Ok(worker)) => old.push(worker),
                Some(Err(e)) => {
                    failure = Some(e);
                    break;
                }
                // Fewer instances than slots; an unprimed pool drains empty.
                None => break,
            }
        }

        let failure = match failure {
            Some(e) if !e.is_shutdown() => {
                // Clear-then-pill before the gate opens; no borrower may
                // observe a partially drained queue.
                let wrapped = PoolError::Corrupted {
                    context: "failed to borrow instance while draining pool".into(),
                    cause: e.cause_message(),
                };
                poison(shared, &wrapped);
                Some(wrapped)
            }
            other => other,
        };

        drop(lock); // Blocked borrowers proceed before any cleanup runs.

        match failure {
            None => {
                tracing::info!(instances = old.len(), refill, "pool drained");
                let splay = refill && shared.config.splay_instance_flush();
                let (handle, completion) = Completion::new();
                self.submit_guarded("cleanup-and-refill", handle, move |shared| {
                    cleanup_and_refill(shared, old, refill, splay)
                });
                Ok(completion)
            }
            Some(e) if e.is_shutdown() => {
                // The shutdown pill is already in place; retire whatever
                // was collected before it surfaced.
                if !old.is_empty() {
                    let (handle, _completion) = Completion::new();
                    self.submit_guarded("cleanup-after-shutdown", handle, move |shared| {
                        cleanup_and_refill(shared, old, false, false)
                    });
                }
                Err(PoolError::Shutdown)
            }
            Some(e) => {
                let for_hook = e.clone();
                run_guarded(shared, "drain-pool", move |_| Err(for_hook));
                Err(e)
            }
        }
    }

    /// Drains and refills the pool, waiting for the refill to finish and
    /// surfacing the true cause of any fatal failure.
    pub fn flush_pool(&self) -> PoolResult<()> {
        self.take_fatal_cause();
        let done = self.drain_and_refill(true)?;
        done.wait();
        match self.take_fatal_cause() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Drains the pool without refilling and marks it shut down.
    ///
    /// Safe to call more than once: a repeat caller queues behind the
    /// first on the pool lock and then observes the shutdown pill.
    pub fn flush_for_shutdown(&self) -> PoolResult<()> {
        match self.drain_and_refill(false) {
            Ok(done) => {
                done.wait();
                self.shared.queue.insert_pill(PoolElement::ShutdownPill);
                tracing::info!("pool shut down");
                Ok(())
            }
            Err(PoolError::Shutdown) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Wraps `task` in the fatal-error guard and appends it to the
    /// mutator agent's mailbox. The waiter handle is signalled when the
    /// task finishes or is dropped unrun.
    fn submit_guarded<F>(&self, op: &'static str, done: CompletionHandle, task: F)
    where
        F: FnOnce(&Arc<PoolShared>) -> PoolResult<()> + Send + 'static,
    {
        let weak = Arc::downgrade(&self.shared);
        self.shared.agent.submit(Box::new(move || {
            if let Some(shared) = weak.upgrade() {
                run_guarded(&shared, op, task);
            }
            done.signal();
        }));
    }
}

/// Runs `task` under the fatal-error hook.
///
/// The true cause is written to the side channel before the hook sees
/// the failure, so callers can recover it even though the hook swallows
/// the error and returns a placeholder.
fn run_guarded<F>(shared: &Arc<PoolShared>, op: &'static str, task: F)
where
    F: FnOnce(&Arc<PoolShared>) -> PoolResult<()>,
{
    let mut task = Some(task);
    let result = shared.lifecycle.shutdown_on_error(&mut || {
        let task = match task.take() {
            Some(task) => task,
            None => return Ok(()),
        };
        match task(shared) {
            Ok(()) => Ok(()),
            Err(e) => {
                *shared.fatal_cause.lock().unwrap() = Some(e.clone());
                Err(e)
            }
        }
    });
    if let Err(e) = result {
        tracing::error!(op, error = %e, "pool mutation failed");
    }
}

/// Clears the queue and leaves an error pill carrying `err`'s cause.
///
/// Runs before the error propagates; no caller may observe a partially
/// populated queue after a fatal failure.
fn poison(shared: &PoolShared, err: &PoolError) {
    shared.queue.clear();
    shared.queue.insert_pill(PoolElement::ErrorPill {
        cause: err.cause_message(),
    });
}

/// Mutator-only: fills the queue up to capacity.
///
/// The first construction runs alone because it may mutate shared
/// filesystem state (gem installation) that must settle before parallel
/// construction starts.
fn prime_pool(shared: &Arc<PoolShared>) -> PoolResult<()> {
    let total = shared.queue.remaining_capacity();
    if total == 0 {
        tracing::info!("pool already at capacity, nothing to prime");
        return Ok(());
    }

    tracing::info!(instances = total, "priming pool");
    let ids: Vec<i32> = (1..=total as i32).collect();
    create_batch(shared, &ids[..1], false)?;
    create_batch(shared, &ids[1..], false)?;
    tracing::info!(instances = total, "pool primed");
    Ok(())
}

/// Mutator-only: retires drained workers and, when `refill` is set,
/// constructs their replacements.
///
/// Mirrors prime's batch split: the first pair alone, the remainder in
/// parallel. A failing pair stops the protocol; following pairs are not
/// dispatched.
fn cleanup_and_refill(
    shared: &Arc<PoolShared>,
    old: Vec<Worker>,
    refill: bool,
    splay: bool,
) -> PoolResult<()> {
    let pool_size = shared.config.pool_size();
    tracing::info!(instances = old.len(), refill, "cleaning up pool");

    let mut pairs = old
        .into_iter()
        .map(|w| {
            let new_id = next_instance_id(w.id(), pool_size);
            (w, new_id)
        })
        .collect::<Vec<_>>()
        .into_iter();

    if let Some(first) = pairs.next() {
        refill_batch(shared, vec![first], refill, splay)?;
    }
    refill_batch(shared, pairs.collect(), refill, splay)?;

    tracing::info!(refill, "pool flush complete");
    Ok(())
}

fn refill_batch(
    shared: &Arc<PoolShared>,
    pairs: Vec<(Worker, i32)>,
    refill: bool,
    splay: bool,
) -> PoolResult<()> {
    if pairs.is_empty() {
        return Ok(());
    }
    let jobs = pairs
        .into_iter()
        .map(|(old, new_id)| {
            let shared = Arc::clone(shared);
            Box::new(move || {
                cleanup_worker(&shared, old)?;
                if refill {
                    create_and_register(&shared, new_id, splay)?;
                }
                Ok(())
            }) as CreationJob
        })
        .collect();

    shared.creation.run_batch(jobs).map_err(|e| {
        poison(shared, &e);
        e
    })
}

fn create_batch(shared: &Arc<PoolShared>, ids: &[i32], splay: bool) -> PoolResult<()> {
    if ids.is_empty() {
        return Ok(());
    }
    let jobs = ids
        .iter()
        .map(|&id| {
            let shared = Arc::clone(shared);
            Box::new(move || create_and_register(&shared, id, splay)) as CreationJob
        })
        .collect();

    shared.creation.run_batch(jobs).map_err(|e| {
        poison(shared, &e);
        e
    })
}

fn create_and_register(shared: &PoolShared, id: i32, splay: bool) -> PoolResult<()> {
    tracing::debug!(worker = id, "creating worker");
    let worker = shared
        .lifecycle
        .initialize(id, &shared.config, splay)
        .map_err(|cause| PoolError::Corrupted {
            context: format!("failed to create instance {}", id),
            cause,
        })?;
    if !shared.queue.register(worker) {
        return Err(PoolError::Corrupted {
            context: format!("failed to register instance {}", id),
            cause: "pool is already full".into(),
        });
    }
    tracing::debug!(worker = id, "worker ready");
    Ok(())
}

fn cleanup_worker(shared: &PoolShared, worker: Worker) -> PoolResult<()> {
    let id = worker.id();
    shared
        .lifecycle
        .cleanup(worker)
        .map_err(|cause| PoolError::Corrupted {
            context: format!("failed to clean up instance {}", id),
            cause,
        })?;
    tracing::debug!(worker = id, "worker cleaned up");
    Ok(())
}

/// Computes the id of a worker's replacement.
///
/// Ids advance by the pool size so each slot keeps a stable residue
/// across generations; past `i32::MAX` the id wraps to that residue.
/// The wrap can yield id 0, which is a valid id.
pub fn next_instance_id(id: i32, pool_size: usize) -> i32 {
    let next = id as i64 + pool_size as i64;
    if next > i32::MAX as i64 {
        (next % pool_size as i64) as i32
    } else {
        next as i32
    }
}
