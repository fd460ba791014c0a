//! Shared fixtures for pool integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ruby_pool::{PoolConfig, PoolContext, PoolError, Worker, WorkerLifecycle};

/// Lifecycle hooks that record every call and can be told to fail or
/// stall on demand.
pub struct RecordingHooks {
    events: Mutex<Vec<String>>,
    fatal_errors: AtomicUsize,
    fail_creates: Mutex<HashMap<i32, String>>,
    cleanup_delay: Mutex<Duration>,
}

impl RecordingHooks {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
            fatal_errors: AtomicUsize::new(0),
            fail_creates: Mutex::new(HashMap::new()),
            cleanup_delay: Mutex::new(Duration::ZERO),
        })
    }

    /// Makes `initialize` fail for the given instance id.
    pub fn fail_create(&self, id: i32, cause: &str) {
        self.fail_creates
            .lock()
            .unwrap()
            .insert(id, cause.to_string());
    }

    /// Makes every `cleanup` call sleep before completing.
    pub fn set_cleanup_delay(&self, delay: Duration) {
        *self.cleanup_delay.lock().unwrap() = delay;
    }

    /// Every recorded hook invocation, in order.
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    /// Number of recorded events starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    /// Times the fatal-error hook observed a failing task.
    pub fn fatal_errors(&self) -> usize {
        self.fatal_errors.load(Ordering::SeqCst)
    }
}

impl WorkerLifecycle for RecordingHooks {
    fn initialize(&self, id: i32, _config: &PoolConfig, _splay: bool) -> Result<Worker, String> {
        if let Some(cause) = self.fail_creates.lock().unwrap().get(&id) {
            return Err(cause.clone());
        }
        self.events.lock().unwrap().push(format!("create {}", id));
        Ok(Worker::new(id, Box::new(())))
    }

    fn cleanup(&self, worker: Worker) -> Result<(), String> {
        let delay = *self.cleanup_delay.lock().unwrap();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        self.events
            .lock()
            .unwrap()
            .push(format!("cleanup {}", worker.id()));
        Ok(())
    }

    fn shutdown_on_error(
        &self,
        task: &mut dyn FnMut() -> Result<(), PoolError>,
    ) -> Result<(), PoolError> {
        if task().is_err() {
            self.fatal_errors.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Builds an unprimed pool over recording hooks.
pub fn pool_with(
    hooks: &Arc<RecordingHooks>,
    size: usize,
    flush_timeout: Duration,
) -> PoolContext {
    let config = PoolConfig::new()
        .with_pool_size(size)
        .with_flush_timeout(flush_timeout);
    PoolContext::new(config, Arc::clone(hooks) as Arc<dyn WorkerLifecycle>).unwrap()
}

/// Builds and primes a pool, asserting the prime succeeded.
pub fn primed_pool(
    hooks: &Arc<RecordingHooks>,
    size: usize,
    flush_timeout: Duration,
) -> PoolContext {
    let pool = pool_with(hooks, size, flush_timeout);
    pool.prime().wait();
    assert_eq!(pool.stats().registered, size);
    pool
}
