//! Bounded blocking queue of pool elements with an exclusive pool lock.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use super::error::{PoolError, PoolResult};
use super::worker::Worker;

/// Element type held by the queue.
///
/// Pills are sentinels placed by the mutator. An `ErrorPill` carries the
/// cause of a fatal lifecycle failure and is consumed by the next
/// borrower; a `ShutdownPill` stays at the head so every future borrower
/// observes shutdown.
#[derive(Debug)]
pub enum PoolElement {
    Worker(Worker),
    ErrorPill { cause: String },
    ShutdownPill,
}

#[derive(Debug)]
struct QueueState {
    items: VecDeque<PoolElement>,
    /// Live workers owned by the pool, idle or borrowed.
    registered: usize,
    /// Workers currently held by borrowers.
    borrowed: usize,
    /// Exclusive pool lock claimed during drain-and-refill.
    locked: bool,
}

impl QueueState {
    fn idle_workers(&self) -> usize {
        self.items
            .iter()
            .filter(|e| matches!(e, PoolElement::Worker(_)))
            .count()
    }

    /// Pops the head element, or `None` when the queue is empty.
    ///
    /// A shutdown pill is reported without being removed; an error pill is
    /// consumed together with everything behind it.
    fn take_head(&mut self) -> Option<PoolResult<Worker>> {
        match self.items.front() {
            None => return None,
            Some(PoolElement::ShutdownPill) => return Some(Err(PoolError::Shutdown)),
            Some(_) => {}
        }
        match self.items.pop_front() {
            Some(PoolElement::Worker(worker)) => Some(Ok(worker)),
            Some(PoolElement::ErrorPill { cause }) => {
                self.items.clear();
                Some(Err(PoolError::Corrupted {
                    context: "pool was cleared after a fatal error".into(),
                    cause,
                }))
            }
            // Head was checked above: non-empty, not a shutdown pill.
            _ => None,
        }
    }
}

/// Fixed-capacity blocking container of workers.
///
/// Two synchronization facts live behind one mutex: element availability
/// (borrowers wait for a non-empty queue) and the pool lock (borrowers
/// wait at the gate while a drain collects every instance). Returns
/// always succeed, even while the pool is locked, so that a drain waiting
/// on outstanding borrows can make progress.
#[derive(Debug)]
pub struct WorkerQueue {
    capacity: usize,
    state: Mutex<QueueState>,
    /// Woken on every insert, return, unregister, pill and unlock.
    changed: Condvar,
}

impl WorkerQueue {
    /// Creates an empty queue with a fixed capacity.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(capacity + 1),
                registered: 0,
                borrowed: 0,
                locked: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Fixed capacity set at construction.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Worker slots not yet filled.
    pub fn remaining_capacity(&self) -> usize {
        let st = self.state.lock().unwrap();
        self.capacity - st.registered
    }

    /// Workers sitting idle in the queue.
    pub fn idle_count(&self) -> usize {
        self.state.lock().unwrap().idle_workers()
    }

    /// Live workers owned by the pool, idle or borrowed.
    pub fn registered_count(&self) -> usize {
        self.state.lock().unwrap().registered
    }

    /// Workers currently held by borrowers.
    pub fn borrowed_count(&self) -> usize {
        self.state.lock().unwrap().borrowed
    }

    /// Whether a drain currently holds the pool lock.
    pub fn is_locked(&self) -> bool {
        self.state.lock().unwrap().locked
    }

    /// Creation placement: adds a newly constructed worker to the pool.
    ///
    /// Non-blocking; returns `false` when the pool already owns `capacity`
    /// workers.
    pub fn register(&self, worker: Worker) -> bool {
        let mut st = self.state.lock().unwrap();
        if st.registered >= self.capacity {
            return false;
        }
        st.registered += 1;
        st.items.push_back(PoolElement::Worker(worker));
        self.changed.notify_all();
        true
    }

    /// Removes one borrowed worker from circulation ahead of its cleanup.
    pub fn unregister(&self) {
        let mut st = self.state.lock().unwrap();
        st.registered = st.registered.saturating_sub(1);
        st.borrowed = st.borrowed.saturating_sub(1);
        self.changed.notify_all();
    }

    /// Places a previously borrowed worker back.
    ///
    /// Returning a worker that was not borrowed from this pool is a
    /// caller bug.
    pub fn return_worker(&self, worker: Worker) {
        let mut st = self.state.lock().unwrap();
        st.borrowed = st.borrowed.saturating_sub(1);
        st.items.push_back(PoolElement::Worker(worker));
        self.changed.notify_all();
    }

    /// Blocks until a worker is available or a pill is observed.
    pub fn borrow(&self) -> PoolResult<Worker> {
        let mut st = self.state.lock().unwrap();
        loop {
            if !st.locked {
                if let Some(result) = st.take_head() {
                    if result.is_ok() {
                        st.borrowed += 1;
                    }
                    return result;
                }
            }
            st = self.changed.wait(st).unwrap();
        }
    }

    /// Like [`borrow`](Self::borrow), giving up after `timeout`.
    ///
    /// Returns `Ok(None)` when the timeout expires first.
    pub fn borrow_timeout(&self, timeout: Duration) -> PoolResult<Option<Worker>> {
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock().unwrap();
        loop {
            if !st.locked {
                if let Some(result) = st.take_head() {
                    if result.is_ok() {
                        st.borrowed += 1;
                    }
                    return result.map(Some);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = self.changed.wait_timeout(st, deadline - now).unwrap();
            st = guard;
        }
    }

    /// Acquires the exclusive pool lock.
    ///
    /// Claims the gate (new borrows block immediately), then waits for
    /// every outstanding borrow to come home. Fails with
    /// [`PoolError::LockTimeout`] if either step exceeds `timeout`, in
    /// which case the pool is left exactly as it was found.
    pub fn lock_with_timeout(&self, timeout: Duration) -> PoolResult<PoolLockGuard<'_>> {
        let timeout_err = PoolError::LockTimeout {
            waited_ms: timeout.as_millis() as u64,
        };
        let deadline = Instant::now() + timeout;
        let mut st = self.state.lock().unwrap();

        while st.locked {
            let now = Instant::now();
            if now >= deadline {
                return Err(timeout_err);
            }
            let (guard, _) = self.changed.wait_timeout(st, deadline - now).unwrap();
            st = guard;
        }
        st.locked = true;

        while st.borrowed > 0 {
            let now = Instant::now();
            if now >= deadline {
                st.locked = false;
                self.changed.notify_all();
                return Err(timeout_err);
            }
            let (guard, _) = self.changed.wait_timeout(st, deadline - now).unwrap();
            st = guard;
        }

        Ok(PoolLockGuard { queue: self })
    }

    /// Places a sentinel where the next borrower will observe it.
    pub fn insert_pill(&self, pill: PoolElement) {
        debug_assert!(!matches!(pill, PoolElement::Worker(_)));
        let mut st = self.state.lock().unwrap();
        st.items.push_front(pill);
        self.changed.notify_all();
    }

    /// Removes every element and forgets all registered workers.
    pub fn clear(&self) {
        let mut st = self.state.lock().unwrap();
        st.items.clear();
        st.registered = 0;
    }
}

/// Exclusive pool lock held while a drain collects every instance.
///
/// While the guard is alive, new borrowers block at the gate. Dropping
/// the guard releases the lock and wakes every waiter.
#[derive(Debug)]
pub struct PoolLockGuard<'a> {
    queue: &'a WorkerQueue,
}

impl PoolLockGuard<'_> {
    /// Privileged borrow that bypasses the gate and takes the worker out
    /// of circulation.
    ///
    /// Never blocks: the lock acquisition already waited for every
    /// outstanding borrow to come home. `None` means the queue is
    /// exhausted.
    pub fn try_take(&self) -> Option<PoolResult<Worker>> {
        let mut st = self.queue.state.lock().unwrap();
        let result = st.take_head();
        if let Some(Ok(_)) = &result {
            st.registered = st.registered.saturating_sub(1);
        }
        result
    }
}

impl Drop for PoolLockGuard<'_> {
    fn drop(&mut self) {
        let mut st = self.queue.state.lock().unwrap();
        st.locked = false;
        self.queue.changed.notify_all();
    }
}
