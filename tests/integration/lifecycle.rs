//! Prime, flush-one and drain-and-refill scenarios.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ruby_pool::{PoolConfig, PoolContext, Worker, WorkerLifecycle};

use crate::helpers::{pool_with, primed_pool, RecordingHooks};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Borrows every worker, returning the ids found.
fn drain_ids(pool: &PoolContext, count: usize) -> Vec<i32> {
    let workers: Vec<Worker> = (0..count)
        .map(|_| {
            pool.borrow_timeout(Duration::from_secs(2))
                .unwrap()
                .expect("worker available")
        })
        .collect();
    let mut ids: Vec<i32> = workers.iter().map(Worker::id).collect();
    for w in workers {
        pool.return_worker(w);
    }
    ids.sort_unstable();
    ids
}

#[test]
fn test_prime_fills_pool() {
    let hooks = RecordingHooks::new();
    let pool = pool_with(&hooks, 3, FLUSH_TIMEOUT);

    let stats = pool.stats();
    assert_eq!(stats.registered, 0);
    assert_eq!(stats.idle, 0);

    pool.prime().wait();

    let stats = pool.stats();
    assert_eq!(stats.registered, 3);
    assert_eq!(stats.idle, 3);
    assert_eq!(drain_ids(&pool, 3), vec![1, 2, 3]);
}

#[test]
fn test_prime_constructs_first_instance_alone() {
    let hooks = RecordingHooks::new();
    let _pool = primed_pool(&hooks, 4, FLUSH_TIMEOUT);

    let events = hooks.events();
    assert_eq!(events.len(), 4);
    // Instance 1 is constructed on its own before the parallel batch.
    assert_eq!(events[0], "create 1");
}

#[test]
fn test_prime_of_full_pool_is_a_no_op() {
    let hooks = RecordingHooks::new();
    let pool = primed_pool(&hooks, 2, FLUSH_TIMEOUT);

    pool.prime().wait();

    assert_eq!(hooks.count("create"), 2);
    assert_eq!(pool.stats().registered, 2);
}

#[test]
fn test_borrowers_never_exceed_pool_size() {
    let hooks = RecordingHooks::new();
    let pool = primed_pool(&hooks, 3, FLUSH_TIMEOUT);

    let held = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let threads: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            let held = Arc::clone(&held);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                for _ in 0..50 {
                    let worker = pool.borrow().unwrap();
                    let now = held.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    held.fetch_sub(1, Ordering::SeqCst);
                    pool.return_worker(worker);
                }
            })
        })
        .collect();

    for t in threads {
        t.join().unwrap();
    }
    assert!(peak.load(Ordering::SeqCst) <= 3);
}

#[test]
fn test_flush_one_advances_id_by_pool_size() {
    let hooks = RecordingHooks::new();
    let pool = primed_pool(&hooks, 4, FLUSH_TIMEOUT);

    let mut workers: Vec<Worker> = (0..4).map(|_| pool.borrow().unwrap()).collect();
    let pos = workers.iter().position(|w| w.id() == 3).unwrap();
    let target = workers.swap_remove(pos);
    for w in workers {
        pool.return_worker(w);
    }

    pool.flush_one(target).wait();
    assert_eq!(drain_ids(&pool, 4), vec![1, 2, 4, 7]);

    // Flushing the replacement advances it again: 7 + 4 = 11.
    let mut workers: Vec<Worker> = (0..4).map(|_| pool.borrow().unwrap()).collect();
    let pos = workers.iter().position(|w| w.id() == 7).unwrap();
    let target = workers.swap_remove(pos);
    for w in workers {
        pool.return_worker(w);
    }

    pool.flush_one(target).wait();
    assert_eq!(drain_ids(&pool, 4), vec![1, 2, 4, 11]);
    assert_eq!(hooks.count("cleanup"), 2);
}

#[test]
fn test_flush_pool_replaces_every_worker() {
    let hooks = RecordingHooks::new();
    let pool = primed_pool(&hooks, 2, FLUSH_TIMEOUT);

    pool.flush_pool().unwrap();

    let stats = pool.stats();
    assert_eq!(stats.registered, 2);
    assert_eq!(drain_ids(&pool, 2), vec![3, 4]);

    // The first pair is retired and replaced before the rest start.
    let events = hooks.events();
    assert_eq!(&events[..2], &["create 1", "create 2"]);
    assert_eq!(&events[2..4], &["cleanup 1", "create 3"]);
}

#[test]
fn test_refill_preserves_residue_mod_pool_size() {
    let hooks = RecordingHooks::new();
    let pool = primed_pool(&hooks, 3, FLUSH_TIMEOUT);

    pool.flush_pool().unwrap();
    pool.flush_pool().unwrap();

    let ids = drain_ids(&pool, 3);
    assert_eq!(ids, vec![7, 8, 9]);
    for (slot, id) in ids.iter().enumerate() {
        assert_eq!(id.rem_euclid(3) as usize, (slot + 1) % 3);
    }
}

#[test]
fn test_drain_and_refill_does_not_block_caller() {
    let hooks = RecordingHooks::new();
    let pool = primed_pool(&hooks, 2, FLUSH_TIMEOUT);
    hooks.set_cleanup_delay(Duration::from_millis(100));

    let start = Instant::now();
    let done = pool.drain_and_refill(true).unwrap();
    assert!(
        start.elapsed() < Duration::from_millis(100),
        "caller returns after borrow-and-unlock, before cleanup"
    );

    // Cleanup is still in flight on the mutator.
    assert!(!done.wait_timeout(Duration::from_millis(10)));
    assert!(done.wait_timeout(Duration::from_secs(5)));

    assert_eq!(pool.stats().registered, 2);
    assert_eq!(hooks.count("cleanup"), 2);
}

#[test]
fn test_lock_timeout_leaves_pool_unchanged() {
    let hooks = RecordingHooks::new();
    let pool = primed_pool(&hooks, 2, Duration::from_millis(50));

    let held = pool.borrow().unwrap();

    let start = Instant::now();
    let err = pool.flush_pool().unwrap_err();
    let elapsed = start.elapsed();

    assert!(err.is_lock_timeout());
    assert!(elapsed >= Duration::from_millis(50));
    assert!(elapsed < Duration::from_millis(150));

    // No pill was placed and no cleanup ran.
    assert_eq!(hooks.count("cleanup"), 0);
    let stats = pool.stats();
    assert_eq!(stats.registered, 2);
    assert!(!stats.locked);

    let other = pool
        .borrow_timeout(Duration::from_millis(100))
        .unwrap()
        .expect("remaining worker still borrowable");
    pool.return_worker(other);
    pool.return_worker(held);
}

#[test]
fn test_construction_failure_during_refill() {
    let hooks = RecordingHooks::new();
    let pool = primed_pool(&hooks, 3, FLUSH_TIMEOUT);

    // Ids 1..3 refill as 4..6; the second replacement fails.
    hooks.fail_create(5, "gem install failed");

    let err = pool.flush_pool().unwrap_err();
    assert!(err.is_corrupted());
    assert_eq!(err.cause(), Some("gem install failed"));
    assert_eq!(hooks.fatal_errors(), 1);

    // The queue holds exactly one error pill and zero workers.
    let err = pool.borrow().unwrap_err();
    assert!(err.is_corrupted());
    assert_eq!(err.cause(), Some("gem install failed"));
    assert!(pool
        .borrow_timeout(Duration::from_millis(20))
        .unwrap()
        .is_none());
}

#[test]
fn test_construction_failure_during_prime() {
    let hooks = RecordingHooks::new();
    let pool = pool_with(&hooks, 2, FLUSH_TIMEOUT);
    hooks.fail_create(2, "boom");

    pool.prime().wait();

    assert_eq!(hooks.fatal_errors(), 1);
    let cause = pool.take_fatal_cause().expect("cause recorded");
    assert_eq!(cause.cause(), Some("boom"));

    let err = pool.borrow().unwrap_err();
    assert_eq!(err.cause(), Some("boom"));
    assert_eq!(pool.stats().registered, 0);
}

#[test]
fn test_should_flush_after_request_limit() {
    let hooks = RecordingHooks::new();
    let config = PoolConfig::new()
        .with_pool_size(1)
        .with_max_requests_per_instance(2);
    let pool = PoolContext::new(config, hooks.clone() as Arc<dyn WorkerLifecycle>).unwrap();
    pool.prime().wait();

    let mut worker = pool.borrow().unwrap();
    assert!(!pool.should_flush(&worker));
    worker.note_request();
    assert!(!pool.should_flush(&worker));
    worker.note_request();
    assert!(pool.should_flush(&worker));

    pool.flush_one(worker).wait();
    let replacement = pool.borrow().unwrap();
    assert_eq!(replacement.id(), 2);
    assert_eq!(replacement.request_count(), 0);
    pool.return_worker(replacement);
}
