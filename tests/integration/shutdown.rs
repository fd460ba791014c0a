//! Shutdown and pill observation scenarios.

use std::thread;
use std::time::{Duration, Instant};

use crate::helpers::{primed_pool, RecordingHooks};

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[test]
fn test_shutdown_poisons_every_future_borrow() {
    let hooks = RecordingHooks::new();
    let pool = primed_pool(&hooks, 2, FLUSH_TIMEOUT);

    pool.flush_for_shutdown().unwrap();

    assert_eq!(hooks.count("cleanup"), 2);
    assert_eq!(pool.stats().registered, 0);

    // The shutdown pill is observed repeatedly, never consumed.
    for _ in 0..3 {
        let err = pool.borrow().unwrap_err();
        assert!(err.is_shutdown());
    }
}

#[test]
fn test_shutdown_is_idempotent() {
    let hooks = RecordingHooks::new();
    let pool = primed_pool(&hooks, 2, FLUSH_TIMEOUT);

    pool.flush_for_shutdown().unwrap();
    pool.flush_for_shutdown().unwrap();

    assert_eq!(hooks.count("cleanup"), 2);
    assert!(pool.borrow().unwrap_err().is_shutdown());
}

#[test]
fn test_shutdown_waits_for_outstanding_borrower() {
    let hooks = RecordingHooks::new();
    let pool = primed_pool(&hooks, 2, FLUSH_TIMEOUT);

    let held = pool.borrow().unwrap();

    let shutter = {
        let pool = pool.clone();
        thread::spawn(move || pool.flush_for_shutdown())
    };

    thread::sleep(Duration::from_millis(50));
    pool.return_worker(held);

    shutter.join().unwrap().unwrap();
    assert_eq!(hooks.count("cleanup"), 2);
    assert!(pool.borrow().unwrap_err().is_shutdown());
}

#[test]
fn test_lock_released_before_cleanup_finishes() {
    let hooks = RecordingHooks::new();
    let pool = primed_pool(&hooks, 2, FLUSH_TIMEOUT);
    hooks.set_cleanup_delay(Duration::from_millis(150));

    let start = Instant::now();
    let done = pool.drain_and_refill(false).unwrap();

    // The gate opened before the first cleanup completed.
    assert!(start.elapsed() < Duration::from_millis(100));
    assert!(!pool.stats().locked);
    assert!(!done.wait_timeout(Duration::from_millis(10)));

    // A borrower blocks on the empty queue rather than the gate; it is
    // not an error, just a timeout.
    assert!(pool
        .borrow_timeout(Duration::from_millis(20))
        .unwrap()
        .is_none());

    done.wait_timeout(Duration::from_secs(5));
    assert_eq!(hooks.count("cleanup"), 2);
    assert_eq!(pool.stats().registered, 0);
}
