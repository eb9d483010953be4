//! Integration tests for named locks and batch counters.

use request_injector::locker::Locker;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn only_one_non_blocking_acquire_wins() {
    let locker = Arc::new(Locker::new());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let locker = Arc::clone(&locker);
        handles.push(tokio::spawn(async move {
            let guard = locker.lock("PPD-Run3-00001").try_acquire();
            let won = guard.is_some();
            tokio::time::sleep(Duration::from_millis(20)).await;
            drop(guard);
            won
        }));
    }

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn dropping_the_guard_releases_the_lock() {
    let locker = Locker::new();
    let lock = locker.lock("PPD-Run3-00001");

    let guard = lock.try_acquire().expect("first acquire");
    assert!(lock.is_held());
    assert!(locker.lock("PPD-Run3-00001").try_acquire().is_none());

    guard.release();
    assert!(!lock.is_held());
    assert!(lock.try_acquire().is_some());
}

#[tokio::test]
async fn distinct_keys_do_not_contend() {
    let locker = Locker::new();
    let _a = locker.lock("a").try_acquire().unwrap();
    assert!(locker.lock("b").try_acquire().is_some());
}

#[tokio::test]
async fn blocking_acquire_waits_for_release() {
    let locker = Arc::new(Locker::new());
    let guard = locker.lock("gate").acquire().await;

    let waiter = {
        let locker = Arc::clone(&locker);
        tokio::spawn(async move {
            let _guard = locker.lock("gate").acquire().await;
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    drop(guard);
    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("waiter should get the lock")
        .unwrap();
}

// ---------------------------------------------------------------------------
// Batch counters
// ---------------------------------------------------------------------------

#[tokio::test]
async fn counters_are_paired_and_never_negative() {
    let locker = Locker::new();
    assert_eq!(locker.increment("Run3-00001").await, 1);
    assert_eq!(locker.increment("Run3-00001").await, 2);
    assert_eq!(locker.decrement("Run3-00001").await, 1);
    assert_eq!(locker.decrement("Run3-00001").await, 0);
    assert_eq!(locker.decrement("Run3-00001").await, 0);
}

#[tokio::test]
async fn counter_returns_to_zero_when_the_body_fails() {
    let locker = Arc::new(Locker::new());

    async fn failing_body(locker: &Locker) -> Result<(), String> {
        let ticket = locker.begin_batch("Run3-00002").await;
        assert_eq!(locker.events("Run3-00002").await, 1);
        let result: Result<(), String> = Err("remote failed".into());
        ticket.release().await;
        result
    }

    assert!(failing_body(&locker).await.is_err());
    assert_eq!(locker.events("Run3-00002").await, 0);
}

#[tokio::test]
async fn counter_returns_to_zero_when_the_body_panics() {
    let locker = Arc::new(Locker::new());

    let job = {
        let locker = Arc::clone(&locker);
        tokio::spawn(async move {
            let _ticket = locker.begin_batch("Run3-00003").await;
            panic!("job blew up");
        })
    };
    assert!(job.await.unwrap_err().is_panic());

    // The ticket's drop decrements in place when the lock is free.
    assert_eq!(locker.events("Run3-00003").await, 0);
}

#[tokio::test]
async fn concurrent_tickets_all_balance_out() {
    let locker = Arc::new(Locker::new());

    let mut handles = Vec::new();
    for _ in 0..16 {
        let locker = Arc::clone(&locker);
        handles.push(tokio::spawn(async move {
            let ticket = locker.begin_batch("Run3-00004").await;
            tokio::task::yield_now().await;
            ticket.release().await;
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(locker.events("Run3-00004").await, 0);
}
