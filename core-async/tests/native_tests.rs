//! Integration tests for the runtime facade.

use core_async::sync::{CancellationToken, Notify, Semaphore};
use core_async::{sync, task, time};
use std::sync::Arc;

#[core_async::test]
async fn test_task_spawn() {
    let handle = task::spawn(async { 42 });
    assert_eq!(handle.await.unwrap(), 42);
}

#[core_async::test]
async fn test_panic_message_is_recovered() {
    let handle = task::spawn(async {
        panic!("unit of work exploded");
    });

    let err = handle.await.unwrap_err();
    assert!(err.is_panic());
    assert_eq!(task::panic_message(err), "unit of work exploded");
}

#[core_async::test]
async fn test_timeout_elapsed() {
    let result = time::timeout(time::Duration::from_millis(10), async {
        time::sleep(time::Duration::from_millis(200)).await;
    })
    .await;

    assert!(result.is_err());
}

#[core_async::test]
async fn test_cancellation_interrupts_sleep() {
    let token = CancellationToken::new();
    let child = token.clone();

    let handle = task::spawn(async move {
        core_async::select! {
            _ = child.cancelled() => "cancelled",
            _ = time::sleep(time::Duration::from_secs(30)) => "slept",
        }
    });

    time::sleep(time::Duration::from_millis(10)).await;
    token.cancel();

    let start = time::Instant::now();
    assert_eq!(handle.await.unwrap(), "cancelled");
    assert!(start.elapsed() < time::Duration::from_secs(1));
}

#[core_async::test]
async fn test_owned_permits_bound_concurrency() {
    let semaphore = Arc::new(Semaphore::new(2));
    let running = Arc::new(sync::Mutex::new(0usize));
    let peak = Arc::new(sync::Mutex::new(0usize));
    let mut set = task::JoinSet::new();

    for _ in 0..6 {
        let permit = semaphore.clone().acquire_owned().await.unwrap();
        let running = running.clone();
        let peak = peak.clone();
        set.spawn(async move {
            {
                let mut current = running.lock().await;
                *current += 1;
                let mut max = peak.lock().await;
                *max = (*max).max(*current);
            }
            time::sleep(time::Duration::from_millis(5)).await;
            *running.lock().await -= 1;
            drop(permit);
        });
    }

    while set.join_next().await.is_some() {}

    assert!(*peak.lock().await <= 2);
    assert_eq!(semaphore.available_permits(), 2);
}

#[core_async::test]
async fn test_notify_wakes_waiter() {
    let notify = Arc::new(Notify::new());
    let waiter = notify.clone();

    let handle = task::spawn(async move {
        waiter.notified().await;
        "notified"
    });

    time::sleep(time::Duration::from_millis(10)).await;
    notify.notify_one();

    assert_eq!(handle.await.unwrap(), "notified");
}

#[core_async::test]
async fn test_broadcast_channel() {
    let (tx, mut rx1) = sync::broadcast::channel(10);
    let mut rx2 = tx.subscribe();

    for i in 0..3 {
        tx.send(i).unwrap();
    }

    for expected in 0..3 {
        assert_eq!(rx1.recv().await.unwrap(), expected);
        assert_eq!(rx2.recv().await.unwrap(), expected);
    }
}

#[test]
fn test_now_millis_is_positive() {
    assert!(time::now_millis() > 0);
}
