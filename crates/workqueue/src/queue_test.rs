//! Tests for the work queue.
//!
//! Validates dedup, in-flight tracking, rate-limited requeues and shutdown.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::arithmetic_side_effects)]

use std::time::Duration;

use crate::queue::WorkQueue;
use crate::rate_limiter::ItemExponentialBackoff;

fn test_queue() -> WorkQueue<String> {
    WorkQueue::with_rate_limiter(ItemExponentialBackoff::new(
        Duration::from_millis(5),
        Duration::from_secs(1),
    ))
}

#[tokio::test]
async fn test_add_deduplicates_pending_keys() {
    let queue = test_queue();

    queue.add("ns/a".to_string());
    queue.add("ns/a".to_string());
    queue.add("ns/a".to_string());

    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn test_get_is_fifo() {
    let queue = test_queue();
    queue.add("ns/a".to_string());
    queue.add("ns/b".to_string());

    assert_eq!(queue.get().await.as_deref(), Some("ns/a"));
    assert_eq!(queue.get().await.as_deref(), Some("ns/b"));
    assert_eq!(queue.in_flight(), 2);
}

#[tokio::test]
async fn test_add_while_processing_requeues_on_done() {
    let queue = test_queue();
    queue.add("ns/a".to_string());

    let key = queue.get().await.expect("key should be available");

    // Notifications for an in-flight key merge into a single follow-up.
    queue.add("ns/a".to_string());
    queue.add("ns/a".to_string());
    assert_eq!(queue.len(), 0);

    queue.done(&key);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.in_flight(), 0);

    let again = queue.get().await.expect("key should be requeued");
    assert_eq!(again, "ns/a");
}

#[tokio::test]
async fn test_done_without_readd_drops_key() {
    let queue = test_queue();
    queue.add("ns/a".to_string());

    let key = queue.get().await.expect("key should be available");
    queue.done(&key);

    assert!(queue.is_empty());
    assert_eq!(queue.in_flight(), 0);
}

#[tokio::test]
async fn test_shut_down_wakes_blocked_get() {
    let queue = test_queue();
    let waiter = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.get().await })
    };

    tokio::task::yield_now().await;
    queue.shut_down();

    let result = tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("blocked get should return promptly")
        .expect("task should not panic");
    assert!(result.is_none());
}

#[tokio::test]
async fn test_get_after_shut_down_returns_none() {
    let queue = test_queue();
    queue.add("ns/a".to_string());
    queue.shut_down();

    assert!(queue.get().await.is_none());
    assert!(queue.is_shutting_down());
}

#[tokio::test]
async fn test_add_after_shut_down_is_dropped() {
    let queue = test_queue();
    queue.shut_down();
    queue.add("ns/a".to_string());
    queue.add_rate_limited("ns/b".to_string());

    assert!(queue.is_empty());
}

#[tokio::test]
async fn test_shut_down_is_idempotent() {
    let queue = test_queue();
    queue.shut_down();
    queue.shut_down();
    assert!(queue.get().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_add_rate_limited_counts_and_delays() {
    let queue = test_queue();
    let key = "ns/a".to_string();

    queue.add_rate_limited(key.clone());
    assert_eq!(queue.num_requeues(&key), 1);
    assert!(queue.is_empty());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(queue.len(), 1);

    queue.forget(&key);
    assert_eq!(queue.num_requeues(&key), 0);
}

#[tokio::test(start_paused = true)]
async fn test_backoff_grows_between_requeues() {
    let queue = test_queue();
    let key = "ns/a".to_string();

    queue.add_rate_limited(key.clone()); // 5ms
    queue.add_rate_limited(key.clone()); // 10ms, merged into the same pending key
    assert_eq!(queue.num_requeues(&key), 2);

    tokio::time::sleep(Duration::from_millis(6)).await;
    assert_eq!(queue.len(), 1);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn test_add_after_zero_is_immediate() {
    let queue = test_queue();
    queue.add_after("ns/a".to_string(), Duration::ZERO);
    assert_eq!(queue.len(), 1);
}

#[tokio::test]
async fn test_shut_down_with_drain_waits_for_in_flight() {
    let queue = test_queue();
    queue.add("ns/a".to_string());
    let key = queue.get().await.expect("key should be available");

    let drain = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.shut_down_with_drain().await })
    };

    tokio::task::yield_now().await;
    assert!(!drain.is_finished());

    queue.done(&key);
    tokio::time::timeout(Duration::from_secs(1), drain)
        .await
        .expect("drain should finish once the key is done")
        .expect("task should not panic");
    assert_eq!(queue.in_flight(), 0);
}

#[tokio::test]
async fn test_done_after_shut_down_does_not_requeue() {
    let queue = test_queue();
    queue.add("ns/a".to_string());
    let key = queue.get().await.expect("key should be available");
    queue.add("ns/a".to_string());

    queue.shut_down();
    queue.done(&key);

    assert!(queue.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_workers_never_share_a_key() {
    use std::collections::HashSet;
    use std::sync::{Arc, Mutex};

    let queue = test_queue();
    let active = Arc::new(Mutex::new(HashSet::new()));
    let overlaps = Arc::new(Mutex::new(0usize));

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let queue = queue.clone();
            let active = Arc::clone(&active);
            let overlaps = Arc::clone(&overlaps);
            tokio::spawn(async move {
                while let Some(key) = queue.get().await {
                    if !active.lock().unwrap().insert(key.clone()) {
                        *overlaps.lock().unwrap() += 1;
                    }
                    tokio::task::yield_now().await;
                    active.lock().unwrap().remove(&key);
                    queue.done(&key);
                }
            })
        })
        .collect();

    for round in 0..50 {
        for id in 0..5 {
            queue.add(format!("ns/pod-{id}"));
        }
        if round % 10 == 0 {
            tokio::task::yield_now().await;
        }
    }

    tokio::time::sleep(Duration::from_millis(50)).await;
    queue.shut_down();
    for worker in workers {
        worker.await.unwrap();
    }

    assert_eq!(*overlaps.lock().unwrap(), 0);
}
