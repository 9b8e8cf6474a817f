//! Property-based tests for work queue dedup using proptest.
//!
//! Properties verified:
//! - Any sequence of adds leaves each distinct key queued exactly once
//! - Adds for an in-flight key collapse into exactly one follow-up

#![allow(clippy::panic)]

use proptest::prelude::*;
use sidecar_workqueue::WorkQueue;

/// Test helper: Unwrap a Result or panic with context
fn unwrap_result<T, E: std::fmt::Display>(result: std::result::Result<T, E>, context: &str) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("{}: {}", context, e),
    }
}

/// Test helper: Unwrap an Option or panic with context
fn unwrap_option<T>(option: Option<T>, context: &str) -> T {
    match option {
        Some(value) => value,
        None => panic!("{}", context),
    }
}

fn runtime() -> tokio::runtime::Runtime {
    unwrap_result(
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build(),
        "runtime creation should succeed",
    )
}

// ==========================================================================
// PROPERTY: Dedup of pending keys
// ==========================================================================

proptest! {
    /// Property: the queue length equals the number of distinct keys added.
    #[test]
    fn prop_pending_keys_are_unique(keys in proptest::collection::vec(0u8..8, 0..64)) {
        let queue: WorkQueue<u8> = WorkQueue::new();
        for key in &keys {
            queue.add(*key);
        }

        let distinct: std::collections::HashSet<u8> = keys.iter().copied().collect();
        prop_assert_eq!(queue.len(), distinct.len());
    }

    /// Property: the dequeue order is the order of first insertion.
    #[test]
    fn prop_dequeue_follows_first_insertion(keys in proptest::collection::vec(0u8..8, 1..32)) {
        let queue: WorkQueue<u8> = WorkQueue::new();
        let mut expected = Vec::new();
        for key in &keys {
            if !expected.contains(key) {
                expected.push(*key);
            }
            queue.add(*key);
        }

        let rt = runtime();
        let dequeued: Vec<u8> = rt.block_on(async {
            let mut out = Vec::new();
            for _ in 0..expected.len() {
                let key = unwrap_option(queue.get().await, "queued key should be returned");
                queue.done(&key);
                out.push(key);
            }
            out
        });

        prop_assert_eq!(dequeued, expected);
    }

    /// Property: N adds while a key is in flight leave exactly one queued
    /// instance after the worker calls done.
    #[test]
    fn prop_in_flight_adds_collapse(n in 1usize..50) {
        let queue: WorkQueue<String> = WorkQueue::new();
        queue.add("ns/pod".to_string());

        let rt = runtime();
        let key = unwrap_option(rt.block_on(queue.get()), "key should be returned");

        for _ in 0..n {
            queue.add("ns/pod".to_string());
        }
        prop_assert_eq!(queue.len(), 0);

        queue.done(&key);
        prop_assert_eq!(queue.len(), 1);
        prop_assert_eq!(queue.in_flight(), 0);
    }
}
