//! # Work Queue
//!
//! Deduplicating, rate-limited work queue that decouples change notifications
//! from reconciliation.
//!
//! ```ignore
//! use sidecar_workqueue::WorkQueue;
//!
//! let queue: WorkQueue<String> = WorkQueue::new();
//! queue.add("default/web-0".to_string());
//!
//! while let Some(key) = queue.get().await {
//!     match process(&key).await {
//!         Ok(()) => queue.forget(&key),
//!         Err(_) if queue.num_requeues(&key) < 3 => queue.add_rate_limited(key.clone()),
//!         Err(_) => queue.forget(&key),
//!     }
//!     queue.done(&key);
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod queue;
pub mod rate_limiter;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use queue::WorkQueue;
pub use rate_limiter::{
    ItemExponentialBackoff, MaxOf, RateLimiter, TokenBucket, default_controller_rate_limiter,
    exponential_delay,
};

/// Lock a mutex, recovering the guard if a previous holder panicked.
///
/// Every critical section leaves the state valid before anything that can
/// panic.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// Include test modules
#[cfg(test)]
mod queue_test;
