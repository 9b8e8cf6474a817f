//! Rate limiters deciding how long a requeued item waits.
//!
//! # Algorithms
//!
//! - [`ItemExponentialBackoff`]: per-key delay `base * 2^failures`, capped at
//!   `max`. The failure count doubles as the key's requeue counter.
//! - [`TokenBucket`]: overall admission limit shared by every key.
//! - [`MaxOf`]: the worst delay of its members.
//!
//! [`default_controller_rate_limiter`] combines the first two the way
//! Kubernetes controllers usually do.
//!
//! # Persistence
//!
//! State is in-memory only and resets on process restart.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::lock;

/// Base delay of the default per-item backoff.
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(5);
/// Cap of the default per-item backoff.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(1000);
/// Sustained rate of the default token bucket.
pub const DEFAULT_QPS: f64 = 10.0;
/// Burst size of the default token bucket.
pub const DEFAULT_BURST: u32 = 100;

/// Decides the delay before a key is re-added and tracks its requeue count.
pub trait RateLimiter<K>: Send + Sync {
    /// Delay for the next requeue of `key`. Records a failure for the key.
    fn when(&self, key: &K) -> Duration;

    /// Stop tracking `key`, resetting its requeue count.
    fn forget(&self, key: &K);

    /// Number of times `key` has been requeued since it was last forgotten.
    fn num_requeues(&self, key: &K) -> u32;
}

/// Calculate `base * 2^attempt`, capped at `max`.
pub fn exponential_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    2u32.checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(max, |delay| delay.min(max))
}

/// Per-key exponential backoff.
pub struct ItemExponentialBackoff<K> {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K> ItemExponentialBackoff<K> {
    /// Create a backoff starting at `base` and capped at `max`.
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }
}

impl<K> Default for ItemExponentialBackoff<K> {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY)
    }
}

impl<K> RateLimiter<K> for ItemExponentialBackoff<K>
where
    K: Clone + Eq + Hash + Send + Sync,
{
    fn when(&self, key: &K) -> Duration {
        let mut failures = lock(&self.failures);
        let count = failures.entry(key.clone()).or_insert(0);
        let attempt = *count;
        *count = count.saturating_add(1);
        exponential_delay(attempt, self.base, self.max)
    }

    fn forget(&self, key: &K) {
        lock(&self.failures).remove(key);
    }

    fn num_requeues(&self, key: &K) -> u32 {
        lock(&self.failures).get(key).copied().unwrap_or(0)
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token bucket shared by all keys: `qps` sustained, `burst` at most.
pub struct TokenBucket {
    qps: f64,
    burst: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst);
        Self {
            qps,
            burst,
            state: Mutex::new(BucketState {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Reserve one token and return how long the caller must wait for it.
    fn reserve(&self) -> Duration {
        if self.qps <= 0.0 {
            return Duration::ZERO;
        }

        let mut state = lock(&self.state);
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.tokens = elapsed
            .as_secs_f64()
            .mul_add(self.qps, state.tokens)
            .min(self.burst);
        state.last_refill = now;
        state.tokens -= 1.0;

        if state.tokens >= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(-state.tokens / self.qps)
        }
    }
}

impl Default for TokenBucket {
    fn default() -> Self {
        Self::new(DEFAULT_QPS, DEFAULT_BURST)
    }
}

impl<K> RateLimiter<K> for TokenBucket {
    fn when(&self, _key: &K) -> Duration {
        self.reserve()
    }

    fn forget(&self, _key: &K) {}

    fn num_requeues(&self, _key: &K) -> u32 {
        0
    }
}

/// Combines limiters by taking the longest delay and the highest requeue count.
pub struct MaxOf<K> {
    limiters: Vec<Box<dyn RateLimiter<K>>>,
}

impl<K> MaxOf<K> {
    pub fn new(limiters: Vec<Box<dyn RateLimiter<K>>>) -> Self {
        Self { limiters }
    }
}

impl<K> RateLimiter<K> for MaxOf<K> {
    fn when(&self, key: &K) -> Duration {
        // Every member must observe the failure, so no short-circuiting.
        self.limiters
            .iter()
            .map(|limiter| limiter.when(key))
            .fold(Duration::ZERO, Duration::max)
    }

    fn forget(&self, key: &K) {
        for limiter in &self.limiters {
            limiter.forget(key);
        }
    }

    fn num_requeues(&self, key: &K) -> u32 {
        self.limiters
            .iter()
            .map(|limiter| limiter.num_requeues(key))
            .max()
            .unwrap_or(0)
    }
}

/// Per-item exponential backoff (5ms .. 1000s) combined with an overall
/// 10 qps / 100 burst token bucket.
pub fn default_controller_rate_limiter<K>() -> MaxOf<K>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
{
    MaxOf::new(vec![
        Box::new(ItemExponentialBackoff::<K>::default()),
        Box::new(TokenBucket::default()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_delay_doubles() {
        let base = Duration::from_millis(100);
        let max = Duration::from_secs(10);

        assert_eq!(exponential_delay(0, base, max), Duration::from_millis(100));
        assert_eq!(exponential_delay(1, base, max), Duration::from_millis(200));
        assert_eq!(exponential_delay(2, base, max), Duration::from_millis(400));
    }

    #[test]
    fn test_exponential_delay_capped() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(5);

        assert_eq!(exponential_delay(10, base, max), Duration::from_secs(5));
        // 2^40 overflows u32
        assert_eq!(exponential_delay(40, base, max), Duration::from_secs(5));
    }

    #[test]
    fn test_item_backoff_counts_requeues() {
        let limiter = ItemExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1));

        assert_eq!(limiter.num_requeues(&"a"), 0);
        assert_eq!(limiter.when(&"a"), Duration::from_millis(5));
        assert_eq!(limiter.when(&"a"), Duration::from_millis(10));
        assert_eq!(limiter.num_requeues(&"a"), 2);
        assert_eq!(limiter.num_requeues(&"b"), 0);

        limiter.forget(&"a");
        assert_eq!(limiter.num_requeues(&"a"), 0);
        assert_eq!(limiter.when(&"a"), Duration::from_millis(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_burst_then_waits() {
        let bucket = TokenBucket::new(10.0, 2);

        assert_eq!(RateLimiter::<&str>::when(&bucket, &"a"), Duration::ZERO);
        assert_eq!(RateLimiter::<&str>::when(&bucket, &"b"), Duration::ZERO);

        let wait = RateLimiter::<&str>::when(&bucket, &"c");
        assert!(wait > Duration::from_millis(90) && wait <= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_refills() {
        let bucket = TokenBucket::new(10.0, 1);

        assert_eq!(RateLimiter::<&str>::when(&bucket, &"a"), Duration::ZERO);
        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(RateLimiter::<&str>::when(&bucket, &"a"), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_of_takes_worst_delay() {
        let limiter: MaxOf<&str> = MaxOf::new(vec![
            Box::new(ItemExponentialBackoff::new(
                Duration::from_millis(50),
                Duration::from_secs(1),
            )),
            Box::new(TokenBucket::new(1000.0, 100)),
        ]);

        assert_eq!(limiter.when(&"a"), Duration::from_millis(50));
        assert_eq!(limiter.when(&"a"), Duration::from_millis(100));
        assert_eq!(limiter.num_requeues(&"a"), 2);

        limiter.forget(&"a");
        assert_eq!(limiter.num_requeues(&"a"), 0);
    }
}
