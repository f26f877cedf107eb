//! Per-key exponential backoff

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rand::Rng;

/// Exponential backoff tracked per key.
///
/// The n-th consecutive failure of a key waits `base * 2^n`, capped at
/// `max`, stretched by up to `jitter` (a fraction) of random extra delay.
#[derive(Debug)]
pub struct ItemExponentialBackoff<K> {
    base: Duration,
    max: Duration,
    jitter: f64,
    failures: Mutex<HashMap<K, u32>>,
}

impl<K: Eq + Hash + Clone> ItemExponentialBackoff<K> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            jitter: 0.0,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Add up to `jitter` (0.0..=1.0) of random extra delay to each backoff.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Record a failure for `key` and return how long to wait.
    pub fn when(&self, key: &K) -> Duration {
        let exp = {
            let mut failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
            let count = failures.entry(key.clone()).or_insert(0);
            let exp = *count;
            *count = count.saturating_add(1);
            exp
        };

        let factor = 1u32.checked_shl(exp).unwrap_or(u32::MAX);
        let delay = self.base.saturating_mul(factor).min(self.max);
        if self.jitter > 0.0 {
            let extra = rand::thread_rng().gen_range(0.0..=self.jitter);
            delay.saturating_add(delay.mul_f64(extra)).min(self.max)
        } else {
            delay
        }
    }

    /// Number of failures recorded for `key` since it was last forgotten.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Reset the backoff for `key`.
    pub fn forget(&self, key: &K) {
        self.failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_max() {
        let limiter = ItemExponentialBackoff::new(Duration::from_millis(5), Duration::from_millis(100));
        let key = "p1";

        let delays: Vec<_> = (0..7).map(|_| limiter.when(&key)).collect();
        let expected: Vec<_> = [5, 10, 20, 40, 80, 100, 100]
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect();
        assert_eq!(delays, expected);
        assert_eq!(limiter.num_requeues(&key), 7);
    }

    #[test]
    fn test_forget_resets() {
        let limiter = ItemExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1));
        limiter.when(&"p1");
        limiter.when(&"p1");
        limiter.forget(&"p1");

        assert_eq!(limiter.num_requeues(&"p1"), 0);
        assert_eq!(limiter.when(&"p1"), Duration::from_millis(5));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = ItemExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(1));
        limiter.when(&"p1");
        limiter.when(&"p1");

        assert_eq!(limiter.when(&"p2"), Duration::from_millis(5));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let limiter = ItemExponentialBackoff::new(Duration::from_millis(10), Duration::from_secs(1))
            .with_jitter(0.5);
        for _ in 0..5 {
            limiter.forget(&"p1");
            let delay = limiter.when(&"p1");
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(16));
        }
    }

    #[test]
    fn test_huge_failure_count_saturates() {
        let limiter = ItemExponentialBackoff::new(Duration::from_millis(5), Duration::from_secs(60));
        for _ in 0..64 {
            limiter.when(&"p1");
        }
        assert_eq!(limiter.when(&"p1"), Duration::from_secs(60));
    }
}
