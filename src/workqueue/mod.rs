//! Work Queue
//!
//! Reconciliation requests are Promotion keys. Handlers add keys; workers
//! take them, reconcile, and report back. Adds are deduplicating and
//! at-least-once: a key added any number of times before a worker takes it
//! is reconciled once.

mod queue;
mod rate_limiter;

pub use queue::RateLimitingQueue;
pub use rate_limiter::ItemExponentialBackoff;

use std::time::Duration;

use crate::api::PromotionRef;

/// Producer side of the reconciliation queue.
pub trait WorkQueue: Send + Sync {
    /// Queue `key` for reconciliation.
    fn add(&self, key: PromotionRef);

    /// Queue `key` once `delay` has passed.
    fn add_after(&self, key: PromotionRef, delay: Duration);

    /// Queue `key` after its current backoff, then lengthen the backoff.
    fn add_rate_limited(&self, key: PromotionRef);

    /// Reset the backoff for `key`.
    fn forget(&self, key: &PromotionRef);
}
