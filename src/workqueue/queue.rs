//! # Rate-Limiting Work Queue
//!
//! A key is in at most one of three places: queued (waiting for a worker),
//! processing (held by a worker) or neither. A key re-added while it is
//! processing is parked in the dirty set and queued again when the worker
//! calls [`RateLimitingQueue::done`], so no key is ever handled by two
//! workers at once.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

use super::rate_limiter::ItemExponentialBackoff;
use super::WorkQueue;
use crate::api::PromotionRef;

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Delayed {
    ready_at: Instant,
    seq: u64,
    key: PromotionRef,
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<PromotionRef>,
    dirty: HashSet<PromotionRef>,
    processing: HashSet<PromotionRef>,
    waiting: BinaryHeap<Reverse<Delayed>>,
    seq: u64,
    shutting_down: bool,
}

impl QueueState {
    /// Returns whether the key became available to a worker.
    fn insert(&mut self, key: PromotionRef) -> bool {
        if self.shutting_down || self.dirty.contains(&key) {
            return false;
        }
        self.dirty.insert(key.clone());
        if self.processing.contains(&key) {
            return false;
        }
        self.queue.push_back(key);
        true
    }

    fn promote_ready(&mut self, now: Instant) {
        while self
            .waiting
            .peek()
            .is_some_and(|Reverse(d)| d.ready_at <= now)
        {
            if let Some(Reverse(delayed)) = self.waiting.pop() {
                self.insert(delayed.key);
            }
        }
    }

    fn take(&mut self) -> Option<PromotionRef> {
        let key = self.queue.pop_front()?;
        self.dirty.remove(&key);
        self.processing.insert(key.clone());
        Some(key)
    }

    fn next_ready_at(&self) -> Option<Instant> {
        self.waiting.peek().map(|Reverse(d)| d.ready_at)
    }
}

/// Deduplicating work queue with delayed and rate-limited adds.
#[derive(Debug)]
pub struct RateLimitingQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    limiter: ItemExponentialBackoff<PromotionRef>,
}

impl RateLimitingQueue {
    pub fn new(limiter: ItemExponentialBackoff<PromotionRef>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            limiter,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Wait for the next key. Returns `None` once the queue is shut down
    /// and drained.
    pub async fn get(&self) -> Option<PromotionRef> {
        loop {
            // Enabled before the state check so a wakeup between the check
            // and the await is not lost.
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let next_ready_at = {
                let mut state = self.lock();
                state.promote_ready(Instant::now());
                if let Some(key) = state.take() {
                    let more = !state.queue.is_empty();
                    drop(state);
                    // Several adds may have left a single stored permit.
                    if more {
                        self.notify.notify_one();
                    }
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
                state.next_ready_at()
            };

            match next_ready_at {
                Some(at) => {
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = tokio::time::sleep_until(tokio::time::Instant::from_std(at)) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Take the next key that is ready now, without waiting.
    pub fn try_get(&self) -> Option<PromotionRef> {
        let mut state = self.lock();
        state.promote_ready(Instant::now());
        state.take()
    }

    /// Mark `key` as no longer being processed.
    pub fn done(&self, key: &PromotionRef) {
        let mut state = self.lock();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.notify.notify_one();
        }
    }

    /// Stop accepting keys and wake every waiting worker.
    pub fn shut_down(&self) {
        self.lock().shutting_down = true;
        self.notify.notify_waiters();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    /// Keys ready for a worker.
    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys queued, processing or waiting on a delay.
    pub fn is_idle(&self) -> bool {
        let state = self.lock();
        state.queue.is_empty() && state.processing.is_empty() && state.waiting.is_empty()
    }

    pub fn num_requeues(&self, key: &PromotionRef) -> u32 {
        self.limiter.num_requeues(key)
    }
}

impl WorkQueue for RateLimitingQueue {
    fn add(&self, key: PromotionRef) {
        if self.lock().insert(key) {
            self.notify.notify_one();
        }
    }

    fn add_after(&self, key: PromotionRef, delay: Duration) {
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let mut state = self.lock();
        if state.shutting_down {
            return;
        }
        state.seq += 1;
        let seq = state.seq;
        state.waiting.push(Reverse(Delayed {
            ready_at: Instant::now() + delay,
            seq,
            key,
        }));
        drop(state);
        // A sleeping worker may need an earlier deadline.
        self.notify.notify_one();
    }

    fn add_rate_limited(&self, key: PromotionRef) {
        let delay = self.limiter.when(&key);
        self.add_after(key, delay);
    }

    fn forget(&self, key: &PromotionRef) {
        self.limiter.forget(key);
    }
}
