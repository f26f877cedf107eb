//! Pending Promotion Queue
//!
//! An ordered backlog of entries for one Stage. Ordering is supplied by the
//! caller as a comparison function and must be a strict total order so that
//! repeated pops of an unchanged queue always yield the same sequence.
//!
//! The queue never holds two equal entries at the same time.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;

/// Comparison used to order queue entries. `Less` means higher priority.
pub type OrderFn<T> = fn(&T, &T) -> Ordering;

/// Ordered, duplicate-free queue with highest priority at the front.
pub struct PriorityQueue<T> {
    items: VecDeque<T>,
    order: OrderFn<T>,
}

impl<T: PartialEq> PriorityQueue<T> {
    /// Create an empty queue ordered by `order`.
    pub fn new(order: OrderFn<T>) -> Self {
        Self {
            items: VecDeque::new(),
            order,
        }
    }

    /// Insert `item` at its ordered position.
    ///
    /// Returns `false` without touching the queue if an equal item is
    /// already queued.
    pub fn push(&mut self, item: T) -> bool {
        if self.contains(&item) {
            return false;
        }
        let order = self.order;
        // Equal-ordered items keep insertion order.
        let at = self
            .items
            .partition_point(|queued| order(queued, &item) != Ordering::Greater);
        self.items.insert(at, item);
        true
    }

    /// Highest priority item, if any.
    pub fn peek(&self) -> Option<&T> {
        self.items.front()
    }

    /// Remove and return the highest priority item, if any.
    pub fn pop(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Remove the first item matching `pred`. No-op if none matches.
    pub fn remove_by(&mut self, pred: impl Fn(&T) -> bool) -> Option<T> {
        let at = self.items.iter().position(pred)?;
        self.items.remove(at)
    }

    /// Remove `item` if queued.
    pub fn remove(&mut self, item: &T) -> Option<T> {
        self.remove_by(|queued| queued == item)
    }

    pub fn contains(&self, item: &T) -> bool {
        self.items.iter().any(|queued| queued == item)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterate from highest to lowest priority.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

impl<T: fmt::Debug> fmt::Debug for PriorityQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}
