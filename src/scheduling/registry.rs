//! Stage Queue Registry
//!
//! Tracks, per Stage, the single Promotion allowed to run and the ordered
//! backlog of Promotions waiting for their turn.
//!
//! Invariants:
//! - At most one Promotion is active for a Stage at any instant.
//! - The active Promotion for a Stage is never also in that Stage's queue.
//! - Every compound check-then-set sequence runs under the registry lock.
//!
//! The registry only stores references. Whether a queued Promotion still
//! exists, or is still worth running, is decided by the caller against the
//! object store during [`StageQueueRegistry::select_next`].

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use super::priority_queue::{OrderFn, PriorityQueue};
use crate::api::{Promotion, PromotionRef, StageKey};

/// A queued Promotion.
///
/// Identity is the Promotion's key; the creation timestamp only orders.
#[derive(Debug, Clone)]
pub struct PendingPromotion {
    pub key: PromotionRef,
    pub created_at: DateTime<Utc>,
}

impl PendingPromotion {
    pub fn new(key: PromotionRef, created_at: DateTime<Utc>) -> Self {
        Self { key, created_at }
    }
}

impl From<&Promotion> for PendingPromotion {
    fn from(promo: &Promotion) -> Self {
        Self::new(promo.key(), promo.metadata.creation_timestamp)
    }
}

impl PartialEq for PendingPromotion {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for PendingPromotion {}

/// Oldest Promotion first, ties broken by namespace and name.
pub fn by_creation_timestamp(a: &PendingPromotion, b: &PendingPromotion) -> Ordering {
    a.created_at
        .cmp(&b.created_at)
        .then_with(|| a.key.cmp(&b.key))
}

/// Outcome of [`StageQueueRegistry::admit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// The Stage was idle; the Promotion is now active and should be
    /// dispatched right away.
    BecameActive,
    /// Another Promotion is active; this one waits in the Stage's queue.
    Queued,
}

/// Outcome of [`StageQueueRegistry::try_activate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// The caller holds the Stage and may run.
    Activated,
    /// A different Promotion holds the Stage.
    AlreadyActiveElsewhere { active: PromotionRef },
    /// The Stage is idle but a higher priority Promotion is waiting.
    NotNext { head: PromotionRef },
}

impl Activation {
    pub fn is_activated(&self) -> bool {
        matches!(self, Self::Activated)
    }
}

/// Verdict of the caller's revalidation of a queued Promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revalidation {
    /// The Promotion exists and is not terminal.
    Valid,
    /// The Promotion is gone or already terminal; discard it.
    Stale,
}

#[derive(Debug, Default)]
struct RegistryState {
    active_by_stage: HashMap<StageKey, PromotionRef>,
    pending_by_stage: HashMap<StageKey, PriorityQueue<PendingPromotion>>,
}

impl RegistryState {
    fn queue(
        &mut self,
        stage: &StageKey,
        order: OrderFn<PendingPromotion>,
    ) -> &mut PriorityQueue<PendingPromotion> {
        // Queues are never removed so a concurrent push cannot race a
        // delete-if-empty.
        self.pending_by_stage
            .entry(stage.clone())
            .or_insert_with(|| PriorityQueue::new(order))
    }
}

/// Process-wide scheduling state for all Stages.
///
/// Constructed once at startup and shared by reference with every handler
/// and reconciler.
#[derive(Debug)]
pub struct StageQueueRegistry {
    state: Mutex<RegistryState>,
    order: OrderFn<PendingPromotion>,
}

impl Default for StageQueueRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StageQueueRegistry {
    /// Create a registry ordering Promotions oldest first.
    pub fn new() -> Self {
        Self::with_order(by_creation_timestamp)
    }

    /// Create a registry with a custom priority order.
    pub fn with_order(order: OrderFn<PendingPromotion>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            order,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        // Every mutation completes before the guard drops, so a poisoned
        // lock still guards consistent state.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // =========================================================================
    // SCHEDULING PROTOCOL
    // =========================================================================

    /// Admit a newly observed, non-terminal Promotion.
    pub fn admit(&self, stage: &StageKey, entry: PendingPromotion) -> Admission {
        let mut state = self.lock();
        match state.active_by_stage.get(stage) {
            None => {
                state.queue(stage, self.order).remove(&entry);
                state.active_by_stage.insert(stage.clone(), entry.key);
                Admission::BecameActive
            }
            Some(active) if *active == entry.key => Admission::BecameActive,
            Some(_) => {
                state.queue(stage, self.order).push(entry);
                Admission::Queued
            }
        }
    }

    /// Release the Stage if `promotion` is the one holding it.
    ///
    /// Returns whether the Stage was released. Concluding a Promotion that
    /// does not hold the Stage is a no-op, which absorbs duplicate or late
    /// terminal events.
    pub fn conclude(&self, stage: &StageKey, promotion: &PromotionRef) -> bool {
        let mut state = self.lock();
        if state.active_by_stage.get(stage) == Some(promotion) {
            state.active_by_stage.remove(stage);
            true
        } else {
            false
        }
    }

    /// Find the highest priority queued Promotion that is still worth running.
    ///
    /// Returns `None` if the Stage already has an active Promotion or the
    /// queue runs dry. Each head is passed to `revalidate`; stale heads are
    /// popped and the scan continues. The valid head is returned but left in
    /// the queue: it leaves the queue only when it activates.
    ///
    /// A revalidation error aborts the pass; entries already found stale stay
    /// discarded, everything else stays queued.
    pub fn select_next<E>(
        &self,
        stage: &StageKey,
        mut revalidate: impl FnMut(&PromotionRef) -> Result<Revalidation, E>,
    ) -> Result<Option<PromotionRef>, E> {
        let mut state = self.lock();
        if state.active_by_stage.contains_key(stage) {
            return Ok(None);
        }
        let Some(queue) = state.pending_by_stage.get_mut(stage) else {
            return Ok(None);
        };
        while let Some(head) = queue.peek() {
            match revalidate(&head.key)? {
                Revalidation::Valid => return Ok(Some(head.key.clone())),
                Revalidation::Stale => {
                    queue.pop();
                }
            }
        }
        Ok(None)
    }

    /// Claim the Stage for `entry` just before it runs.
    ///
    /// Succeeds when `entry` already holds the Stage, or when the Stage is
    /// idle and `entry` is next in line. On failure `entry` is queued so a
    /// later dispatch picks it up.
    pub fn try_activate(&self, stage: &StageKey, entry: PendingPromotion) -> Activation {
        let mut state = self.lock();
        if let Some(active) = state.active_by_stage.get(stage) {
            if *active == entry.key {
                return Activation::Activated;
            }
            let active = active.clone();
            state.queue(stage, self.order).push(entry);
            return Activation::AlreadyActiveElsewhere { active };
        }

        let queue = state.queue(stage, self.order);
        match queue.peek() {
            Some(head) if *head != entry => {
                let head = head.key.clone();
                queue.push(entry);
                Activation::NotNext { head }
            }
            _ => {
                queue.pop_if_eq(&entry);
                state.active_by_stage.insert(stage.clone(), entry.key);
                Activation::Activated
            }
        }
    }

    // =========================================================================
    // QUEUE PRIMITIVES
    // =========================================================================

    /// Highest priority queued Promotion for `stage`.
    pub fn peek(&self, stage: &StageKey) -> Option<PromotionRef> {
        let state = self.lock();
        state
            .pending_by_stage
            .get(stage)
            .and_then(|q| q.peek())
            .map(|e| e.key.clone())
    }

    /// Remove and return the highest priority queued Promotion for `stage`.
    pub fn pop(&self, stage: &StageKey) -> Option<PromotionRef> {
        let mut state = self.lock();
        state
            .pending_by_stage
            .get_mut(stage)
            .and_then(|q| q.pop())
            .map(|e| e.key)
    }

    /// Drop `promotion` from the queue for `stage`, if present.
    pub fn remove(&self, stage: &StageKey, promotion: &PromotionRef) -> bool {
        let mut state = self.lock();
        state
            .pending_by_stage
            .get_mut(stage)
            .and_then(|q| q.remove_by(|e| e.key == *promotion))
            .is_some()
    }

    // =========================================================================
    // INSPECTION
    // =========================================================================

    /// The Promotion currently holding `stage`.
    pub fn active(&self, stage: &StageKey) -> Option<PromotionRef> {
        self.lock().active_by_stage.get(stage).cloned()
    }

    /// Queued Promotions for `stage`, highest priority first.
    pub fn pending(&self, stage: &StageKey) -> Vec<PromotionRef> {
        self.lock()
            .pending_by_stage
            .get(stage)
            .map(|q| q.iter().map(|e| e.key.clone()).collect())
            .unwrap_or_default()
    }

    /// Every Stage the registry has seen, sorted.
    pub fn stage_keys(&self) -> Vec<StageKey> {
        let state = self.lock();
        let mut keys: Vec<_> = state
            .pending_by_stage
            .keys()
            .chain(state.active_by_stage.keys())
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }
}

impl PriorityQueue<PendingPromotion> {
    fn pop_if_eq(&mut self, entry: &PendingPromotion) {
        if self.peek() == Some(entry) {
            self.pop();
        }
    }
}
