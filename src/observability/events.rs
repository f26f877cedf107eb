//! Observability events for promoctl
//!
//! Every scheduling decision the controller makes has a named event so log
//! lines can be filtered and counted by kind.

use std::fmt;

/// Observable scheduling and lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Controller workers and watch loop started
    ControllerStarted,
    /// Controller drained and stopped
    ControllerStopped,
    /// Existing Promotions admitted at startup
    QueuesInitialized,

    // Scheduling
    /// Promotion admitted and made active immediately
    PromotionAdmitted,
    /// Promotion admitted behind an active one
    PromotionQueued,
    /// Promotion claimed its Stage and is about to run
    PromotionActivated,
    /// Promotion could not claim its Stage and will wait
    PromotionDeferred,
    /// Active Promotion released its Stage
    PromotionConcluded,
    /// Queued Promotion found missing or terminal and dropped
    StaleEntryDiscarded,
    /// Next Promotion for a Stage sent to the work queue
    PromotionDispatched,
    /// Running Promotion re-queued because its Application changed
    PromotionRechecked,

    // Reconciliation
    /// Promotion phase written to the store
    PhaseTransition,
    /// Reconcile attempt failed and will be retried
    ReconcileFailed,
    /// Watch feed fell behind and missed events
    WatchLagged,
}

impl Event {
    /// Returns the string representation of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::ControllerStarted => "CONTROLLER_STARTED",
            Event::ControllerStopped => "CONTROLLER_STOPPED",
            Event::QueuesInitialized => "QUEUES_INITIALIZED",

            Event::PromotionAdmitted => "PROMOTION_ADMITTED",
            Event::PromotionQueued => "PROMOTION_QUEUED",
            Event::PromotionActivated => "PROMOTION_ACTIVATED",
            Event::PromotionDeferred => "PROMOTION_DEFERRED",
            Event::PromotionConcluded => "PROMOTION_CONCLUDED",
            Event::StaleEntryDiscarded => "STALE_ENTRY_DISCARDED",
            Event::PromotionDispatched => "PROMOTION_DISPATCHED",
            Event::PromotionRechecked => "PROMOTION_RECHECKED",

            Event::PhaseTransition => "PHASE_TRANSITION",
            Event::ReconcileFailed => "RECONCILE_FAILED",
            Event::WatchLagged => "WATCH_LAGGED",
        }
    }

    /// Returns true if this event reports something going wrong
    pub fn is_warning(&self) -> bool {
        matches!(self, Event::ReconcileFailed | Event::WatchLagged)
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
