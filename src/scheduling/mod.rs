//! Promotion Scheduling
//!
//! Per-Stage admission control for Promotions:
//! - One active Promotion per Stage, never more
//! - Waiting Promotions ordered by priority, not arrival
//! - Queue heads revalidated against live state before dispatch
//! - Stale queue entries discarded lazily
//!
//! Everything here is in-memory and total: no operation performs I/O or
//! returns an error of its own.

mod priority_queue;
mod registry;

pub use priority_queue::{OrderFn, PriorityQueue};
pub use registry::{
    by_creation_timestamp, Activation, Admission, PendingPromotion, Revalidation,
    StageQueueRegistry,
};
