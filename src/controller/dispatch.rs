//! Next-Promotion dispatch
//!
//! When a Stage frees up, the highest priority queued Promotion that still
//! exists and is not yet terminal is sent to the work queue. It is not made
//! active here; it claims the Stage itself when reconciled.

use std::sync::Arc;

use crate::api::{PromotionRef, StageKey};
use crate::observability::{log_promotion_event, Event, SchedulerMetrics};
use crate::scheduling::{Revalidation, StageQueueRegistry};
use crate::store::{ObjectStore, StoreResult};
use crate::workqueue::WorkQueue;

#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<StageQueueRegistry>,
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn WorkQueue>,
    metrics: Arc<SchedulerMetrics>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<StageQueueRegistry>,
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn WorkQueue>,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            registry,
            store,
            queue,
            metrics,
        }
    }

    /// Enqueue the next Promotion for `stage`, if the Stage is idle and
    /// anything valid is waiting.
    ///
    /// Stale queue entries found along the way are discarded. A store error
    /// is logged and ends the attempt; the next terminal event for the Stage
    /// retries it.
    pub fn enqueue_next(&self, stage: &StageKey) -> Option<PromotionRef> {
        let mut discarded = Vec::new();
        let selected = self
            .registry
            .select_next(stage, |key: &PromotionRef| -> StoreResult<Revalidation> {
                match self.store.get_promotion(key)? {
                    Some(promo) if !promo.is_terminal() => Ok(Revalidation::Valid),
                    _ => {
                        discarded.push(key.clone());
                        Ok(Revalidation::Stale)
                    }
                }
            });

        for key in &discarded {
            self.metrics.increment_stale_discards();
            log_promotion_event(Event::StaleEntryDiscarded, key, stage);
        }

        match selected {
            Ok(Some(next)) => {
                self.queue.add_rate_limited(next.clone());
                self.metrics.increment_dispatches();
                log_promotion_event(Event::PromotionDispatched, &next, stage);
                Some(next)
            }
            Ok(None) => None,
            Err(err) => {
                tracing::error!(
                    namespace = %stage.namespace,
                    stage = %stage.name,
                    error = %err,
                    "error revalidating queued promotion"
                );
                None
            }
        }
    }
}
