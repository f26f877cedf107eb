//! Watch event handlers
//!
//! Translate store change notifications into registry transitions and work
//! queue adds. Handlers never block on I/O beyond reads of the store cache.

use std::sync::Arc;

use super::config::ControllerConfig;
use super::dispatch::Dispatcher;
use crate::api::{Application, Promotion};
use crate::observability::{log_promotion_event, Event, SchedulerMetrics};
use crate::scheduling::{Admission, PendingPromotion, StageQueueRegistry};
use crate::store::{ObjectStore, WatchEvent};
use crate::workqueue::WorkQueue;

#[derive(Clone)]
pub struct EventHandlers {
    config: Arc<ControllerConfig>,
    registry: Arc<StageQueueRegistry>,
    store: Arc<dyn ObjectStore>,
    queue: Arc<dyn WorkQueue>,
    metrics: Arc<SchedulerMetrics>,
    dispatcher: Dispatcher,
}

impl EventHandlers {
    pub fn new(
        config: Arc<ControllerConfig>,
        registry: Arc<StageQueueRegistry>,
        store: Arc<dyn ObjectStore>,
        queue: Arc<dyn WorkQueue>,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::clone(&store),
            Arc::clone(&queue),
            Arc::clone(&metrics),
        );
        Self {
            config,
            registry,
            store,
            queue,
            metrics,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Route one watch event to its handler.
    pub fn handle(&self, event: WatchEvent) {
        match event {
            WatchEvent::PromotionCreated(promo) => self.on_promotion_created(&promo),
            WatchEvent::PromotionUpdated { old, new } => {
                self.on_promotion_updated(old.as_ref(), new.as_ref())
            }
            WatchEvent::PromotionDeleted(promo) => self.on_promotion_deleted(&promo),
            WatchEvent::ApplicationUpdated { old, new } => {
                self.on_application_updated(old.as_ref(), new.as_ref())
            }
        }
    }

    /// Admit a new Promotion; run it now if its Stage is idle.
    pub fn on_promotion_created(&self, promo: &Promotion) {
        if promo.is_terminal() || !self.config.is_responsible_for(&promo.metadata) {
            return;
        }

        let stage = promo.stage_key();
        let key = promo.key();
        self.metrics.increment_admissions();
        match self.registry.admit(&stage, PendingPromotion::from(promo)) {
            Admission::BecameActive => {
                log_promotion_event(Event::PromotionAdmitted, &key, &stage);
                self.queue.add(key);
            }
            Admission::Queued => {
                log_promotion_event(Event::PromotionQueued, &key, &stage);
            }
        }
    }

    /// Release the Stage when a Promotion reaches a terminal phase and hand
    /// it to the next one in line.
    ///
    /// Only the non-terminal to terminal transition matters; every other
    /// update is ignored.
    pub fn on_promotion_updated(&self, old: Option<&Promotion>, new: Option<&Promotion>) {
        let (Some(old), Some(new)) = (old, new) else {
            tracing::error!(
                old_missing = old.is_none(),
                new_missing = new.is_none(),
                "update event has no old or new Promotion; ignoring"
            );
            return;
        };

        if old.is_terminal() || !new.is_terminal() {
            return;
        }
        if !self.config.is_responsible_for(&new.metadata) {
            return;
        }

        let stage = new.stage_key();
        let key = new.key();
        if self.registry.conclude(&stage, &key) {
            self.metrics.increment_conclusions();
            log_promotion_event(Event::PromotionConcluded, &key, &stage);
        }
        self.dispatcher.enqueue_next(&stage);
    }

    /// Release the Stage held by a deleted Promotion.
    ///
    /// A deleted Promotion still sitting in the queue is left there and
    /// discarded the next time the Stage selects.
    pub fn on_promotion_deleted(&self, promo: &Promotion) {
        if !self.config.is_responsible_for(&promo.metadata) {
            return;
        }

        let stage = promo.stage_key();
        let key = promo.key();
        if self.registry.conclude(&stage, &key) {
            self.metrics.increment_conclusions();
            log_promotion_event(Event::PromotionConcluded, &key, &stage);
        }
        self.dispatcher.enqueue_next(&stage);
    }

    /// Re-check every running Promotion that updates the changed Application.
    pub fn on_application_updated(&self, old: Option<&Application>, new: Option<&Application>) {
        let (Some(_), Some(app)) = (old, new) else {
            tracing::error!(
                old_missing = old.is_none(),
                new_missing = new.is_none(),
                "update event has no old or new Application; ignoring"
            );
            return;
        };

        let app_key = app.key();
        let promos = match self.store.list_running_promotions_for_application(&app_key) {
            Ok(promos) => promos,
            Err(err) => {
                tracing::error!(
                    namespace = %app_key.namespace,
                    app = %app_key.name,
                    error = %err,
                    "error listing running promotions for application"
                );
                return;
            }
        };

        for promo in promos
            .iter()
            .filter(|p| self.config.is_responsible_for(&p.metadata))
        {
            let key = promo.key();
            self.metrics.increment_rechecks();
            log_promotion_event(Event::PromotionRechecked, &key, &promo.stage_key());
            self.queue.add(key);
        }
    }
}
