//! Controller runtime
//!
//! One watch loop task feeding the event handlers, plus a pool of worker
//! tasks pulling Promotion keys from the work queue. Reconciles run on the
//! blocking pool since mechanics may perform I/O.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use super::config::ControllerConfig;
use super::handlers::EventHandlers;
use super::mechanics::PromotionMechanics;
use super::reconciler::{ReconcileOutcome, Reconciler};
use crate::api::{Promotion, PromotionPhase, PromotionRef};
use crate::observability::{log_event, Event, SchedulerMetrics};
use crate::scheduling::{by_creation_timestamp, PendingPromotion, StageQueueRegistry};
use crate::store::{ObjectStore, StoreResult, WatchStream};
use crate::workqueue::{RateLimitingQueue, WorkQueue};

pub struct Controller {
    config: Arc<ControllerConfig>,
    store: Arc<dyn ObjectStore>,
    registry: Arc<StageQueueRegistry>,
    queue: Arc<RateLimitingQueue>,
    metrics: Arc<SchedulerMetrics>,
    handlers: EventHandlers,
    reconciler: Arc<Reconciler>,
}

impl Controller {
    pub fn new(
        config: ControllerConfig,
        store: Arc<dyn ObjectStore>,
        mechanics: Arc<dyn PromotionMechanics>,
    ) -> Self {
        let config = Arc::new(config);
        let registry = Arc::new(StageQueueRegistry::new());
        let queue = Arc::new(RateLimitingQueue::new(config.rate_limiter()));
        let metrics = Arc::new(SchedulerMetrics::new());

        let handlers = EventHandlers::new(
            Arc::clone(&config),
            Arc::clone(&registry),
            Arc::clone(&store),
            Arc::clone(&queue) as Arc<dyn WorkQueue>,
            Arc::clone(&metrics),
        );
        let reconciler = Arc::new(Reconciler::new(
            &config,
            Arc::clone(&registry),
            Arc::clone(&store),
            handlers.dispatcher().clone(),
            mechanics,
            Arc::clone(&metrics),
        ));

        Self {
            config,
            store,
            registry,
            queue,
            metrics,
            handlers,
            reconciler,
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<StageQueueRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<RateLimitingQueue> {
        &self.queue
    }

    pub fn metrics(&self) -> &Arc<SchedulerMetrics> {
        &self.metrics
    }

    pub fn handlers(&self) -> &EventHandlers {
        &self.handlers
    }

    /// Admit every existing non-terminal Promotion.
    ///
    /// Running Promotions are admitted first so they reclaim their Stages,
    /// then Pending ones oldest first. Returns how many were admitted.
    pub fn initialize_queues(&self) -> StoreResult<usize> {
        let mut promos: Vec<Promotion> = self
            .store
            .list_promotions()?
            .into_iter()
            .filter(|p| !p.is_terminal() && self.config.is_responsible_for(&p.metadata))
            .collect();
        promos.sort_by(|a, b| {
            let a_running = a.phase() == PromotionPhase::Running;
            let b_running = b.phase() == PromotionPhase::Running;
            b_running.cmp(&a_running).then_with(|| {
                by_creation_timestamp(&PendingPromotion::from(a), &PendingPromotion::from(b))
            })
        });

        for promo in &promos {
            self.handlers.on_promotion_created(promo);
        }

        tracing::info!(
            event = Event::QueuesInitialized.as_str(),
            promotions = promos.len(),
            stages = self.registry.stage_keys().len(),
        );
        Ok(promos.len())
    }

    /// Bring the registry back in line with the store after missed events.
    ///
    /// Releases Stages held by Promotions that have since finished or
    /// disappeared, admits any Promotions not yet seen, then dispatches
    /// every idle Stage.
    pub fn resync(&self) -> StoreResult<()> {
        for stage in self.registry.stage_keys() {
            let Some(active) = self.registry.active(&stage) else {
                continue;
            };
            let finished = self
                .store
                .get_promotion(&active)?
                .map_or(true, |p| p.is_terminal());
            if finished && self.registry.conclude(&stage, &active) {
                self.metrics.increment_conclusions();
                tracing::info!(
                    event = Event::PromotionConcluded.as_str(),
                    namespace = %active.namespace,
                    promotion = %active.name,
                    stage = %stage.name,
                    "released during resync"
                );
            }
        }

        self.initialize_queues()?;

        for stage in self.registry.stage_keys() {
            self.handlers.dispatcher().enqueue_next(&stage);
        }
        Ok(())
    }

    /// Run until `shutdown` resolves.
    ///
    /// Subscribes to the watch feed before admitting existing Promotions so
    /// nothing created in between is missed. On shutdown the work queue
    /// stops accepting keys and workers finish what is already queued.
    pub async fn run<F>(self: Arc<Self>, shutdown: F) -> StoreResult<()>
    where
        F: Future<Output = ()>,
    {
        let events = self.store.subscribe();
        self.initialize_queues()?;

        let watch = tokio::spawn(Arc::clone(&self).watch_loop(events));
        let workers: Vec<JoinHandle<()>> = (0..self.config.workers)
            .map(|id| tokio::spawn(Arc::clone(&self).worker(id)))
            .collect();

        log_event(Event::ControllerStarted);
        shutdown.await;

        self.queue.shut_down();
        watch.abort();
        for worker in workers {
            if let Err(err) = worker.await {
                tracing::error!(error = %err, "worker task failed");
            }
        }

        log_event(Event::ControllerStopped);
        Ok(())
    }

    /// Resolves once the work queue has stayed idle for `settle`.
    ///
    /// Watch events land asynchronously, so a single idle observation is not
    /// enough; the queue must stay idle across the whole window.
    pub async fn wait_until_idle(&self, settle: Duration) {
        let poll = Duration::from_millis(10);
        let mut idle_for = Duration::ZERO;
        while idle_for < settle {
            tokio::time::sleep(poll).await;
            if self.queue.is_idle() {
                idle_for += poll;
            } else {
                idle_for = Duration::ZERO;
            }
        }
    }

    async fn watch_loop(self: Arc<Self>, mut events: WatchStream) {
        loop {
            match events.recv().await {
                Ok(event) => self.handlers.handle(event),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        event = Event::WatchLagged.as_str(),
                        skipped,
                        "watch fell behind; resyncing"
                    );
                    if let Err(err) = self.resync() {
                        tracing::error!(error = %err, "resync failed");
                    }
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    async fn worker(self: Arc<Self>, id: usize) {
        tracing::debug!(worker = id, "worker started");
        while let Some(key) = self.queue.get().await {
            self.process(&key).await;
            self.queue.done(&key);
        }
        tracing::debug!(worker = id, "worker stopped");
    }

    async fn process(&self, key: &PromotionRef) {
        let reconciler = Arc::clone(&self.reconciler);
        let target = key.clone();
        let result = tokio::task::spawn_blocking(move || reconciler.reconcile(&target)).await;

        match result {
            Ok(Ok(ReconcileOutcome::Done)) => self.queue.forget(key),
            Ok(Ok(ReconcileOutcome::RequeueAfter(delay))) => {
                self.queue.forget(key);
                self.queue.add_after(key.clone(), delay);
            }
            Ok(Err(err)) => {
                self.metrics.increment_reconcile_errors();
                tracing::warn!(
                    event = Event::ReconcileFailed.as_str(),
                    namespace = %key.namespace,
                    promotion = %key.name,
                    retries = self.queue.num_requeues(key),
                    error = %err,
                );
                self.queue.add_rate_limited(key.clone());
            }
            Err(err) => {
                self.metrics.increment_reconcile_errors();
                tracing::error!(
                    namespace = %key.namespace,
                    promotion = %key.name,
                    error = %err,
                    "reconcile task panicked"
                );
                self.queue.add_rate_limited(key.clone());
            }
        }
    }
}
