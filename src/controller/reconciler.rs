//! Promotion reconciler
//!
//! Drives one Promotion through `Pending -> Running -> terminal`. A
//! Promotion only runs after claiming its Stage; one that cannot claim it
//! waits in the Stage's queue and is dispatched again when the Stage frees.

use std::sync::Arc;
use std::time::Duration;

use super::config::ControllerConfig;
use super::dispatch::Dispatcher;
use super::errors::{MechanicsError, ReconcileError, ReconcileResult};
use super::mechanics::PromotionMechanics;
use crate::api::{Promotion, PromotionPhase, PromotionRef, PromotionStatus, Stage, StageKey};
use crate::observability::{log_promotion_event, Event, SchedulerMetrics};
use crate::scheduling::{Activation, PendingPromotion, StageQueueRegistry};
use crate::store::ObjectStore;

/// What the worker should do with the key after a successful reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Done,
    RequeueAfter(Duration),
}

pub struct Reconciler {
    registry: Arc<StageQueueRegistry>,
    store: Arc<dyn ObjectStore>,
    dispatcher: Dispatcher,
    mechanics: Arc<dyn PromotionMechanics>,
    metrics: Arc<SchedulerMetrics>,
    requeue_interval: Duration,
    status_update_retries: u32,
}

impl Reconciler {
    pub fn new(
        config: &ControllerConfig,
        registry: Arc<StageQueueRegistry>,
        store: Arc<dyn ObjectStore>,
        dispatcher: Dispatcher,
        mechanics: Arc<dyn PromotionMechanics>,
        metrics: Arc<SchedulerMetrics>,
    ) -> Self {
        Self {
            registry,
            store,
            dispatcher,
            mechanics,
            metrics,
            requeue_interval: config.requeue_interval(),
            status_update_retries: config.status_update_retries,
        }
    }

    /// Reconcile the Promotion named by `key`.
    ///
    /// Errors are transient: the caller retries the key with backoff.
    pub fn reconcile(&self, key: &PromotionRef) -> ReconcileResult<ReconcileOutcome> {
        self.metrics.increment_reconciles();

        let promo = match self.store.get_promotion(key) {
            Ok(Some(promo)) => promo,
            Ok(None) => {
                tracing::debug!(namespace = %key.namespace, promotion = %key.name, "promotion not found");
                return Ok(ReconcileOutcome::Done);
            }
            Err(source) => {
                return Err(ReconcileError::ReadPromotion {
                    promotion: key.clone(),
                    source,
                })
            }
        };
        if promo.is_terminal() {
            return Ok(ReconcileOutcome::Done);
        }

        let stage_key = promo.stage_key();
        if !self.claim_stage(&promo, &stage_key) {
            return Ok(ReconcileOutcome::Done);
        }

        // The Promotion may have been deleted or finished, and its Stage
        // concluded, between the read above and the claim.
        let promo = match self.store.get_promotion(key) {
            Ok(Some(latest)) if !latest.is_terminal() => latest,
            Ok(_) => {
                self.release_stage(key, &stage_key);
                return Ok(ReconcileOutcome::Done);
            }
            Err(source) => {
                return Err(ReconcileError::ReadPromotion {
                    promotion: key.clone(),
                    source,
                })
            }
        };

        let promo = if promo.phase() == PromotionPhase::Pending {
            self.metrics.increment_activations();
            log_promotion_event(Event::PromotionActivated, key, &stage_key);
            match self.set_status(&promo, PromotionStatus::with_phase(PromotionPhase::Running))? {
                Some(updated) => updated,
                None => return Ok(ReconcileOutcome::Done),
            }
        } else {
            promo
        };
        if promo.is_terminal() {
            return Ok(ReconcileOutcome::Done);
        }

        let stage = match self.get_stage(&stage_key)? {
            Some(stage) => stage,
            None => {
                self.set_status(
                    &promo,
                    PromotionStatus::errored(format!("Stage {stage_key} not found")),
                )?;
                return Ok(ReconcileOutcome::Done);
            }
        };

        match self.mechanics.promote(&stage, &promo) {
            Ok(status) if status.phase.is_terminal() => {
                self.set_status(&promo, status)?;
                Ok(ReconcileOutcome::Done)
            }
            Ok(_) => Ok(ReconcileOutcome::RequeueAfter(self.requeue_interval)),
            Err(MechanicsError::Structural(message)) => {
                self.set_status(
                    &promo,
                    PromotionStatus::failed(format!(
                        "error promoting Promotion {key} into Stage {stage_key}: {message}"
                    )),
                )?;
                Ok(ReconcileOutcome::Done)
            }
            Err(MechanicsError::Transient(message)) => Err(ReconcileError::Transient {
                promotion: key.clone(),
                stage: stage_key,
                message,
            }),
        }
    }

    /// Returns whether `promo` holds its Stage and may run.
    fn claim_stage(&self, promo: &Promotion, stage: &StageKey) -> bool {
        let key = promo.key();
        match self
            .registry
            .try_activate(stage, PendingPromotion::from(promo))
        {
            Activation::Activated => true,
            Activation::AlreadyActiveElsewhere { active } => {
                self.metrics.increment_deferrals();
                log_promotion_event(Event::PromotionDeferred, &key, stage);
                tracing::debug!(
                    namespace = %stage.namespace,
                    stage = %stage.name,
                    active = %active.name,
                    "stage busy"
                );
                false
            }
            Activation::NotNext { head } => {
                self.metrics.increment_deferrals();
                log_promotion_event(Event::PromotionDeferred, &key, stage);
                tracing::debug!(
                    namespace = %stage.namespace,
                    stage = %stage.name,
                    head = %head.name,
                    "higher priority promotion waiting"
                );
                // Nothing else would wake the head while the Stage is idle.
                self.dispatcher.enqueue_next(stage);
                false
            }
        }
    }

    /// Give up a Stage claimed by a Promotion that can no longer run.
    fn release_stage(&self, key: &PromotionRef, stage: &StageKey) {
        if self.registry.conclude(stage, key) {
            self.metrics.increment_conclusions();
            log_promotion_event(Event::PromotionConcluded, key, stage);
        }
        self.dispatcher.enqueue_next(stage);
    }

    fn get_stage(&self, key: &StageKey) -> ReconcileResult<Option<Stage>> {
        self.store
            .get_stage(key)
            .map_err(|source| ReconcileError::ReadStage {
                stage: key.clone(),
                source,
            })
    }

    /// Write `status`, re-reading and retrying on version conflicts.
    ///
    /// If another writer already moved the Promotion to a terminal phase,
    /// that state wins and is returned unchanged. Returns `None` when the
    /// Promotion no longer exists. Either way the Stage is released, since
    /// the watch event that would have concluded it may already be handled.
    fn set_status(
        &self,
        promo: &Promotion,
        status: PromotionStatus,
    ) -> ReconcileResult<Option<Promotion>> {
        let key = promo.key();
        let stage = promo.stage_key();
        let mut version = promo.metadata.resource_version;
        let mut attempt = 1;
        loop {
            match self
                .store
                .update_promotion_status(&key, version, status.clone())
            {
                Ok(updated) => {
                    tracing::info!(
                        event = Event::PhaseTransition.as_str(),
                        namespace = %key.namespace,
                        promotion = %key.name,
                        from = %promo.phase(),
                        to = %updated.phase(),
                        error = updated.status.error.as_deref().unwrap_or_default(),
                    );
                    return Ok(Some(updated));
                }
                Err(err) if err.is_not_found() => {
                    self.release_stage(&key, &stage);
                    return Ok(None);
                }
                Err(err) if err.is_conflict() && attempt < self.status_update_retries => {
                    attempt += 1;
                    let latest = self.store.get_promotion(&key).map_err(|source| {
                        ReconcileError::StatusUpdate {
                            promotion: key.clone(),
                            source,
                        }
                    })?;
                    let Some(latest) = latest else {
                        self.release_stage(&key, &stage);
                        return Ok(None);
                    };
                    if latest.is_terminal() {
                        self.release_stage(&key, &stage);
                        return Ok(Some(latest));
                    }
                    version = latest.metadata.resource_version;
                }
                Err(source) => {
                    return Err(ReconcileError::StatusUpdate {
                        promotion: key,
                        source,
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{GitRepoUpdate, PromotionMechanisms, StageState};
    use crate::controller::mechanics::SpecCheckMechanics;
    use crate::store::{MemoryStore, StoreError, StoreResult, WatchStream};
    use crate::workqueue::{ItemExponentialBackoff, RateLimitingQueue};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: Arc<StageQueueRegistry>,
        queue: Arc<RateLimitingQueue>,
        metrics: Arc<SchedulerMetrics>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::default()),
                registry: Arc::new(StageQueueRegistry::new()),
                queue: Arc::new(RateLimitingQueue::new(ItemExponentialBackoff::new(
                    Duration::ZERO,
                    Duration::ZERO,
                ))),
                metrics: Arc::new(SchedulerMetrics::new()),
            }
        }

        fn reconciler(&self, mechanics: Arc<dyn PromotionMechanics>) -> Reconciler {
            self.reconciler_with_store(self.store.clone(), mechanics)
        }

        fn reconciler_with_store(
            &self,
            store: Arc<dyn ObjectStore>,
            mechanics: Arc<dyn PromotionMechanics>,
        ) -> Reconciler {
            let dispatcher = Dispatcher::new(
                self.registry.clone(),
                store.clone(),
                self.queue.clone(),
                self.metrics.clone(),
            );
            Reconciler::new(
                &ControllerConfig::default(),
                self.registry.clone(),
                store,
                dispatcher,
                mechanics,
                self.metrics.clone(),
            )
        }

        fn stage(&self) {
            let mut stage = Stage::new("ns", "prod");
            stage.spec.promotion_mechanisms = Some(PromotionMechanisms {
                git_repo_updates: vec![GitRepoUpdate {
                    repo_url: "https://github.com/example/gitops".to_string(),
                    ..Default::default()
                }],
                argocd_app_updates: vec![],
            });
            stage.status.available_states.push(StageState {
                id: "abc".to_string(),
                commits: vec![],
                images: vec![],
                charts: vec![],
            });
            self.store.upsert_stage(stage).unwrap();
        }

        fn promotion(&self, name: &str, state: &str) -> Promotion {
            self.store
                .create_promotion(Promotion::new("ns", name, "prod", state))
                .unwrap()
        }

        fn phase(&self, key: &PromotionRef) -> PromotionPhase {
            self.store.get_promotion(key).unwrap().unwrap().phase()
        }
    }

    #[test]
    fn test_missing_promotion_is_done() {
        let f = Fixture::new();
        let reconciler = f.reconciler(Arc::new(SpecCheckMechanics));
        let outcome = reconciler.reconcile(&PromotionRef::new("ns", "gone")).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);
    }

    #[test]
    fn test_promotion_succeeds_and_keeps_stage_until_concluded() {
        let f = Fixture::new();
        f.stage();
        let promo = f.promotion("p1", "abc");
        let reconciler = f.reconciler(Arc::new(SpecCheckMechanics));

        let outcome = reconciler.reconcile(&promo.key()).unwrap();
        assert_eq!(outcome, ReconcileOutcome::Done);
        assert_eq!(f.phase(&promo.key()), PromotionPhase::Succeeded);
        // Released by the terminal-transition handler, not here.
        assert_eq!(f.registry.active(&promo.stage_key()), Some(promo.key()));
        assert_eq!(f.metrics.snapshot().activations, 1);
    }

    #[test]
    fn test_terminal_promotion_is_not_rerun() {
        let f = Fixture::new();
        f.stage();
        let promo = f.promotion("p1", "abc");
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let reconciler = f.reconciler(Arc::new(
            move |_: &Stage, _: &Promotion| -> Result<PromotionStatus, MechanicsError> {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(PromotionStatus::with_phase(PromotionPhase::Succeeded))
            },
        ));

        reconciler.reconcile(&promo.key()).unwrap();
        reconciler.reconcile(&promo.key()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_busy_stage_defers() {
        let f = Fixture::new();
        f.stage();
        let p1 = f.promotion("p1", "abc");
        let p2 = f.promotion("p2", "abc");
        f.registry
            .admit(&p1.stage_key(), PendingPromotion::from(&p1));

        let reconciler = f.reconciler(Arc::new(SpecCheckMechanics));
        assert_eq!(reconciler.reconcile(&p2.key()).unwrap(), ReconcileOutcome::Done);
        assert_eq!(f.phase(&p2.key()), PromotionPhase::Pending);
        assert_eq!(f.registry.pending(&p2.stage_key()), vec![p2.key()]);
        assert_eq!(f.metrics.snapshot().deferrals, 1);
    }

    #[test]
    fn test_not_next_dispatches_head() {
        let f = Fixture::new();
        f.stage();
        let p1 = f.promotion("p1", "abc");
        let p2 = f.promotion("p2", "abc");
        let stage = p1.stage_key();
        // p1 waits in the queue of an idle Stage.
        f.registry.admit(&stage, PendingPromotion::from(&p2));
        f.registry.admit(&stage, PendingPromotion::from(&p1));
        f.registry.conclude(&stage, &p2.key());

        let reconciler = f.reconciler(Arc::new(SpecCheckMechanics));
        assert_eq!(reconciler.reconcile(&p2.key()).unwrap(), ReconcileOutcome::Done);
        assert_eq!(f.phase(&p2.key()), PromotionPhase::Pending);
        assert_eq!(f.queue.try_get(), Some(p1.key()));
    }

    #[test]
    fn test_missing_stage_errors_promotion() {
        let f = Fixture::new();
        let promo = f.promotion("p1", "abc");
        let reconciler = f.reconciler(Arc::new(SpecCheckMechanics));

        reconciler.reconcile(&promo.key()).unwrap();
        let stored = f.store.get_promotion(&promo.key()).unwrap().unwrap();
        assert_eq!(stored.phase(), PromotionPhase::Errored);
        assert_eq!(stored.status.error.as_deref(), Some("Stage ns/prod not found"));
    }

    #[test]
    fn test_structural_error_fails_promotion() {
        let f = Fixture::new();
        f.stage();
        let promo = f.promotion("p1", "missing");
        let reconciler = f.reconciler(Arc::new(SpecCheckMechanics));

        reconciler.reconcile(&promo.key()).unwrap();
        let stored = f.store.get_promotion(&promo.key()).unwrap().unwrap();
        assert_eq!(stored.phase(), PromotionPhase::Failed);
        let message = stored.status.error.unwrap();
        assert!(message.starts_with("error promoting Promotion ns/p1 into Stage ns/prod"));
    }

    #[test]
    fn test_transient_error_leaves_promotion_running() {
        let f = Fixture::new();
        f.stage();
        let promo = f.promotion("p1", "abc");
        let reconciler = f.reconciler(Arc::new(
            |_: &Stage, _: &Promotion| -> Result<PromotionStatus, MechanicsError> {
                Err(MechanicsError::transient("connection reset"))
            },
        ));

        let err = reconciler.reconcile(&promo.key()).unwrap_err();
        assert!(matches!(err, ReconcileError::Transient { .. }));
        assert_eq!(f.phase(&promo.key()), PromotionPhase::Running);
    }

    #[test]
    fn test_in_progress_requeues() {
        let f = Fixture::new();
        f.stage();
        let promo = f.promotion("p1", "abc");
        let reconciler = f.reconciler(Arc::new(
            |_: &Stage, _: &Promotion| -> Result<PromotionStatus, MechanicsError> {
                Ok(PromotionStatus::with_phase(PromotionPhase::Running))
            },
        ));

        assert_eq!(
            reconciler.reconcile(&promo.key()).unwrap(),
            ReconcileOutcome::RequeueAfter(Duration::from_secs(5))
        );
        assert_eq!(f.phase(&promo.key()), PromotionPhase::Running);
    }

    /// Bumps the stored version before the first status write lands.
    struct ConflictingStore {
        inner: Arc<MemoryStore>,
        conflicts: AtomicU32,
    }

    impl ObjectStore for ConflictingStore {
        fn get_promotion(&self, key: &PromotionRef) -> StoreResult<Option<Promotion>> {
            self.inner.get_promotion(key)
        }
        fn get_stage(&self, key: &StageKey) -> StoreResult<Option<Stage>> {
            self.inner.get_stage(key)
        }
        fn list_promotions(&self) -> StoreResult<Vec<Promotion>> {
            self.inner.list_promotions()
        }
        fn list_running_promotions_for_application(
            &self,
            app: &crate::api::ApplicationKey,
        ) -> StoreResult<Vec<Promotion>> {
            self.inner.list_running_promotions_for_application(app)
        }
        fn update_promotion_status(
            &self,
            key: &PromotionRef,
            resource_version: u64,
            status: PromotionStatus,
        ) -> StoreResult<Promotion> {
            if self.conflicts.load(Ordering::SeqCst) > 0 {
                self.conflicts.fetch_sub(1, Ordering::SeqCst);
                let current = self.inner.get_promotion(key)?.ok_or_else(|| {
                    StoreError::not_found("Promotion", key)
                })?;
                self.inner.update_promotion_status(
                    key,
                    current.metadata.resource_version,
                    current.status,
                )?;
            }
            self.inner.update_promotion_status(key, resource_version, status)
        }
        fn subscribe(&self) -> WatchStream {
            self.inner.subscribe()
        }
    }

    #[test]
    fn test_status_conflict_is_retried() {
        let f = Fixture::new();
        f.stage();
        let promo = f.promotion("p1", "abc");
        let store = Arc::new(ConflictingStore {
            inner: f.store.clone(),
            conflicts: AtomicU32::new(1),
        });
        let reconciler = f.reconciler_with_store(store, Arc::new(SpecCheckMechanics));

        assert_eq!(reconciler.reconcile(&promo.key()).unwrap(), ReconcileOutcome::Done);
        assert_eq!(f.phase(&promo.key()), PromotionPhase::Succeeded);
    }

    #[test]
    fn test_status_conflicts_exhaust_retries() {
        let f = Fixture::new();
        f.stage();
        let promo = f.promotion("p1", "abc");
        let store = Arc::new(ConflictingStore {
            inner: f.store.clone(),
            conflicts: AtomicU32::new(u32::MAX),
        });
        let reconciler = f.reconciler_with_store(store, Arc::new(SpecCheckMechanics));

        let err = reconciler.reconcile(&promo.key()).unwrap_err();
        assert!(matches!(err, ReconcileError::StatusUpdate { .. }));
        assert_eq!(f.phase(&promo.key()), PromotionPhase::Pending);
    }

    #[derive(Clone, Copy)]
    enum Race {
        Delete,
        Fail,
    }

    impl Race {
        fn apply(self, store: &MemoryStore, key: &PromotionRef) {
            match self {
                Race::Delete => {
                    store.delete_promotion(key).unwrap();
                }
                Race::Fail => {
                    let current = store.get_promotion(key).unwrap().unwrap();
                    store
                        .update_promotion_status(
                            key,
                            current.metadata.resource_version,
                            PromotionStatus::failed("aborted"),
                        )
                        .unwrap();
                }
            }
        }
    }

    /// Lets another writer change a Promotion at a chosen point of a
    /// reconcile. On the first read, the stale snapshot is returned after
    /// the change and its conclusion have landed.
    struct RacingStore {
        inner: Arc<MemoryStore>,
        registry: Arc<StageQueueRegistry>,
        on_read: std::sync::Mutex<Option<Race>>,
        on_write: std::sync::Mutex<Option<Race>>,
    }

    impl RacingStore {
        fn on_read(f: &Fixture, race: Race) -> Self {
            Self {
                inner: f.store.clone(),
                registry: f.registry.clone(),
                on_read: std::sync::Mutex::new(Some(race)),
                on_write: std::sync::Mutex::new(None),
            }
        }

        fn on_write(f: &Fixture, race: Race) -> Self {
            Self {
                inner: f.store.clone(),
                registry: f.registry.clone(),
                on_read: std::sync::Mutex::new(None),
                on_write: std::sync::Mutex::new(Some(race)),
            }
        }
    }

    impl ObjectStore for RacingStore {
        fn get_promotion(&self, key: &PromotionRef) -> StoreResult<Option<Promotion>> {
            let race = self.on_read.lock().unwrap().take();
            match race {
                Some(race) => {
                    let snapshot = self.inner.get_promotion(key)?;
                    race.apply(&self.inner, key);
                    if let Some(promo) = &snapshot {
                        self.registry.conclude(&promo.stage_key(), key);
                    }
                    Ok(snapshot)
                }
                None => self.inner.get_promotion(key),
            }
        }
        fn get_stage(&self, key: &StageKey) -> StoreResult<Option<Stage>> {
            self.inner.get_stage(key)
        }
        fn list_promotions(&self) -> StoreResult<Vec<Promotion>> {
            self.inner.list_promotions()
        }
        fn list_running_promotions_for_application(
            &self,
            app: &crate::api::ApplicationKey,
        ) -> StoreResult<Vec<Promotion>> {
            self.inner.list_running_promotions_for_application(app)
        }
        fn update_promotion_status(
            &self,
            key: &PromotionRef,
            resource_version: u64,
            status: PromotionStatus,
        ) -> StoreResult<Promotion> {
            let race = self.on_write.lock().unwrap().take();
            if let Some(race) = race {
                race.apply(&self.inner, key);
            }
            self.inner.update_promotion_status(key, resource_version, status)
        }
        fn subscribe(&self) -> WatchStream {
            self.inner.subscribe()
        }
    }

    fn assert_stage_free(f: &Fixture, p1: &Promotion) {
        let stage = p1.stage_key();
        assert_ne!(f.registry.active(&stage), Some(p1.key()));
        let p2 = f.promotion("p2", "abc");
        assert_eq!(
            f.registry.admit(&stage, PendingPromotion::from(&p2)),
            crate::scheduling::Admission::BecameActive
        );
    }

    #[test]
    fn test_deleted_before_claim_releases_stage() {
        let f = Fixture::new();
        f.stage();
        let p1 = f.promotion("p1", "abc");
        f.registry.admit(&p1.stage_key(), PendingPromotion::from(&p1));
        let store = Arc::new(RacingStore::on_read(&f, Race::Delete));
        let reconciler = f.reconciler_with_store(store, Arc::new(SpecCheckMechanics));

        assert_eq!(reconciler.reconcile(&p1.key()).unwrap(), ReconcileOutcome::Done);
        assert_stage_free(&f, &p1);
    }

    #[test]
    fn test_finished_before_claim_releases_stage() {
        let f = Fixture::new();
        f.stage();
        let p1 = f.promotion("p1", "abc");
        f.registry.admit(&p1.stage_key(), PendingPromotion::from(&p1));
        let store = Arc::new(RacingStore::on_read(&f, Race::Fail));
        let reconciler = f.reconciler_with_store(store, Arc::new(SpecCheckMechanics));

        assert_eq!(reconciler.reconcile(&p1.key()).unwrap(), ReconcileOutcome::Done);
        assert_eq!(f.phase(&p1.key()), PromotionPhase::Failed);
        assert_stage_free(&f, &p1);
    }

    #[test]
    fn test_deleted_during_status_write_releases_stage() {
        let f = Fixture::new();
        f.stage();
        let p1 = f.promotion("p1", "abc");
        let store = Arc::new(RacingStore::on_write(&f, Race::Delete));
        let reconciler = f.reconciler_with_store(store, Arc::new(SpecCheckMechanics));

        assert_eq!(reconciler.reconcile(&p1.key()).unwrap(), ReconcileOutcome::Done);
        assert_eq!(f.metrics.snapshot().conclusions, 1);
        assert_stage_free(&f, &p1);
    }

    #[test]
    fn test_finished_during_status_write_releases_stage() {
        let f = Fixture::new();
        f.stage();
        let p1 = f.promotion("p1", "abc");
        let store = Arc::new(RacingStore::on_write(&f, Race::Fail));
        let reconciler = f.reconciler_with_store(store, Arc::new(SpecCheckMechanics));

        assert_eq!(reconciler.reconcile(&p1.key()).unwrap(), ReconcileOutcome::Done);
        let stored = f.store.get_promotion(&p1.key()).unwrap().unwrap();
        assert_eq!(stored.status.error.as_deref(), Some("aborted"));
        assert_stage_free(&f, &p1);
    }
}
