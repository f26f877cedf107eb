//! # In-Memory Object Store

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;

use super::errors::{StoreError, StoreResult};
use super::index::{running_promotions_by_argocd_applications, FieldIndex};
use super::validation::validate_name;
use super::{ObjectStore, WatchEvent, WatchStream};
use crate::api::{
    Application, ApplicationKey, Promotion, PromotionRef, PromotionStatus, Stage, StageKey,
    DEFAULT_ARGOCD_NAMESPACE,
};

/// Watch events buffered per subscriber before it starts lagging.
const WATCH_CAPACITY: usize = 1024;

#[derive(Debug, Default)]
struct StoreState {
    last_version: u64,
    promotions: BTreeMap<PromotionRef, Promotion>,
    stages: BTreeMap<StageKey, Stage>,
    applications: BTreeMap<ApplicationKey, Application>,
    running_by_app: FieldIndex,
}

impl StoreState {
    fn next_version(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }

    fn reindex(&mut self, key: &PromotionRef, argocd_namespace: &str) {
        let values = match self.promotions.get(key) {
            Some(promo) => {
                let stage = self.stages.get(&promo.stage_key());
                running_promotions_by_argocd_applications(promo, stage, argocd_namespace)
            }
            None => Vec::new(),
        };
        self.running_by_app.update(key, values);
    }
}

/// Versioned, watchable object store held in memory.
#[derive(Debug)]
pub struct MemoryStore {
    state: RwLock<StoreState>,
    events: broadcast::Sender<WatchEvent>,
    argocd_namespace: String,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_ARGOCD_NAMESPACE)
    }
}

impl MemoryStore {
    /// Create an empty store. `argocd_namespace` is assumed for Application
    /// updates that do not name a namespace.
    pub fn new(argocd_namespace: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            state: RwLock::new(StoreState::default()),
            events,
            argocd_namespace: argocd_namespace.into(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: WatchEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Create a Promotion. Its phase starts as given (normally Pending).
    pub fn create_promotion(&self, mut promo: Promotion) -> StoreResult<Promotion> {
        validate_name("Promotion", &promo.metadata.name)?;
        validate_name("Namespace", &promo.metadata.namespace)?;
        validate_name("Stage", &promo.spec.stage)?;

        let key = promo.key();
        let mut state = self.write();
        if state.promotions.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: "Promotion",
                key: key.to_string(),
            });
        }
        promo.metadata.resource_version = state.next_version();
        state.promotions.insert(key.clone(), promo.clone());
        state.reindex(&key, &self.argocd_namespace);
        self.emit(WatchEvent::PromotionCreated(promo.clone()));
        Ok(promo)
    }

    /// Delete a Promotion, returning its last state.
    pub fn delete_promotion(&self, key: &PromotionRef) -> StoreResult<Promotion> {
        let mut state = self.write();
        let promo = state
            .promotions
            .remove(key)
            .ok_or_else(|| StoreError::not_found("Promotion", key))?;
        state.running_by_app.remove(key);
        self.emit(WatchEvent::PromotionDeleted(promo.clone()));
        Ok(promo)
    }

    /// Create or replace a Stage.
    pub fn upsert_stage(&self, mut stage: Stage) -> StoreResult<Stage> {
        validate_name("Stage", &stage.metadata.name)?;
        validate_name("Namespace", &stage.metadata.namespace)?;

        let key = stage.key();
        let mut state = self.write();
        stage.metadata.resource_version = state.next_version();
        state.stages.insert(key.clone(), stage.clone());

        let affected: Vec<PromotionRef> = state
            .promotions
            .values()
            .filter(|p| p.stage_key() == key)
            .map(Promotion::key)
            .collect();
        for promo in &affected {
            state.reindex(promo, &self.argocd_namespace);
        }
        Ok(stage)
    }

    /// Create or replace an Application. Replacing emits an update event.
    pub fn upsert_application(&self, mut app: Application) -> StoreResult<Application> {
        validate_name("Application", &app.metadata.name)?;
        validate_name("Namespace", &app.metadata.namespace)?;

        let key = app.key();
        let mut state = self.write();
        app.metadata.resource_version = state.next_version();
        let old = state.applications.insert(key, app.clone());
        if old.is_some() {
            self.emit(WatchEvent::ApplicationUpdated {
                old,
                new: Some(app.clone()),
            });
        }
        Ok(app)
    }

    pub fn get_application(&self, key: &ApplicationKey) -> Option<Application> {
        self.read().applications.get(key).cloned()
    }
}

impl ObjectStore for MemoryStore {
    fn get_promotion(&self, key: &PromotionRef) -> StoreResult<Option<Promotion>> {
        Ok(self.read().promotions.get(key).cloned())
    }

    fn get_stage(&self, key: &StageKey) -> StoreResult<Option<Stage>> {
        Ok(self.read().stages.get(key).cloned())
    }

    fn list_promotions(&self) -> StoreResult<Vec<Promotion>> {
        Ok(self.read().promotions.values().cloned().collect())
    }

    fn list_running_promotions_for_application(
        &self,
        app: &ApplicationKey,
    ) -> StoreResult<Vec<Promotion>> {
        let state = self.read();
        Ok(state
            .running_by_app
            .lookup(&app.index_value())
            .iter()
            .filter_map(|key| state.promotions.get(key).cloned())
            .collect())
    }

    fn update_promotion_status(
        &self,
        key: &PromotionRef,
        resource_version: u64,
        status: PromotionStatus,
    ) -> StoreResult<Promotion> {
        let mut state = self.write();
        let current = state
            .promotions
            .get(key)
            .ok_or_else(|| StoreError::not_found("Promotion", key))?;
        if current.metadata.resource_version != resource_version {
            return Err(StoreError::Conflict {
                kind: "Promotion",
                key: key.to_string(),
                expected: resource_version,
                actual: current.metadata.resource_version,
            });
        }

        let old = current.clone();
        let mut updated = old.clone();
        updated.status = status;
        updated.metadata.resource_version = state.next_version();
        state.promotions.insert(key.clone(), updated.clone());
        state.reindex(key, &self.argocd_namespace);
        self.emit(WatchEvent::PromotionUpdated {
            old: Some(old),
            new: Some(updated.clone()),
        });
        Ok(updated)
    }

    fn subscribe(&self) -> WatchStream {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{ArgoCDAppUpdate, PromotionMechanisms, PromotionPhase};

    fn stage_with_app(name: &str, app: &str) -> Stage {
        let mut stage = Stage::new("ns", name);
        stage.spec.promotion_mechanisms = Some(PromotionMechanisms {
            git_repo_updates: vec![],
            argocd_app_updates: vec![ArgoCDAppUpdate {
                app_name: app.to_string(),
                ..Default::default()
            }],
        });
        stage
    }

    #[test]
    fn test_create_and_get() {
        let store = MemoryStore::default();
        let created = store
            .create_promotion(Promotion::new("ns", "p1", "s1", "a"))
            .unwrap();
        assert_eq!(created.metadata.resource_version, 1);

        let fetched = store.get_promotion(&created.key()).unwrap().unwrap();
        assert_eq!(fetched, created);
        assert!(store
            .get_promotion(&PromotionRef::new("ns", "missing"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_create_rejects_duplicates_and_bad_names() {
        let store = MemoryStore::default();
        store
            .create_promotion(Promotion::new("ns", "p1", "s1", "a"))
            .unwrap();

        let dup = store.create_promotion(Promotion::new("ns", "p1", "s1", "a"));
        assert!(matches!(dup, Err(StoreError::AlreadyExists { .. })));

        let bad = store.create_promotion(Promotion::new("ns", "P_1", "s1", "a"));
        assert!(matches!(bad, Err(StoreError::InvalidName { .. })));
    }

    #[test]
    fn test_status_update_optimistic_concurrency() {
        let store = MemoryStore::default();
        let promo = store
            .create_promotion(Promotion::new("ns", "p1", "s1", "a"))
            .unwrap();

        let running = store
            .update_promotion_status(
                &promo.key(),
                promo.metadata.resource_version,
                PromotionStatus::with_phase(PromotionPhase::Running),
            )
            .unwrap();
        assert_eq!(running.phase(), PromotionPhase::Running);

        let stale = store.update_promotion_status(
            &promo.key(),
            promo.metadata.resource_version,
            PromotionStatus::with_phase(PromotionPhase::Succeeded),
        );
        assert!(stale.unwrap_err().is_conflict());

        let missing = store.update_promotion_status(
            &PromotionRef::new("ns", "nope"),
            1,
            PromotionStatus::default(),
        );
        assert!(missing.unwrap_err().is_not_found());
    }

    #[test]
    fn test_watch_events() {
        let store = MemoryStore::default();
        let mut events = store.subscribe();

        let promo = store
            .create_promotion(Promotion::new("ns", "p1", "s1", "a"))
            .unwrap();
        store
            .update_promotion_status(
                &promo.key(),
                promo.metadata.resource_version,
                PromotionStatus::with_phase(PromotionPhase::Running),
            )
            .unwrap();
        store.delete_promotion(&promo.key()).unwrap();

        assert!(matches!(events.try_recv(), Ok(WatchEvent::PromotionCreated(_))));
        match events.try_recv() {
            Ok(WatchEvent::PromotionUpdated {
                old: Some(old),
                new: Some(new),
            }) => {
                assert_eq!(old.phase(), PromotionPhase::Pending);
                assert_eq!(new.phase(), PromotionPhase::Running);
            }
            other => panic!("expected PromotionUpdated, got {other:?}"),
        }
        assert!(matches!(events.try_recv(), Ok(WatchEvent::PromotionDeleted(_))));
    }

    #[test]
    fn test_application_update_event_only_on_replace() {
        let store = MemoryStore::default();
        let mut events = store.subscribe();

        store.upsert_application(Application::new("argocd", "app")).unwrap();
        assert!(events.try_recv().is_err());

        store.upsert_application(Application::new("argocd", "app")).unwrap();
        assert!(matches!(
            events.try_recv(),
            Ok(WatchEvent::ApplicationUpdated { old: Some(_), new: Some(_) })
        ));
    }

    #[test]
    fn test_running_promotions_index() {
        let store = MemoryStore::default();
        store.upsert_stage(stage_with_app("s1", "guestbook")).unwrap();
        let app = ApplicationKey::new("argocd", "guestbook");

        let promo = store
            .create_promotion(Promotion::new("ns", "p1", "s1", "a"))
            .unwrap();
        assert!(store.list_running_promotions_for_application(&app).unwrap().is_empty());

        let promo = store
            .update_promotion_status(
                &promo.key(),
                promo.metadata.resource_version,
                PromotionStatus::with_phase(PromotionPhase::Running),
            )
            .unwrap();
        let running = store.list_running_promotions_for_application(&app).unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].key(), promo.key());

        // Re-pointing the Stage at another Application moves the entry.
        store.upsert_stage(stage_with_app("s1", "other")).unwrap();
        assert!(store.list_running_promotions_for_application(&app).unwrap().is_empty());
        let other = ApplicationKey::new("argocd", "other");
        assert_eq!(store.list_running_promotions_for_application(&other).unwrap().len(), 1);

        store
            .update_promotion_status(
                &promo.key(),
                promo.metadata.resource_version,
                PromotionStatus::with_phase(PromotionPhase::Succeeded),
            )
            .unwrap();
        assert!(store.list_running_promotions_for_application(&other).unwrap().is_empty());
    }
}
