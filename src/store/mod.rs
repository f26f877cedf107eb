//! Object Store
//!
//! The controller does not own its resources. It reads them from, and
//! writes Promotion status back to, a watchable object store with
//! optimistic concurrency. [`ObjectStore`] is that boundary.
//!
//! Reads are expected to be served from an in-memory cache kept current by
//! the watch, so they are cheap enough to call while the scheduling
//! registry is locked.
//!
//! [`MemoryStore`] implements the contract entirely in memory.

mod errors;
mod index;
mod memory;
mod validation;

pub use errors::{StoreError, StoreResult};
pub use index::{
    running_promotions_by_argocd_applications, FieldIndex,
    RUNNING_PROMOTIONS_BY_ARGOCD_APPLICATIONS_INDEX_FIELD,
};
pub use memory::MemoryStore;
pub use validation::validate_name;

use tokio::sync::broadcast;

use crate::api::{
    Application, ApplicationKey, Promotion, PromotionRef, PromotionStatus, Stage, StageKey,
};

/// A change notification from the watch feed.
///
/// Updates carry both snapshots. Either may be missing on a malformed
/// delivery; handlers log and skip those.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    PromotionCreated(Promotion),
    PromotionUpdated {
        old: Option<Promotion>,
        new: Option<Promotion>,
    },
    PromotionDeleted(Promotion),
    ApplicationUpdated {
        old: Option<Application>,
        new: Option<Application>,
    },
}

/// Receiving end of the watch feed.
pub type WatchStream = broadcast::Receiver<WatchEvent>;

/// Read, list, status-write and watch access to controller resources.
pub trait ObjectStore: Send + Sync {
    /// Fetch a Promotion; `Ok(None)` if it does not exist.
    fn get_promotion(&self, key: &PromotionRef) -> StoreResult<Option<Promotion>>;

    /// Fetch a Stage; `Ok(None)` if it does not exist.
    fn get_stage(&self, key: &StageKey) -> StoreResult<Option<Stage>>;

    /// Every Promotion, ordered by key.
    fn list_promotions(&self) -> StoreResult<Vec<Promotion>>;

    /// Running Promotions whose Stage updates `app`.
    fn list_running_promotions_for_application(
        &self,
        app: &ApplicationKey,
    ) -> StoreResult<Vec<Promotion>>;

    /// Replace a Promotion's status if its resource version still matches.
    fn update_promotion_status(
        &self,
        key: &PromotionRef,
        resource_version: u64,
        status: PromotionStatus,
    ) -> StoreResult<Promotion>;

    /// Subscribe to change notifications made after this call.
    fn subscribe(&self) -> WatchStream;
}
