//! Resource model for promoctl
//!
//! Promotions, Stages and the Argo CD Applications they update, plus the
//! keys used to schedule and index them.

mod types;

pub use types::{
    Application, ApplicationKey, ArgoCDAppUpdate, ArgoCDSourceUpdate, Chart, ChartSubscription,
    GitCommit, GitRepoUpdate, GitSubscription, Image, ImageSubscription, ObjectMeta, Promotion,
    PromotionMechanisms, PromotionPhase, PromotionRef, PromotionSpec, PromotionStatus,
    RepoSubscriptions, Stage, StageKey, StageSpec, StageState, StageStatus, StageSubscription,
    Subscriptions, DEFAULT_ARGOCD_NAMESPACE, SHARD_LABEL_KEY,
};
