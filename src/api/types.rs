//! Resource types
//!
//! Promotions and Stages as the controller observes them. Field names follow
//! the serialized form used by fixtures and the object store.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Namespace used for Argo CD Applications when an update omits one.
pub const DEFAULT_ARGOCD_NAMESPACE: &str = "argocd";

/// Label carrying the controller shard a resource belongs to.
pub const SHARD_LABEL_KEY: &str = "kargo.akuity.io/shard";

/// Identifies one scheduling domain: a Stage within a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StageKey {
    pub namespace: String,
    pub name: String,
}

impl StageKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for StageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Identifies a Promotion resource.
///
/// Used as the identity of pending queue entries and as the active marker
/// for a Stage. Ordered by namespace, then name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PromotionRef {
    pub namespace: String,
    pub name: String,
}

impl PromotionRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for PromotionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Identifies an Argo CD Application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationKey {
    pub namespace: String,
    pub name: String,
}

impl ApplicationKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Value of this Application in the running-promotions index.
    pub fn index_value(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }
}

impl fmt::Display for ApplicationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Object metadata shared by all resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    #[serde(default = "Utc::now")]
    pub creation_timestamp: DateTime<Utc>,
    /// Assigned by the object store on every write.
    #[serde(default)]
    pub resource_version: u64,
    #[serde(default)]
    pub labels: std::collections::BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            creation_timestamp: Utc::now(),
            resource_version: 0,
            labels: Default::default(),
        }
    }

    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

// =============================================================================
// Promotion
// =============================================================================

/// Lifecycle phase of a Promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PromotionPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Errored,
}

impl PromotionPhase {
    /// Whether the Promotion will never transition out of this phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Errored)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Succeeded => "Succeeded",
            Self::Failed => "Failed",
            Self::Errored => "Errored",
        }
    }
}

impl fmt::Display for PromotionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromotionSpec {
    /// Name of the Stage, in the Promotion's namespace, being promoted.
    pub stage: String,
    /// Id of the StageState to promote into the Stage.
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PromotionStatus {
    #[serde(default)]
    pub phase: PromotionPhase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PromotionStatus {
    pub fn with_phase(phase: PromotionPhase) -> Self {
        Self { phase, error: None }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            phase: PromotionPhase::Failed,
            error: Some(error.into()),
        }
    }

    pub fn errored(error: impl Into<String>) -> Self {
        Self {
            phase: PromotionPhase::Errored,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    pub metadata: ObjectMeta,
    pub spec: PromotionSpec,
    #[serde(default)]
    pub status: PromotionStatus,
}

impl Promotion {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        stage: impl Into<String>,
        state: impl Into<String>,
    ) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: PromotionSpec {
                stage: stage.into(),
                state: state.into(),
            },
            status: PromotionStatus::default(),
        }
    }

    pub fn key(&self) -> PromotionRef {
        PromotionRef::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// The Stage this Promotion is scheduled against.
    pub fn stage_key(&self) -> StageKey {
        StageKey::new(&self.metadata.namespace, &self.spec.stage)
    }

    pub fn phase(&self) -> PromotionPhase {
        self.status.phase
    }

    pub fn is_terminal(&self) -> bool {
        self.status.phase.is_terminal()
    }
}

// =============================================================================
// Stage
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitSubscription {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    #[serde(default)]
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSubscription {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    #[serde(default)]
    pub update_strategy: String,
    #[serde(default)]
    pub semver_constraint: String,
    #[serde(default)]
    pub allow_tags: String,
    #[serde(default)]
    pub ignore_tags: Vec<String>,
    #[serde(default)]
    pub platform: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSubscription {
    #[serde(rename = "registryURL")]
    pub registry_url: String,
    pub name: String,
    #[serde(default)]
    pub semver_constraint: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RepoSubscriptions {
    #[serde(default)]
    pub git: Vec<GitSubscription>,
    #[serde(default)]
    pub images: Vec<ImageSubscription>,
    #[serde(default)]
    pub charts: Vec<ChartSubscription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSubscription {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscriptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repos: Option<RepoSubscriptions>,
    #[serde(default)]
    pub upstream_stages: Vec<StageSubscription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitRepoUpdate {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    #[serde(default)]
    pub read_branch: String,
    #[serde(default)]
    pub write_branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDSourceUpdate {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    #[serde(default)]
    pub chart: String,
    #[serde(default)]
    pub update_target_revision: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgoCDAppUpdate {
    pub app_name: String,
    #[serde(default)]
    pub app_namespace: String,
    #[serde(default)]
    pub source_updates: Vec<ArgoCDSourceUpdate>,
}

impl ArgoCDAppUpdate {
    /// Key of the referenced Application, falling back to `default_namespace`.
    pub fn application_key(&self, default_namespace: &str) -> ApplicationKey {
        let namespace = if self.app_namespace.is_empty() {
            default_namespace
        } else {
            &self.app_namespace
        };
        ApplicationKey::new(namespace, &self.app_name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromotionMechanisms {
    #[serde(default)]
    pub git_repo_updates: Vec<GitRepoUpdate>,
    #[serde(default, rename = "argoCDAppUpdates")]
    pub argocd_app_updates: Vec<ArgoCDAppUpdate>,
}

impl PromotionMechanisms {
    pub fn is_empty(&self) -> bool {
        self.git_repo_updates.is_empty() && self.argocd_app_updates.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriptions: Option<Subscriptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion_mechanisms: Option<PromotionMechanisms>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitCommit {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    pub tag: String,
}

/// A chart version selected for promotion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chart {
    #[serde(rename = "repoURL")]
    pub repo_url: String,
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageState {
    pub id: String,
    #[serde(default)]
    pub commits: Vec<GitCommit>,
    #[serde(default)]
    pub images: Vec<Image>,
    #[serde(default)]
    pub charts: Vec<Chart>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageStatus {
    #[serde(default)]
    pub available_states: Vec<StageState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_state: Option<StageState>,
    #[serde(default)]
    pub history: Vec<StageState>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: StageSpec,
    #[serde(default)]
    pub status: StageStatus,
}

impl Stage {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            spec: StageSpec::default(),
            status: StageStatus::default(),
        }
    }

    pub fn key(&self) -> StageKey {
        StageKey::new(&self.metadata.namespace, &self.metadata.name)
    }

    /// Applications this Stage's promotion mechanisms update.
    pub fn argocd_applications(&self, default_namespace: &str) -> Vec<ApplicationKey> {
        self.spec
            .promotion_mechanisms
            .as_ref()
            .map(|m| {
                m.argocd_app_updates
                    .iter()
                    .map(|u| u.application_key(default_namespace))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn available_state(&self, id: &str) -> Option<&StageState> {
        self.status.available_states.iter().find(|s| s.id == id)
    }
}

// =============================================================================
// Application
// =============================================================================

/// An Argo CD Application as far as the controller needs to see it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub health: String,
    #[serde(default)]
    pub sync_status: String,
}

impl Application {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(namespace, name),
            health: String::new(),
            sync_status: String::new(),
        }
    }

    pub fn key(&self) -> ApplicationKey {
        ApplicationKey::new(&self.metadata.namespace, &self.metadata.name)
    }
}
