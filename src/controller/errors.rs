//! # Controller Errors

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::api::{PromotionRef, StageKey};
use crate::store::StoreError;

/// Result type for a single reconcile
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Result type for loading configuration
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Failure reported by a promotion mechanics executor.
///
/// The two kinds are handled differently: a structural failure ends the
/// Promotion, a transient failure is retried with backoff.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MechanicsError {
    /// The Promotion can never succeed as specified.
    #[error("{0}")]
    Structural(String),

    /// The attempt failed but may succeed later.
    #[error("{0}")]
    Transient(String),
}

impl MechanicsError {
    pub fn structural(message: impl Into<String>) -> Self {
        Self::Structural(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Reasons a reconcile must be retried
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("error reading Promotion {promotion}: {source}")]
    ReadPromotion {
        promotion: PromotionRef,
        #[source]
        source: StoreError,
    },

    #[error("error reading Stage {stage}: {source}")]
    ReadStage {
        stage: StageKey,
        #[source]
        source: StoreError,
    },

    #[error("error updating status of Promotion {promotion}: {source}")]
    StatusUpdate {
        promotion: PromotionRef,
        #[source]
        source: StoreError,
    },

    #[error("error promoting Promotion {promotion} into Stage {stage}: {message}")]
    Transient {
        promotion: PromotionRef,
        stage: StageKey,
        message: String,
    },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}
