//! # Object Store Errors

use thiserror::Error;

/// Result type for object store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Object store errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: String },

    /// The write was based on a stale resource version.
    #[error("conflict updating {kind} {key}: expected resource version {expected}, found {actual}")]
    Conflict {
        kind: &'static str,
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("invalid {kind} name {name:?}: {reason}")]
    InvalidName {
        kind: &'static str,
        name: String,
        reason: &'static str,
    },

    /// The store could not be reached or read.
    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_message() {
        let err = StoreError::Conflict {
            kind: "Promotion",
            key: "ns/p1".to_string(),
            expected: 3,
            actual: 4,
        };
        assert!(err.is_conflict());
        assert_eq!(
            err.to_string(),
            "conflict updating Promotion ns/p1: expected resource version 3, found 4"
        );
    }

    #[test]
    fn test_not_found() {
        let err = StoreError::not_found("Stage", "ns/s1");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Stage ns/s1 not found");
    }
}
