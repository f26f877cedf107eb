//! Object name validation

use std::sync::OnceLock;

use regex::Regex;

use super::errors::{StoreError, StoreResult};

const MAX_NAME_LEN: usize = 253;

static DNS1123_SUBDOMAIN: OnceLock<Regex> = OnceLock::new();

fn dns1123_subdomain() -> &'static Regex {
    DNS1123_SUBDOMAIN.get_or_init(|| {
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
            .unwrap_or_else(|e| panic!("invalid DNS-1123 pattern: {e}"))
    })
}

/// Check that `name` is a valid DNS-1123 subdomain.
pub fn validate_name(kind: &'static str, name: &str) -> StoreResult<()> {
    let reason = if name.is_empty() {
        "must not be empty"
    } else if name.len() > MAX_NAME_LEN {
        "must be no more than 253 characters"
    } else if !dns1123_subdomain().is_match(name) {
        "must consist of lower case alphanumeric characters, '-' or '.'"
    } else {
        return Ok(());
    };
    Err(StoreError::InvalidName {
        kind,
        name: name.to_string(),
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_names() {
        for name in ["test", "kargo-demo", "p1.v2", "0abc"] {
            assert!(validate_name("Promotion", name).is_ok(), "{name}");
        }
    }

    #[test]
    fn test_invalid_names() {
        for name in ["", "Upper", "-lead", "trail-", "has space", "under_score"] {
            assert!(validate_name("Promotion", name).is_err(), "{name}");
        }
        assert!(validate_name("Stage", &"a".repeat(254)).is_err());
    }
}
