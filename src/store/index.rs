//! Field Indexes
//!
//! The Application-changed handler must find the Promotions currently
//! running against an Application without scanning every Promotion. The
//! store keeps a field index from `"<app-namespace>:<app-name>"` to the
//! running Promotions whose Stage updates that Application.

use std::collections::{BTreeSet, HashMap};

use crate::api::{Promotion, PromotionPhase, PromotionRef, Stage};

/// Name of the running-Promotions-by-Application index.
pub const RUNNING_PROMOTIONS_BY_ARGOCD_APPLICATIONS_INDEX_FIELD: &str =
    "runningPromotionsByArgoCDApplications";

/// Index values for `promo` in the running-Promotions-by-Application index.
///
/// Only Running Promotions are indexed. The Applications come from the
/// Promotion's Stage; without a Stage there is nothing to index.
pub fn running_promotions_by_argocd_applications(
    promo: &Promotion,
    stage: Option<&Stage>,
    default_namespace: &str,
) -> Vec<String> {
    if promo.phase() != PromotionPhase::Running {
        return Vec::new();
    }
    let Some(stage) = stage else {
        return Vec::new();
    };
    let mut values: Vec<String> = stage
        .argocd_applications(default_namespace)
        .iter()
        .map(|app| app.index_value())
        .collect();
    values.sort();
    values.dedup();
    values
}

/// A maintained inverted index from field value to Promotion keys.
#[derive(Debug, Default)]
pub struct FieldIndex {
    by_value: HashMap<String, BTreeSet<PromotionRef>>,
    values_by_object: HashMap<PromotionRef, Vec<String>>,
}

impl FieldIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the indexed values for `key`.
    pub fn update(&mut self, key: &PromotionRef, values: Vec<String>) {
        self.remove(key);
        if values.is_empty() {
            return;
        }
        for value in &values {
            self.by_value
                .entry(value.clone())
                .or_default()
                .insert(key.clone());
        }
        self.values_by_object.insert(key.clone(), values);
    }

    /// Drop every value indexed for `key`.
    pub fn remove(&mut self, key: &PromotionRef) {
        let Some(values) = self.values_by_object.remove(key) else {
            return;
        };
        for value in values {
            if let Some(keys) = self.by_value.get_mut(&value) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_value.remove(&value);
                }
            }
        }
    }

    /// Keys indexed under `value`, sorted.
    pub fn lookup(&self, value: &str) -> Vec<PromotionRef> {
        self.by_value
            .get(value)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }
}
