//! Scheduler metrics
//!
//! Counters only, monotonic, reset on process start.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters for the scheduling engine and reconciler
///
/// Uses Relaxed ordering: counters are independent and only read for
/// reporting.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    /// Promotions admitted (active or queued)
    admissions: AtomicU64,
    /// Promotions that claimed their Stage
    activations: AtomicU64,
    /// Activation attempts that had to wait
    deferrals: AtomicU64,
    /// Stages released by a terminal or deleted Promotion
    conclusions: AtomicU64,
    /// Stale queue entries dropped during selection
    stale_discards: AtomicU64,
    /// Next Promotions sent to the work queue
    dispatches: AtomicU64,
    /// Running Promotions re-queued by Application changes
    rechecks: AtomicU64,
    /// Reconcile invocations
    reconciles: AtomicU64,
    /// Reconcile invocations that returned an error
    reconcile_errors: AtomicU64,
}

impl SchedulerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_admissions(&self) {
        self.admissions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_activations(&self) {
        self.activations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_deferrals(&self) {
        self.deferrals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_conclusions(&self) {
        self.conclusions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_stale_discards(&self) {
        self.stale_discards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_dispatches(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_rechecks(&self) {
        self.rechecks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_reconciles(&self) {
        self.reconciles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_reconcile_errors(&self) {
        self.reconcile_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            admissions: self.admissions.load(Ordering::Relaxed),
            activations: self.activations.load(Ordering::Relaxed),
            deferrals: self.deferrals.load(Ordering::Relaxed),
            conclusions: self.conclusions.load(Ordering::Relaxed),
            stale_discards: self.stale_discards.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            rechecks: self.rechecks.load(Ordering::Relaxed),
            reconciles: self.reconciles.load(Ordering::Relaxed),
            reconcile_errors: self.reconcile_errors.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of all metrics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub admissions: u64,
    pub activations: u64,
    pub deferrals: u64,
    pub conclusions: u64,
    pub stale_discards: u64,
    pub dispatches: u64,
    pub rechecks: u64,
    pub reconciles: u64,
    pub reconcile_errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metrics_are_zero() {
        let metrics = SchedulerMetrics::new();
        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.admissions, 0);
        assert_eq!(snapshot.activations, 0);
        assert_eq!(snapshot.reconciles, 0);
    }

    #[test]
    fn test_increment_counters() {
        let metrics = SchedulerMetrics::new();

        metrics.increment_admissions();
        metrics.increment_admissions();
        metrics.increment_activations();
        metrics.increment_deferrals();
        metrics.increment_conclusions();
        metrics.increment_stale_discards();
        metrics.increment_dispatches();
        metrics.increment_rechecks();
        metrics.increment_reconciles();
        metrics.increment_reconcile_errors();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.admissions, 2);
        assert_eq!(snapshot.activations, 1);
        assert_eq!(snapshot.deferrals, 1);
        assert_eq!(snapshot.conclusions, 1);
        assert_eq!(snapshot.stale_discards, 1);
        assert_eq!(snapshot.dispatches, 1);
        assert_eq!(snapshot.rechecks, 1);
        assert_eq!(snapshot.reconciles, 1);
        assert_eq!(snapshot.reconcile_errors, 1);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = SchedulerMetrics::new();
        metrics.increment_dispatches();

        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["dispatches"], 1);
        assert_eq!(json["admissions"], 0);
    }

    #[test]
    fn test_thread_safety() {
        use std::sync::Arc;
        use std::thread;

        let metrics = Arc::new(SchedulerMetrics::new());
        let mut handles = vec![];

        for _ in 0..10 {
            let m = Arc::clone(&metrics);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    m.increment_reconciles();
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.snapshot().reconciles, 1000);
    }
}
