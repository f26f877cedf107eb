//! Observability subsystem for promoctl
//!
//! Provides:
//! - Structured logging through `tracing`
//! - Named scheduling events
//! - Scheduler counters
//!
//! Observability is read-only: nothing here feeds back into scheduling,
//! and a logging failure never stops the controller.
//!
//! # Usage
//!
//! ```ignore
//! use promoctl::observability::{log_promotion_event, Event, SchedulerMetrics};
//!
//! log_promotion_event(Event::PromotionQueued, &promotion, &stage);
//!
//! let metrics = SchedulerMetrics::new();
//! metrics.increment_admissions();
//! ```

mod events;
mod logging;
mod metrics;

pub use events::Event;
pub use logging::init_logging;
pub use metrics::{MetricsSnapshot, SchedulerMetrics};

use std::fmt;

use crate::api::{PromotionRef, StageKey};

/// Observability error
#[derive(Debug)]
pub struct ObservabilityError {
    message: String,
}

impl ObservabilityError {
    /// Create a new observability error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Get the message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for ObservabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "observability error: {}", self.message)
    }
}

impl std::error::Error for ObservabilityError {}

/// Result type for observability operations
pub type ObservabilityResult<T> = Result<T, ObservabilityError>;

/// Log a controller lifecycle event
pub fn log_event(event: Event) {
    if event.is_warning() {
        tracing::warn!(event = event.as_str());
    } else {
        tracing::info!(event = event.as_str());
    }
}

/// Log a scheduling event for one Promotion
pub fn log_promotion_event(event: Event, promotion: &PromotionRef, stage: &StageKey) {
    if event.is_warning() {
        tracing::warn!(
            event = event.as_str(),
            namespace = %promotion.namespace,
            promotion = %promotion.name,
            stage = %stage.name,
        );
    } else {
        tracing::debug!(
            event = event.as_str(),
            namespace = %promotion.namespace,
            promotion = %promotion.name,
            stage = %stage.name,
        );
    }
}
