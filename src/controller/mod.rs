//! Promotion Controller
//!
//! Schedules Promotions so that each Stage runs at most one at a time, in
//! creation order, and drives each through its phases.
//!
//! Responsibilities:
//! - Admit new Promotions into the per-Stage registry
//! - Release a Stage when its Promotion finishes or is deleted
//! - Dispatch the next valid Promotion for a freed Stage
//! - Reconcile Promotions through `Pending -> Running -> terminal`
//!
//! Non-Responsibilities:
//! - Does not decide which state to promote (that is the Promotion's spec)
//! - Does not perform Git or Argo CD writes itself (see [`PromotionMechanics`])

mod config;
mod dispatch;
mod errors;
mod handlers;
mod mechanics;
mod reconciler;
mod runtime;

pub use config::ControllerConfig;
pub use dispatch::Dispatcher;
pub use errors::{ConfigError, ConfigResult, MechanicsError, ReconcileError, ReconcileResult};
pub use handlers::EventHandlers;
pub use mechanics::{PromotionMechanics, SpecCheckMechanics};
pub use reconciler::{ReconcileOutcome, Reconciler};
pub use runtime::Controller;
