//! Promotion mechanics
//!
//! The work a Promotion performs once it holds its Stage: updating Git
//! repositories, Argo CD Applications and so on. The controller only cares
//! about the resulting status and whether a failure is worth retrying.

use super::errors::MechanicsError;
use crate::api::{Promotion, PromotionPhase, PromotionStatus, Stage};

/// Executes a Promotion against its Stage.
///
/// Called from a blocking thread; implementations may perform I/O.
pub trait PromotionMechanics: Send + Sync {
    /// Returns the Promotion's new status. A non-terminal status means the
    /// work is still in progress and the Promotion should be checked again.
    fn promote(&self, stage: &Stage, promotion: &Promotion)
        -> Result<PromotionStatus, MechanicsError>;
}

impl<F> PromotionMechanics for F
where
    F: Fn(&Stage, &Promotion) -> Result<PromotionStatus, MechanicsError> + Send + Sync,
{
    fn promote(
        &self,
        stage: &Stage,
        promotion: &Promotion,
    ) -> Result<PromotionStatus, MechanicsError> {
        self(stage, promotion)
    }
}

/// Mechanics that only check a Promotion can be applied.
///
/// Succeeds when the Stage defines promotion mechanisms and the requested
/// state is one of the Stage's available states. Nothing is written
/// anywhere; used by the `run` command and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecCheckMechanics;

impl PromotionMechanics for SpecCheckMechanics {
    fn promote(
        &self,
        stage: &Stage,
        promotion: &Promotion,
    ) -> Result<PromotionStatus, MechanicsError> {
        let mechanisms = stage.spec.promotion_mechanisms.as_ref();
        if mechanisms.map_or(true, |m| m.is_empty()) {
            return Err(MechanicsError::structural(format!(
                "Stage {} has no promotion mechanisms",
                stage.key()
            )));
        }

        if stage.available_state(&promotion.spec.state).is_none() {
            return Err(MechanicsError::structural(format!(
                "state {:?} is not available to Stage {}",
                promotion.spec.state,
                stage.key()
            )));
        }

        Ok(PromotionStatus::with_phase(PromotionPhase::Succeeded))
    }
}
