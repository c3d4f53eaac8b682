//! Engagement ratio `beta / (alpha + theta)` and its normalization.

use eeg_types::BandPowers;
use thiserror::Error;

use crate::calibration::CalibrationState;

/// Floor applied to `alpha + theta` so a silent window never divides by zero.
pub const DENOMINATOR_EPSILON: f64 = 1e-12;

/// Result of scoring one window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngagementSample {
    /// Raw ratio
    pub e: f64,
    /// Ratio rescaled to the calibration range, in [0, 1]
    pub e_norm: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum ScoreError {
    #[error("band powers are not finite: {0:?}")]
    NonFiniteInput(BandPowers),
    #[error("engagement ratio is not finite: {0}")]
    NonFiniteRatio(f64),
}

#[derive(Debug, Clone, Copy)]
pub struct EngagementScorer {
    epsilon: f64,
}

impl Default for EngagementScorer {
    fn default() -> Self {
        Self {
            epsilon: DENOMINATOR_EPSILON,
        }
    }
}

impl EngagementScorer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The raw engagement ratio with the denominator floored at epsilon.
    pub fn ratio(&self, powers: &BandPowers) -> f64 {
        let denom = (powers.alpha + powers.theta).max(self.epsilon);
        powers.beta / denom
    }

    /// Computes E, folds it into the calibration bounds and normalizes it.
    ///
    /// Non-finite inputs leave the calibration untouched.
    pub fn score(
        &self,
        powers: &BandPowers,
        calibration: &mut CalibrationState,
    ) -> Result<EngagementSample, ScoreError> {
        if !powers.is_finite() {
            return Err(ScoreError::NonFiniteInput(*powers));
        }
        let e = self.ratio(powers);
        if !e.is_finite() {
            return Err(ScoreError::NonFiniteRatio(e));
        }
        calibration.update(e);
        Ok(EngagementSample {
            e,
            e_norm: calibration.normalize(e),
        })
    }
}
