//! Per-session calibration bounds for the engagement ratio.

use eeg_types::{Mode, ServerMessage};

/// Normalized value reported while the observed range is still a single point.
pub const NEUTRAL_ENORM: f64 = 0.5;

/// Running minimum/maximum of the raw engagement ratio, tagged with the
/// current calibration mode.
///
/// Owned by the acquisition loop; connections change it only through commands.
/// Bounds are shared across mode switches so that a relax pass followed by a
/// mental pass widens one combined range.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CalibrationState {
    mode: Mode,
    e_min: Option<f64>,
    e_max: Option<f64>,
}

impl CalibrationState {
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            e_min: None,
            e_max: None,
        }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn e_min(&self) -> Option<f64> {
        self.e_min
    }

    pub fn e_max(&self) -> Option<f64> {
        self.e_max
    }

    /// Widens the bounds to include `e`. Returns true if either bound moved.
    ///
    /// The first value after a reset sets both bounds.
    pub fn update(&mut self, e: f64) -> bool {
        let mut changed = false;
        if self.e_min.map_or(true, |min| e < min) {
            self.e_min = Some(e);
            changed = true;
        }
        if self.e_max.map_or(true, |max| e > max) {
            self.e_max = Some(e);
            changed = true;
        }
        changed
    }

    /// Clears both bounds. The mode is kept.
    pub fn reset(&mut self) {
        self.e_min = None;
        self.e_max = None;
    }

    /// Relabels the session. Bounds are left untouched.
    pub fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }

    /// Rescales `e` to the observed range, clamped to [0, 1].
    ///
    /// Returns the neutral midpoint when the range is empty or degenerate.
    pub fn normalize(&self, e: f64) -> f64 {
        match (self.e_min, self.e_max) {
            (Some(min), Some(max)) if max > min => ((e - min) / (max - min)).clamp(0.0, 1.0),
            _ => NEUTRAL_ENORM,
        }
    }

    /// The calibration notice every connection receives after a mode change
    /// or reset.
    pub fn notice(&self) -> ServerMessage {
        ServerMessage::Calibration {
            mode: self.mode,
            e_min: self.e_min,
            e_max: self.e_max,
        }
    }
}
