use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Calibration mode tag for the current session.
///
/// The mode only labels which behavioural condition is being sampled; it never
/// changes how the calibration bounds are tracked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Normal,
    Relax,
    Mental,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Normal, Mode::Relax, Mode::Mental];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Normal => "normal",
            Mode::Relax => "relax",
            Mode::Mental => "mental",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mode '{0}', expected one of normal|relax|mental")]
pub struct UnknownMode(pub String);

impl FromStr for Mode {
    type Err = UnknownMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == s)
            .ok_or_else(|| UnknownMode(s.to_string()))
    }
}
