//! JSON messages exchanged with WebSocket clients.
//!
//! Every message is a single JSON object whose `type` field selects the
//! variant. Calibration bounds that have not been observed yet serialize as
//! `null`.

use serde::{Deserialize, Serialize};

use crate::mode::Mode;

/// One engagement estimate, produced once per output tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementPacket {
    /// Wall-clock time of the tick, epoch milliseconds.
    pub ts: i64,
    /// Device sampling rate in Hz.
    pub fs: u32,
    #[serde(rename = "E")]
    pub e: f64,
    #[serde(rename = "Enorm")]
    pub e_norm: f64,
    pub alpha: f64,
    pub theta: f64,
    pub beta: f64,
    #[serde(rename = "Emin")]
    pub e_min: Option<f64>,
    #[serde(rename = "Emax")]
    pub e_max: Option<f64>,
    pub mode: Mode,
}

/// Messages sent from the bridge to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once to a connection right after it joins.
    Hello { mode: Mode },
    /// Sent to every connection when the mode changes or the bounds are reset.
    Calibration {
        mode: Mode,
        #[serde(rename = "Emin")]
        e_min: Option<f64>,
        #[serde(rename = "Emax")]
        e_max: Option<f64>,
    },
    Engagement(EngagementPacket),
}

/// Control messages sent from clients to the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Subscribe,
    SetMode { mode: Mode },
    ResetNorm,
}
