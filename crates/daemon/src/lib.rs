//! EEG engagement bridge.
//!
//! Pulls raw EEG from a device, turns each one-second window into a
//! normalized engagement score, and multicasts the result to WebSocket
//! subscribers.

pub mod acquisition;
pub mod calibration;
pub mod config;
pub mod connection_manager;
pub mod error;
pub mod outbound;
pub mod scorer;
pub mod server;
pub mod window;

pub use acquisition::{AcquisitionLoop, BridgeCommand, BridgeHandle, EngagementEngine, LoopState};
pub use calibration::CalibrationState;
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use scorer::{EngagementSample, EngagementScorer};
