//! Shared types for the EEG engagement bridge
//!
//! This crate contains the value types passed between the device driver, the
//! band-power estimator and the daemon, plus the JSON wire messages exchanged
//! with WebSocket clients.

pub mod comms;
pub mod data;
pub mod mode;

// Re-export commonly used types
pub use comms::*;
pub use data::*;
pub use mode::*;
