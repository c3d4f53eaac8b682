//! Error types for the engagement bridge

use brain_waves_fft::SpectrumError;
use eeg_sensor::DriverError;
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The device failed; the acquisition loop has stopped for good.
    #[error("Fatal device error: {0}")]
    Device(#[from] DriverError),

    #[error("Spectrum error: {0}")]
    Spectrum(#[from] SpectrumError),
}

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;
