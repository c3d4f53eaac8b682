//! Common types and traits for sensor drivers

use serde::{Deserialize, Serialize};
use thiserror::Error;

use eeg_types::RawSamples;

/// Configuration passed to a device when a session is prepared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Serial port of the board, e.g. `/dev/ttyUSB0`
    pub serial_port: String,
    /// Board configuration commands, sent in order after the session is prepared
    pub board_commands: Vec<String>,
    /// Sample rate in Hz. Boards with a fixed rate report their own in `SessionInfo`.
    pub sample_rate: u32,
    /// Number of EEG channels to stream
    pub channel_count: usize,
    /// Seed for synthetic data sources
    pub seed: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            serial_port: "/dev/cu.usbserial-DP05I34K".to_string(),
            board_commands: Vec::new(),
            sample_rate: 125,
            channel_count: 16,
            seed: 0x5EED,
        }
    }
}

/// What the device reports once a session is prepared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionInfo {
    /// Effective sample rate in Hz
    pub sample_rate: u32,
    /// Number of EEG channels in every pulled frame
    pub channel_count: usize,
}

/// Status of a sensor driver
#[derive(Debug, Clone, PartialEq)]
pub enum DriverStatus {
    /// No session has been prepared
    NotInitialized,
    /// Session prepared and streaming
    Running,
    /// Session torn down
    Stopped,
    /// Driver encountered an error
    Error(String),
}

/// Errors that can occur in sensor drivers.
///
/// Every variant is fatal to the acquisition loop. A pull with nothing new is
/// reported as `Ok(None)`, not as an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DriverError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    /// Driver used before `prepare_session`
    #[error("Driver not initialized")]
    NotInitialized,
    /// Hardware not found
    #[error("Hardware not found: {0}")]
    HardwareNotFound(String),
    /// The board went away mid-session
    #[error("Device disconnected: {0}")]
    Disconnected(String),
    /// The board sent something the driver cannot interpret
    #[error("Protocol error: {0}")]
    ProtocolError(String),
    /// I/O error
    #[error("I/O error: {0}")]
    IoError(String),
    /// Generic error
    #[error("Error: {0}")]
    Other(String),
}

impl From<std::io::Error> for DriverError {
    fn from(err: std::io::Error) -> Self {
        DriverError::IoError(err.to_string())
    }
}

/// Trait that all EEG acquisition devices must implement.
pub trait EegDevice: Send + 'static {
    /// Open the board, apply `config.board_commands` in order and start streaming.
    fn prepare_session(&mut self, config: &DeviceConfig) -> Result<SessionInfo, DriverError>;

    /// Pop every sample buffered since the previous pull.
    ///
    /// Must not block. Returns `Ok(None)` when nothing new has arrived.
    fn pull_latest_samples(&mut self) -> Result<Option<RawSamples>, DriverError>;

    /// Stop streaming and release the board.
    fn teardown(&mut self) -> Result<(), DriverError>;

    /// Get current driver status
    fn status(&self) -> DriverStatus;
}

impl<D: EegDevice + ?Sized> EegDevice for Box<D> {
    fn prepare_session(&mut self, config: &DeviceConfig) -> Result<SessionInfo, DriverError> {
        (**self).prepare_session(config)
    }

    fn pull_latest_samples(&mut self) -> Result<Option<RawSamples>, DriverError> {
        (**self).pull_latest_samples()
    }

    fn teardown(&mut self) -> Result<(), DriverError> {
        (**self).teardown()
    }

    fn status(&self) -> DriverStatus {
        (**self).status()
    }
}
