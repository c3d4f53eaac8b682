pub mod types;
pub mod session;
pub mod cyton;
pub mod mock_eeg;

// Re-export the main types that users need
pub use cyton::default_cyton_commands;
pub use mock_eeg::MockDriver;
pub use session::DeviceSession;
pub use types::{DeviceConfig, DriverError, DriverStatus, EegDevice, SessionInfo};
