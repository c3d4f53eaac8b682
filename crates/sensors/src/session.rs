//! Scoped ownership of a prepared device.

use log::{info, warn};

use eeg_types::RawSamples;

use crate::types::{DeviceConfig, DriverError, EegDevice, SessionInfo};

/// A device with an open session.
///
/// The session is torn down exactly once: by [`DeviceSession::close`], which
/// reports the teardown result, or on drop, which logs it.
pub struct DeviceSession<D: EegDevice> {
    device: Option<D>,
    info: SessionInfo,
}

impl<D: EegDevice> DeviceSession<D> {
    /// Prepares `device` with `config`. If preparation fails the device is
    /// still torn down before the error is returned.
    pub fn open(mut device: D, config: &DeviceConfig) -> Result<Self, DriverError> {
        match device.prepare_session(config) {
            Ok(info) => {
                info!(
                    "Device session prepared: {} Hz, {} channels",
                    info.sample_rate, info.channel_count
                );
                Ok(Self {
                    device: Some(device),
                    info,
                })
            }
            Err(e) => {
                if let Err(teardown_err) = device.teardown() {
                    warn!("Teardown after failed prepare also failed: {}", teardown_err);
                }
                Err(e)
            }
        }
    }

    pub fn info(&self) -> SessionInfo {
        self.info
    }

    /// Pops the newest samples. See [`EegDevice::pull_latest_samples`].
    pub fn pull(&mut self) -> Result<Option<RawSamples>, DriverError> {
        match self.device.as_mut() {
            Some(device) => device.pull_latest_samples(),
            None => Err(DriverError::NotInitialized),
        }
    }

    /// Tears the session down and returns the device's verdict.
    pub fn close(mut self) -> Result<(), DriverError> {
        match self.device.take() {
            Some(mut device) => {
                info!("Closing device session");
                device.teardown()
            }
            None => Ok(()),
        }
    }
}

impl<D: EegDevice> Drop for DeviceSession<D> {
    fn drop(&mut self) {
        if let Some(mut device) = self.device.take() {
            warn!("DeviceSession dropped without close(); tearing down");
            if let Err(e) = device.teardown() {
                warn!("Device teardown failed: {}", e);
            }
        }
    }
}
