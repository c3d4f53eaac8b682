use std::time::{Duration, Instant};

use log::{debug, info, warn};

use eeg_types::RawSamples;

use super::mock_data_generator::EegGenerator;
use crate::types::{DeviceConfig, DriverError, DriverStatus, EegDevice, SessionInfo};

/// Maximum channel count the mock board exposes
const MAX_CHANNELS: usize = 32;

/// A synthetic board that does not access any hardware.
///
/// Samples accumulate with wall-clock time at the configured rate, so each
/// pull returns everything "recorded" since the previous one, like a real
/// board's ring buffer.
pub struct MockDriver {
    status: DriverStatus,
    session: Option<MockSession>,
    applied_commands: Vec<String>,
}

struct MockSession {
    info: SessionInfo,
    generator: EegGenerator,
    started_at: Instant,
    frames_delivered: u64,
}

impl MockSession {
    /// Frames that should exist after `elapsed` but have not been pulled yet.
    fn frames_due(&self, elapsed: Duration) -> usize {
        let total = (elapsed.as_secs_f64() * self.info.sample_rate as f64) as u64;
        total.saturating_sub(self.frames_delivered) as usize
    }
}

impl MockDriver {
    pub fn new() -> Self {
        Self {
            status: DriverStatus::NotInitialized,
            session: None,
            applied_commands: Vec::new(),
        }
    }

    /// Board commands received by the last `prepare_session`, in order.
    pub fn applied_commands(&self) -> &[String] {
        &self.applied_commands
    }

    fn validate(config: &DeviceConfig) -> Result<(), DriverError> {
        if config.channel_count == 0 {
            return Err(DriverError::ConfigurationError(
                "At least one channel must be configured".to_string(),
            ));
        }
        if config.channel_count > MAX_CHANNELS {
            return Err(DriverError::ConfigurationError(format!(
                "Invalid channel count: {}. MockDriver supports 1-{} channels",
                config.channel_count, MAX_CHANNELS
            )));
        }
        if config.sample_rate == 0 {
            return Err(DriverError::ConfigurationError(
                "Sample rate must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl EegDevice for MockDriver {
    fn prepare_session(&mut self, config: &DeviceConfig) -> Result<SessionInfo, DriverError> {
        Self::validate(config)?;

        self.applied_commands.clear();
        for cmd in &config.board_commands {
            debug!("MockDriver: applying board command {}", cmd);
            self.applied_commands.push(cmd.clone());
        }

        let info = SessionInfo {
            sample_rate: config.sample_rate,
            channel_count: config.channel_count,
        };
        self.session = Some(MockSession {
            info,
            generator: EegGenerator::new(config.sample_rate, config.channel_count, config.seed),
            started_at: Instant::now(),
            frames_delivered: 0,
        });
        self.status = DriverStatus::Running;

        info!(
            "MockDriver streaming on '{}' ({} Hz, {} channels, {} board commands)",
            config.serial_port,
            config.sample_rate,
            config.channel_count,
            self.applied_commands.len()
        );
        Ok(info)
    }

    fn pull_latest_samples(&mut self) -> Result<Option<RawSamples>, DriverError> {
        let session = self.session.as_mut().ok_or(DriverError::NotInitialized)?;

        let due = session.frames_due(session.started_at.elapsed());
        if due == 0 {
            return Ok(None);
        }

        let mut samples = Vec::new();
        session.generator.generate_into(due, &mut samples);
        session.frames_delivered += due as u64;
        Ok(Some(RawSamples::new(session.info.channel_count, samples)))
    }

    fn teardown(&mut self) -> Result<(), DriverError> {
        if self.session.take().is_some() {
            info!("MockDriver session released");
        }
        self.status = DriverStatus::Stopped;
        Ok(())
    }

    fn status(&self) -> DriverStatus {
        self.status.clone()
    }
}

impl Drop for MockDriver {
    fn drop(&mut self) {
        if self.session.is_some() {
            warn!("MockDriver dropped without calling teardown() first.");
            let _ = self.teardown();
        }
    }
}
