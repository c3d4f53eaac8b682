//! The acquisition loop.
//!
//! A single task owns the device session, the sliding window, the calibration
//! state and the session registry. It pulls samples on one cadence, scores the
//! window on another, and applies connection commands in between. Nothing it
//! owns is shared, so nothing is locked.

use brain_waves_fft::BandPowerEstimator;
use chrono::Utc;
use eeg_sensor::{DeviceSession, DriverError, EegDevice, SessionInfo};
use eeg_types::{ClientMessage, EngagementPacket, RawSamples, ServerMessage};
use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::calibration::CalibrationState;
use crate::config::BridgeConfig;
use crate::connection_manager::{Audience, RemovalReason, SessionRegistry, SubscriberId};
use crate::error::{BridgeError, BridgeResult};
use crate::outbound::OutboundSender;
use crate::scorer::EngagementScorer;
use crate::window::SlidingWindow;

/// Requests from connection tasks to the acquisition loop.
pub enum BridgeCommand {
    Connect {
        id: SubscriberId,
        outbound: OutboundSender,
    },
    Disconnect {
        id: SubscriberId,
    },
    Control {
        id: SubscriberId,
        message: ClientMessage,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    /// Terminal. The loop never restarts.
    Stopped,
}

/// Window, estimator, scorer and calibration for one device session.
pub struct EngagementEngine {
    sample_rate: u32,
    window: SlidingWindow,
    estimator: BandPowerEstimator,
    scorer: EngagementScorer,
    calibration: CalibrationState,
    fresh_frames: usize,
}

impl EngagementEngine {
    pub fn new(info: SessionInfo, config: &BridgeConfig) -> BridgeResult<Self> {
        let window_len = config.window_len(info.sample_rate);
        let estimator = BandPowerEstimator::new(info.sample_rate, window_len)?;
        Ok(Self {
            sample_rate: info.sample_rate,
            window: SlidingWindow::new(info.sample_rate, info.channel_count, window_len),
            estimator,
            scorer: EngagementScorer::new(),
            calibration: CalibrationState::default(),
            fresh_frames: 0,
        })
    }

    pub fn calibration(&self) -> &CalibrationState {
        &self.calibration
    }

    pub fn calibration_mut(&mut self) -> &mut CalibrationState {
        &mut self.calibration
    }

    /// Appends a pulled batch to the window. A batch with the wrong channel
    /// layout is a protocol violation.
    pub fn ingest(&mut self, batch: &RawSamples) -> Result<usize, DriverError> {
        let expected = self.window.channel_count();
        let appended = self.window.push(batch).map_err(|got| {
            DriverError::ProtocolError(format!(
                "device sent {} channels, session was prepared with {}",
                got, expected
            ))
        })?;
        self.fresh_frames += appended;
        Ok(appended)
    }

    /// Scores the current window. Returns `None` when the tick should be
    /// skipped: window still filling, no new samples since the last packet,
    /// or a non-finite estimate.
    pub fn tick(&mut self, ts_ms: i64) -> Option<EngagementPacket> {
        if self.fresh_frames == 0 {
            trace!("No new samples since last tick");
            return None;
        }
        let window = match self.window.snapshot() {
            Some(window) => window,
            None => {
                trace!(
                    have = self.window.len(),
                    need = self.window.capacity(),
                    "Window not ready"
                );
                return None;
            }
        };

        let powers = match self.estimator.estimate(&window) {
            Ok(powers) => powers,
            Err(e) if e.is_not_ready() => return None,
            Err(e) => {
                warn!("Band-power estimate failed: {}", e);
                return None;
            }
        };
        let sample = match self.scorer.score(&powers, &mut self.calibration) {
            Ok(sample) => sample,
            Err(e) => {
                warn!("Skipping tick: {}", e);
                return None;
            }
        };
        self.fresh_frames = 0;

        Some(EngagementPacket {
            ts: ts_ms,
            fs: self.sample_rate,
            e: sample.e,
            e_norm: sample.e_norm,
            alpha: powers.alpha,
            theta: powers.theta,
            beta: powers.beta,
            e_min: self.calibration.e_min(),
            e_max: self.calibration.e_max(),
            mode: self.calibration.mode(),
        })
    }
}

/// Everything the running loop owns besides the device.
struct Coordinator {
    engine: EngagementEngine,
    registry: SessionRegistry,
}

impl Coordinator {
    fn handle_command(&mut self, command: BridgeCommand) {
        match command {
            BridgeCommand::Connect { id, outbound } => {
                self.registry
                    .register(id, outbound, self.engine.calibration().mode());
            }
            BridgeCommand::Disconnect { id } => {
                self.registry.unregister(&id, RemovalReason::Disconnected);
            }
            BridgeCommand::Control { id, message } => self.handle_control(id, message),
        }
    }

    fn handle_control(&mut self, id: SubscriberId, message: ClientMessage) {
        if self.registry.get(&id).is_none() {
            debug!(subscriber_id = %id, ?message, "Control message from unknown client ignored");
            return;
        }
        match message {
            ClientMessage::Subscribe => {
                self.registry.subscribe(&id);
            }
            ClientMessage::SetMode { mode } => {
                self.registry.note_requested_mode(&id, mode);
                self.engine.calibration_mut().set_mode(mode);
                info!(subscriber_id = %id, %mode, "Calibration mode changed");
                self.notify_calibration();
            }
            ClientMessage::ResetNorm => {
                self.engine.calibration_mut().reset();
                info!(subscriber_id = %id, "Calibration bounds reset");
                self.notify_calibration();
            }
        }
    }

    fn notify_calibration(&mut self) {
        let notice = self.engine.calibration().notice();
        self.registry.broadcast(&notice, Audience::Everyone);
    }

    fn emit(&mut self) {
        if let Some(packet) = self.engine.tick(Utc::now().timestamp_millis()) {
            debug!(
                e = packet.e,
                e_norm = packet.e_norm,
                mode = %packet.mode,
                subscribers = self.registry.subscribed_count(),
                "Engagement packet"
            );
            self.registry
                .broadcast(&ServerMessage::Engagement(packet), Audience::Subscribed);
        }
    }
}

/// Handles held by the server and the process entry point.
#[derive(Clone)]
pub struct BridgeHandle {
    pub commands: flume::Sender<BridgeCommand>,
    pub state: watch::Receiver<LoopState>,
}

pub struct AcquisitionLoop<D: EegDevice> {
    config: BridgeConfig,
    device: D,
    commands: flume::Receiver<BridgeCommand>,
    state: watch::Sender<LoopState>,
}

impl<D: EegDevice> AcquisitionLoop<D> {
    pub fn new(config: BridgeConfig, device: D) -> (Self, BridgeHandle) {
        let (command_tx, command_rx) = flume::bounded(config.command_channel_capacity.max(1));
        let (state_tx, state_rx) = watch::channel(LoopState::Idle);
        (
            Self {
                config,
                device,
                commands: command_rx,
                state: state_tx,
            },
            BridgeHandle {
                commands: command_tx,
                state: state_rx,
            },
        )
    }

    /// Runs until `shutdown` is cancelled or the device fails.
    ///
    /// On every exit path all subscriber streams are closed and the device is
    /// torn down before this returns. A device failure is returned as
    /// [`BridgeError::Device`].
    pub async fn run(self, shutdown: CancellationToken) -> BridgeResult<()> {
        let AcquisitionLoop {
            config,
            device,
            commands,
            state,
        } = self;

        // Zero-length intervals would panic inside tokio.
        if let Err(e) = config.validate_acquisition() {
            error!("Refusing to start acquisition: {}", e);
            state.send_replace(LoopState::Stopped);
            return Err(e.into());
        }

        let mut session = match DeviceSession::open(device, &config.device) {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to prepare device session: {}", e);
                state.send_replace(LoopState::Stopped);
                return Err(e.into());
            }
        };

        let engine = match EngagementEngine::new(session.info(), &config) {
            Ok(engine) => engine,
            Err(e) => {
                if let Err(teardown_err) = session.close() {
                    warn!("Device teardown failed: {}", teardown_err);
                }
                state.send_replace(LoopState::Stopped);
                return Err(e);
            }
        };
        let mut coordinator = Coordinator {
            engine,
            registry: SessionRegistry::new(config.max_consecutive_overflows),
        };

        let mut pull = time::interval(config.pull_interval());
        pull.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut output = time::interval_at(
            Instant::now() + config.output_interval(),
            config.output_interval(),
        );
        output.set_missed_tick_behavior(MissedTickBehavior::Skip);

        state.send_replace(LoopState::Running);
        info!(
            sample_rate = session.info().sample_rate,
            channels = session.info().channel_count,
            window = config.window_len(session.info().sample_rate),
            "Acquisition loop running"
        );

        let mut commands_open = true;
        let outcome: Result<(), DriverError> = loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("Acquisition loop received shutdown signal");
                    break Ok(());
                }
                _ = pull.tick() => match session.pull() {
                    Ok(Some(batch)) => {
                        if let Err(e) = coordinator.engine.ingest(&batch) {
                            break Err(e);
                        }
                    }
                    Ok(None) => trace!("Pull returned no samples"),
                    Err(e) => break Err(e),
                },
                _ = output.tick() => coordinator.emit(),
                command = commands.recv_async(), if commands_open => match command {
                    Ok(command) => coordinator.handle_command(command),
                    Err(_) => {
                        debug!("All command senders dropped");
                        commands_open = false;
                    }
                },
            }
        };

        coordinator.registry.close_all();
        let teardown = session.close();
        state.send_replace(LoopState::Stopped);

        match (outcome, teardown) {
            (Err(e), teardown) => {
                error!("Fatal device error, acquisition stopped: {}", e);
                if let Err(teardown_err) = teardown {
                    warn!("Device teardown after failure also failed: {}", teardown_err);
                }
                Err(BridgeError::Device(e))
            }
            (Ok(()), Err(teardown_err)) => Err(BridgeError::Device(teardown_err)),
            (Ok(()), Ok(())) => {
                info!("Acquisition loop stopped");
                Ok(())
            }
        }
    }
}
