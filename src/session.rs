//! Device Session State Machine
//!
//! One acquisition cycle walks the device through
//!
//! ```text
//! Searching → Opening → Configuring → Streaming → Draining → Closed
//! ```
//!
//! and the outer loop in [`DeviceSession::run`] repeats cycles in daemon mode.
//! The session owns the open device handle for the whole cycle and closes it
//! exactly once on every exit path, including configuration failures and
//! stream errors.
//!
//! # Failure Handling
//!
//! - Discovery, open and configuration failures end the cycle. Daemon mode
//!   waits `retry_delay` and tries again, otherwise the error is returned.
//! - A failed record read ends streaming. The device is drained and closed
//!   before the error is returned or the cycle retried.
//! - Drain and reset failures are logged and otherwise ignored.
//!
//! The current phase is published on a `watch` channel so tests and the
//! binary can follow the session from another task.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{ConfigStage, DeviceError, RelayError, RelayResult};
use crate::fanout::FanOut;
use crate::hardware::{
    DataFields, DeviceType, ReadOutcome, SampleRate, TrackerBackend, TrackerDevice, Units,
};
use crate::run_state::RunState;

/// Reads issued while leaving the streaming phase to drop in-flight records.
const DRAIN_READS: usize = 3;

/// Where the session currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Searching,
    Opening,
    Configuring,
    Streaming,
    Draining,
    /// No device handle is open
    Closed,
}

/// How records are requested from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionMode {
    /// The device streams on its own
    Continuous,
    /// One burst per pass, spaced by `period` (zero = back to back)
    Poll { period: Duration },
}

impl AcquisitionMode {
    pub fn is_poll(&self) -> bool {
        matches!(self, AcquisitionMode::Poll { .. })
    }
}

/// Settings for the acquisition loop.
#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    pub device_name: String,
    pub daemon: bool,
    pub reset: bool,
    pub mode: AcquisitionMode,
    pub fields: DataFields,
    pub rate: SampleRate,
    pub retry_delay: Duration,
    pub drain_timeout: Duration,
    pub max_drain_reads: usize,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            device_name: "/dev/ttyUSB0".to_string(),
            daemon: false,
            reset: false,
            mode: AcquisitionMode::Continuous,
            fields: DataFields::POSITION,
            rate: SampleRate::Hz240,
            retry_delay: Duration::from_secs(1),
            drain_timeout: Duration::from_millis(500),
            max_drain_reads: 64,
        }
    }
}

/// What configuration established for the current cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSession {
    pub stations: usize,
    pub fields: DataFields,
    pub device_type: DeviceType,
}

/// How a cycle ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Device found but not opened: stopped, or no sink to feed
    Idle,
    /// Streaming ended because of stop or shutdown
    Completed,
}

fn config_failed(stage: ConfigStage) -> impl FnOnce(DeviceError) -> RelayError {
    move |source| RelayError::ConfigurationFailed { stage, source }
}

/// The acquisition state machine.
pub struct DeviceSession {
    backend: Arc<dyn TrackerBackend>,
    settings: AcquisitionSettings,
    state: Arc<RunState>,
    fanout: FanOut,
    phase: watch::Sender<SessionPhase>,
}

impl DeviceSession {
    pub fn new(
        backend: Arc<dyn TrackerBackend>,
        settings: AcquisitionSettings,
        state: Arc<RunState>,
        fanout: FanOut,
    ) -> Self {
        let (phase, _) = watch::channel(SessionPhase::Closed);
        Self {
            backend,
            settings,
            state,
            fanout,
            phase,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Follow phase changes from another task.
    pub fn subscribe(&self) -> watch::Receiver<SessionPhase> {
        self.phase.subscribe()
    }

    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    /// Request shutdown. The running cycle closes the device and `run` returns.
    pub fn shutdown(&self) {
        self.state.request_shutdown();
    }

    fn enter(&self, phase: SessionPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            debug!(?previous, ?phase, "Session phase");
        }
    }

    /// Sleep for `period` unless shutdown comes first. Returns false on shutdown.
    async fn pause(&self, period: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(period) => true,
            _ = self.state.shutdown_requested() => false,
        }
    }

    /// Run cycles until shutdown, or once outside daemon mode.
    pub async fn run(&mut self) -> RelayResult<()> {
        let mut first = true;
        let result = loop {
            if !first && !self.pause(self.settings.retry_delay).await {
                break Ok(());
            }
            first = false;
            if self.state.is_shutdown() {
                break Ok(());
            }

            match self.run_cycle().await {
                Ok(outcome) if !self.settings.daemon => {
                    debug!(?outcome, "Acquisition finished");
                    break Ok(());
                }
                Err(e) if !self.settings.daemon => break Err(e),
                Ok(_) => {}
                Err(e) => {
                    warn!(stage = e.stage().unwrap_or("unknown"), "{}; retrying", e);
                }
            }
        };

        self.fanout.shutdown().await;
        result
    }

    /// One pass through the state machine.
    pub async fn run_cycle(&mut self) -> RelayResult<CycleOutcome> {
        let name = self.settings.device_name.clone();

        self.enter(SessionPhase::Searching);
        if let Err(source) = self.backend.find_device(&name).await {
            self.state.set_device_found(false);
            self.enter(SessionPhase::Closed);
            return Err(RelayError::DeviceNotFound {
                device: name,
                source,
            });
        }
        self.state.set_device_found(true);

        if self.settings.daemon && !(self.state.is_running() && self.fanout.has_active_sink()) {
            self.enter(SessionPhase::Closed);
            return Ok(CycleOutcome::Idle);
        }

        self.enter(SessionPhase::Opening);
        let mut device = match self.backend.open(&name).await {
            Ok(device) => device,
            Err(source) => {
                self.enter(SessionPhase::Closed);
                return Err(RelayError::DeviceOpenFailed {
                    device: name,
                    source,
                });
            }
        };
        self.state.set_device_open(true);
        info!(device = %name, "Device opened");

        self.enter(SessionPhase::Configuring);
        let result = match self.configure(device.as_mut()).await {
            Ok(session) => {
                self.enter(SessionPhase::Streaming);
                let streamed = self.stream(device.as_mut(), &session).await;
                self.enter(SessionPhase::Draining);
                self.drain(device.as_mut()).await;
                streamed.map(|_| CycleOutcome::Completed)
            }
            Err(e) => Err(e),
        };

        device.close().await;
        self.state.set_device_open(false);
        self.enter(SessionPhase::Closed);
        info!(device = %name, "Device closed");
        result
    }

    async fn configure(&self, device: &mut dyn TrackerDevice) -> RelayResult<ActiveSession> {
        device
            .request_data()
            .await
            .map_err(config_failed(ConfigStage::DataRequest))?;

        let mut discarded = 0;
        while discarded < self.settings.max_drain_reads
            && device.read_until_timeout(self.settings.drain_timeout).await == ReadOutcome::Consumed
        {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(reads = discarded, "Discarded pending device output");
        }

        if self.settings.reset {
            info!("Resetting device");
            if let Err(e) = device.reset().await {
                warn!("Device reset failed: {}", e);
            }
        }

        device.text_mode().await.map_err(config_failed(ConfigStage::TextMode))?;

        let device_type = device.version().await.map_err(config_failed(ConfigStage::Version))?;
        if device_type == DeviceType::Unknown {
            warn!("Device type unknown");
        }

        device.read_bits().await.map_err(config_failed(ConfigStage::ReadBits))?;

        let stations = device.stations().await.map_err(config_failed(ConfigStage::Stations))?;
        if stations == 0 {
            return Err(RelayError::ConfigurationFailed {
                stage: ConfigStage::Stations,
                source: DeviceError::Protocol("no active stations".into()),
            });
        }

        device
            .set_hemisphere()
            .await
            .map_err(config_failed(ConfigStage::Hemisphere))?;
        device
            .set_units(Units::Metric)
            .await
            .map_err(config_failed(ConfigStage::Units))?;
        device
            .set_rate(self.settings.rate)
            .await
            .map_err(config_failed(ConfigStage::Rate))?;
        device
            .set_data_fields(self.settings.fields)
            .await
            .map_err(config_failed(ConfigStage::DataFields))?;
        device
            .binary_mode()
            .await
            .map_err(config_failed(ConfigStage::BinaryMode))?;

        if !self.settings.mode.is_poll() {
            device
                .request_continuous()
                .await
                .map_err(config_failed(ConfigStage::RequestContinuous))?;
        }

        info!(
            %device_type,
            stations,
            rate_hz = self.settings.rate.hz(),
            "Device configured"
        );
        Ok(ActiveSession {
            stations,
            fields: self.settings.fields,
            device_type,
        })
    }

    async fn stream(
        &mut self,
        device: &mut dyn TrackerDevice,
        session: &ActiveSession,
    ) -> RelayResult<()> {
        let poll = self.settings.mode.is_poll();

        while self.state.is_running() && !self.state.is_shutdown() {
            if let Err(e) = self.fanout.run_pass(device, session.stations, poll).await {
                error!("Data stream error: {}", e);
                return Err(RelayError::Read(e));
            }

            match self.settings.mode {
                AcquisitionMode::Poll { period } if !period.is_zero() => {
                    if !self.pause(period).await {
                        break;
                    }
                }
                _ => tokio::task::yield_now().await,
            }
        }
        Ok(())
    }

    async fn drain(&self, device: &mut dyn TrackerDevice) {
        if let Err(e) = device.request_data().await {
            warn!("Failed to stop continuous output: {}", e);
        }
        for _ in 0..DRAIN_READS {
            device.read_until_timeout(self.settings.drain_timeout).await;
        }
        if let Err(e) = device.text_mode().await {
            warn!("Failed to return device to text mode: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{MockBackend, MockStep, MockTrackerConfig};

    fn settings() -> AcquisitionSettings {
        AcquisitionSettings {
            device_name: "sim".to_string(),
            retry_delay: Duration::from_millis(5),
            drain_timeout: Duration::from_millis(1),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_configuration_sequence_order() {
        let backend = Arc::new(MockBackend::new(MockTrackerConfig::new("sim")));
        let probe = backend.probe();
        let state = Arc::new(RunState::new(false, None));
        let mut session = DeviceSession::new(
            backend,
            settings(),
            state.clone(),
            FanOut::new(state.clone()),
        );

        // Not running: streaming exits immediately after configuration.
        let outcome = session.run_cycle().await.unwrap();
        assert_eq!(outcome, CycleOutcome::Completed);
        assert_eq!(
            probe.calls(),
            vec![
                "find_device",
                "open",
                "request_data",
                "read_until_timeout",
                "text_mode",
                "version",
                "read_bits",
                "stations",
                "set_hemisphere",
                "set_units",
                "set_rate",
                "set_data_fields",
                "binary_mode",
                "request_continuous",
                "request_data",
                "read_until_timeout",
                "read_until_timeout",
                "read_until_timeout",
                "text_mode",
            ]
        );
        assert_eq!(probe.closes(), 1);
        assert_eq!(session.phase(), SessionPhase::Closed);
        assert!(!state.device_open());
    }

    #[tokio::test]
    async fn test_zero_stations_fails_configuration() {
        let backend = Arc::new(MockBackend::new(
            MockTrackerConfig::new("sim").with_stations(0),
        ));
        let probe = backend.probe();
        let state = Arc::new(RunState::new(true, None));
        let mut session =
            DeviceSession::new(backend, settings(), state.clone(), FanOut::new(state));

        let err = session.run_cycle().await.unwrap_err();
        assert_eq!(err.stage(), Some("get_stations"));
        assert_eq!(probe.closes(), 1);
        assert_eq!(probe.count("set_hemisphere"), 0);
    }

    #[tokio::test]
    async fn test_reset_failure_is_not_fatal() {
        let backend = Arc::new(MockBackend::new(
            MockTrackerConfig::new("sim").failing_at(MockStep::Reset),
        ));
        let probe = backend.probe();
        let state = Arc::new(RunState::new(false, None));
        let mut session = DeviceSession::new(
            backend,
            AcquisitionSettings {
                reset: true,
                ..settings()
            },
            state.clone(),
            FanOut::new(state),
        );

        assert!(session.run_cycle().await.is_ok());
        assert_eq!(probe.count("reset"), 1);
        assert_eq!(probe.count("binary_mode"), 1);
    }

    #[tokio::test]
    async fn test_residual_drain_is_bounded() {
        let backend = Arc::new(MockBackend::new(
            MockTrackerConfig::new("sim").with_residual_reads(1000),
        ));
        let probe = backend.probe();
        let state = Arc::new(RunState::new(false, None));
        let mut session = DeviceSession::new(
            backend,
            AcquisitionSettings {
                max_drain_reads: 10,
                ..settings()
            },
            state.clone(),
            FanOut::new(state),
        );

        session.run_cycle().await.unwrap();
        // Ten bounded reads during configuration, three while draining.
        assert_eq!(probe.count("read_until_timeout"), 13);
    }
}
