//! Simulated Tracker
//!
//! Provides a simulated motion tracker for running the relay and for testing
//! without physical hardware. All waits use `tokio::time::sleep`, never
//! `std::thread::sleep`.
//!
//! # Available Types
//!
//! - `MockBackend` - discovery/open for one simulated device name
//! - `MockTracker` - the open device handle
//! - `MockProbe` - shared call log so tests can check what the session did
//!
//! # Failure Injection
//!
//! `MockTrackerConfig` can make one configuration step fail, make `open` fail,
//! or make record reads time out after a number of successful reads.
//! `MockBackend::set_present` toggles discovery at runtime.
//!
//! # Performance Characteristics
//!
//! - Continuous mode paces one frame (all stations) per `sample_period`
//! - Poll mode answers immediately
//! - `reset` and `read_until_timeout` return immediately

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{sleep_until, Duration, Instant};

use crate::error::{DeviceError, DeviceResult};
use crate::hardware::capabilities::{TrackerBackend, TrackerDevice};
use crate::hardware::record::{DataFields, DeviceType, ReadOutcome, Record, SampleRate, Units};

/// Entries kept in the ordered call log before it stops growing.
const CALL_LOG_LIMIT: usize = 4096;

/// Device API call that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockStep {
    RequestData,
    RequestContinuous,
    Reset,
    TextMode,
    BinaryMode,
    Version,
    ReadBits,
    Stations,
    Hemisphere,
    Units,
    Rate,
    DataFields,
}

impl MockStep {
    fn call_name(&self) -> &'static str {
        match self {
            MockStep::RequestData => "request_data",
            MockStep::RequestContinuous => "request_continuous",
            MockStep::Reset => "reset",
            MockStep::TextMode => "text_mode",
            MockStep::BinaryMode => "binary_mode",
            MockStep::Version => "version",
            MockStep::ReadBits => "read_bits",
            MockStep::Stations => "stations",
            MockStep::Hemisphere => "set_hemisphere",
            MockStep::Units => "set_units",
            MockStep::Rate => "set_rate",
            MockStep::DataFields => "set_data_fields",
        }
    }
}

/// Simulated device settings.
#[derive(Debug, Clone)]
pub struct MockTrackerConfig {
    /// Name the device answers to in `find_device`/`open`
    pub device_name: String,
    /// Active stations reported after configuration
    pub stations: usize,
    /// Model reported by the version query
    pub device_type: DeviceType,
    /// Reads that return `Consumed` before the first `TimedOut`
    pub residual_reads: usize,
    /// Time per frame in continuous mode (zero = unpaced)
    pub sample_period: Duration,
    /// Configuration call that fails
    pub fail_step: Option<MockStep>,
    /// Make every `open` fail
    pub fail_open: bool,
    /// Successful record reads before every further read times out
    pub fail_reads_after: Option<u64>,
    /// Fail `request_data` and `text_mode` once a record has been read
    pub fail_teardown: bool,
}

impl Default for MockTrackerConfig {
    fn default() -> Self {
        Self {
            device_name: "sim".to_string(),
            stations: 2,
            device_type: DeviceType::Liberty,
            residual_reads: 0,
            sample_period: Duration::ZERO,
            fail_step: None,
            fail_open: false,
            fail_reads_after: None,
            fail_teardown: false,
        }
    }
}

impl MockTrackerConfig {
    /// Settings for a device answering to `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            device_name: name.into(),
            ..Default::default()
        }
    }

    /// Set the station count.
    pub fn with_stations(mut self, stations: usize) -> Self {
        self.stations = stations;
        self
    }

    /// Set the reported model.
    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = device_type;
        self
    }

    /// Leave `reads` chunks of stale bytes for the first drain.
    pub fn with_residual_reads(mut self, reads: usize) -> Self {
        self.residual_reads = reads;
        self
    }

    /// Pace continuous output at `rate`.
    pub fn with_rate(mut self, rate: SampleRate) -> Self {
        self.sample_period = Duration::from_secs_f64(1.0 / f64::from(rate.hz()));
        self
    }

    /// Make `step` fail.
    pub fn failing_at(mut self, step: MockStep) -> Self {
        self.fail_step = Some(step);
        self
    }

    /// Make `open` fail.
    pub fn failing_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// Time out every read after `reads` successful ones.
    pub fn failing_reads_after(mut self, reads: u64) -> Self {
        self.fail_reads_after = Some(reads);
        self
    }

    /// Let configuration succeed but fail the calls that stop the stream.
    pub fn failing_teardown(mut self) -> Self {
        self.fail_teardown = true;
        self
    }
}

#[derive(Debug, Default)]
struct ProbeInner {
    log: Vec<&'static str>,
    counts: HashMap<&'static str, usize>,
    opens: usize,
    closes: usize,
    records_read: u64,
}

/// Shared record of what was done to the simulated devices.
#[derive(Debug, Clone, Default)]
pub struct MockProbe {
    inner: Arc<Mutex<ProbeInner>>,
}

impl MockProbe {
    fn record(&self, call: &'static str) {
        let mut inner = self.inner.lock();
        if inner.log.len() < CALL_LOG_LIMIT {
            inner.log.push(call);
        }
        *inner.counts.entry(call).or_insert(0) += 1;
    }

    /// Ordered Device API calls (record reads excluded).
    pub fn calls(&self) -> Vec<&'static str> {
        self.inner.lock().log.clone()
    }

    /// How often `call` was made.
    pub fn count(&self, call: &str) -> usize {
        self.inner.lock().counts.get(call).copied().unwrap_or(0)
    }

    /// Successful opens.
    pub fn opens(&self) -> usize {
        self.inner.lock().opens
    }

    /// Handle releases.
    pub fn closes(&self) -> usize {
        self.inner.lock().closes
    }

    /// Records handed out.
    pub fn records_read(&self) -> u64 {
        self.inner.lock().records_read
    }
}

/// Discovery and open for one simulated device.
pub struct MockBackend {
    config: MockTrackerConfig,
    present: AtomicBool,
    probe: MockProbe,
}

impl MockBackend {
    /// Create a backend exposing one device built from `config`.
    pub fn new(config: MockTrackerConfig) -> Self {
        Self {
            config,
            present: AtomicBool::new(true),
            probe: MockProbe::default(),
        }
    }

    /// Shared call log.
    pub fn probe(&self) -> MockProbe {
        self.probe.clone()
    }

    /// Plug or unplug the simulated device.
    pub fn set_present(&self, present: bool) {
        self.present.store(present, Ordering::SeqCst);
    }
}

#[async_trait]
impl TrackerBackend for MockBackend {
    async fn find_device(&self, name: &str) -> DeviceResult<()> {
        self.probe.record("find_device");
        if name == self.config.device_name && self.present.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DeviceError::NotFound(name.to_string()))
        }
    }

    async fn open(&self, name: &str) -> DeviceResult<Box<dyn TrackerDevice>> {
        self.probe.record("open");
        if name != self.config.device_name || !self.present.load(Ordering::SeqCst) {
            return Err(DeviceError::NotFound(name.to_string()));
        }
        if self.config.fail_open {
            return Err(DeviceError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "simulated open failure",
            )));
        }
        self.probe.inner.lock().opens += 1;
        Ok(Box::new(MockTracker::new(
            self.config.clone(),
            self.probe.clone(),
        )))
    }
}

/// Open simulated tracker.
///
/// Produces each station moving on its own circle with slowly turning Euler
/// angles, so a plot of the relayed data shows something recognizable.
pub struct MockTracker {
    config: MockTrackerConfig,
    probe: MockProbe,
    fields: DataFields,
    residual: usize,
    binary: bool,
    continuous: bool,
    closed: bool,
    reads: u64,
    frame: u64,
    next_frame_at: Option<Instant>,
}

impl MockTracker {
    /// Create an open simulated tracker.
    pub fn new(config: MockTrackerConfig, probe: MockProbe) -> Self {
        let residual = config.residual_reads;
        Self {
            config,
            probe,
            fields: DataFields::empty(),
            residual,
            binary: false,
            continuous: false,
            closed: false,
            reads: 0,
            frame: 0,
            next_frame_at: None,
        }
    }

    fn step(&mut self, step: MockStep) -> DeviceResult<()> {
        let name = step.call_name();
        self.probe.record(name);
        if self.closed {
            return Err(DeviceError::Closed);
        }
        if self.config.fail_step == Some(step) {
            return Err(DeviceError::Protocol(format!("simulated failure in {name}")));
        }
        if self.config.fail_teardown
            && self.reads > 0
            && matches!(step, MockStep::RequestData | MockStep::TextMode)
        {
            return Err(DeviceError::Protocol(format!("simulated failure in {name}")));
        }
        Ok(())
    }

    async fn pace(&mut self) {
        if !self.continuous || self.config.sample_period.is_zero() {
            return;
        }
        let now = Instant::now();
        let due = self.next_frame_at.unwrap_or(now);
        if due > now {
            sleep_until(due).await;
        }
        self.next_frame_at = Some(due.max(now) + self.config.sample_period);
    }

    fn sample(&self, station: usize) -> Record {
        let t = self.frame as f32 / 240.0;
        let phase = station as f32 * TAU / self.config.stations.max(1) as f32;
        let angle = t * 0.5 + phase;

        let mut record = Record::new(station as u8);
        if self.fields.contains(DataFields::POSITION) {
            record = record.with_position([
                20.0 * angle.cos(),
                20.0 * angle.sin(),
                10.0 + station as f32,
            ]);
        }
        if self.fields.contains(DataFields::EULER) {
            let azimuth = (angle.to_degrees() + 180.0).rem_euclid(360.0) - 180.0;
            record = record.with_euler([azimuth, 15.0 * (t + phase).sin(), 5.0 * t.cos()]);
        }
        if self.fields.contains(DataFields::TIMESTAMP) {
            record = record.with_timestamp((self.frame as u32).wrapping_mul(4));
        }
        record
    }
}

#[async_trait]
impl TrackerDevice for MockTracker {
    async fn request_data(&mut self) -> DeviceResult<()> {
        self.step(MockStep::RequestData)?;
        self.continuous = false;
        Ok(())
    }

    async fn request_continuous(&mut self) -> DeviceResult<()> {
        self.step(MockStep::RequestContinuous)?;
        self.continuous = true;
        self.next_frame_at = None;
        Ok(())
    }

    async fn read_until_timeout(&mut self, _timeout: Duration) -> ReadOutcome {
        self.probe.record("read_until_timeout");
        if self.residual > 0 {
            self.residual -= 1;
            ReadOutcome::Consumed
        } else {
            ReadOutcome::TimedOut
        }
    }

    async fn reset(&mut self) -> DeviceResult<()> {
        self.step(MockStep::Reset)
    }

    async fn text_mode(&mut self) -> DeviceResult<()> {
        self.step(MockStep::TextMode)?;
        self.binary = false;
        Ok(())
    }

    async fn binary_mode(&mut self) -> DeviceResult<()> {
        self.step(MockStep::BinaryMode)?;
        self.binary = true;
        Ok(())
    }

    async fn version(&mut self) -> DeviceResult<DeviceType> {
        self.step(MockStep::Version)?;
        Ok(self.config.device_type)
    }

    async fn read_bits(&mut self) -> DeviceResult<()> {
        self.step(MockStep::ReadBits)
    }

    async fn stations(&mut self) -> DeviceResult<usize> {
        self.step(MockStep::Stations)?;
        Ok(self.config.stations)
    }

    async fn set_hemisphere(&mut self) -> DeviceResult<()> {
        self.step(MockStep::Hemisphere)
    }

    async fn set_units(&mut self, _units: Units) -> DeviceResult<()> {
        self.step(MockStep::Units)
    }

    async fn set_rate(&mut self, rate: SampleRate) -> DeviceResult<()> {
        self.step(MockStep::Rate)?;
        if !self.config.sample_period.is_zero() {
            self.config.sample_period = Duration::from_secs_f64(1.0 / f64::from(rate.hz()));
        }
        Ok(())
    }

    async fn set_data_fields(&mut self, fields: DataFields) -> DeviceResult<()> {
        self.step(MockStep::DataFields)?;
        self.fields = fields;
        Ok(())
    }

    async fn read_record(&mut self, station: usize) -> DeviceResult<Record> {
        if self.closed {
            return Err(DeviceError::Closed);
        }
        if !self.binary {
            return Err(DeviceError::Protocol("device is in text mode".into()));
        }
        if station >= self.config.stations {
            return Err(DeviceError::Protocol(format!(
                "station {station} is not active"
            )));
        }
        if let Some(limit) = self.config.fail_reads_after {
            if self.reads >= limit {
                return Err(DeviceError::Timeout);
            }
        }
        if station == 0 {
            self.pace().await;
        }

        let record = self.sample(station);
        self.reads += 1;
        self.probe.inner.lock().records_read += 1;
        if station + 1 == self.config.stations {
            self.frame += 1;
        }
        Ok(record)
    }

    async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.probe.inner.lock().closes += 1;
    }
}
