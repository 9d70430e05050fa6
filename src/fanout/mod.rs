//! Fan-out Engine
//!
//! Reads one record per station per pass from the open device and hands each
//! record to every configured sink. Sinks are independent: an error in one is
//! logged and the record still reaches the others.
//!
//! # Pass Structure
//!
//! ```text
//! tick monitor → [request burst] → begin_pass(all) → read/publish per station → end_pass(all)
//! ```
//!
//! A failed record read ends the pass early. `data_good` is cleared, the sinks
//! still get `end_pass`, and the error goes back to the session.

pub mod log_sink;
pub mod mapping;
pub mod monitor;
pub mod remote_sink;

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::{DeviceError, SinkError};
use crate::hardware::{Record, TrackerDevice};
use crate::run_state::RunState;

pub use log_sink::{format_float, format_record, parse_hex_float, FloatFormat, LogSink};
pub use mapping::{
    MappingSink, MessageSignalBus, SignalBus, SignalHandle, SignalKind, SignalRegistry, Timetag,
};
pub use monitor::FrequencyMonitor;
pub use remote_sink::{record_messages, RemoteSink};

/// Destination for decoded records.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Short name used in log events.
    fn name(&self) -> &'static str;

    /// Whether the sink currently has somewhere to deliver records.
    fn is_active(&self) -> bool {
        true
    }

    async fn begin_pass(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    async fn publish(&mut self, record: &Record) -> Result<(), SinkError>;

    async fn end_pass(&mut self) -> Result<(), SinkError> {
        Ok(())
    }

    /// Release resources at the end of the run.
    async fn teardown(&mut self) {}
}

/// A sink and its current run of failed calls.
struct SinkSlot {
    sink: Box<dyn RecordSink>,
    failures: u64,
}

impl SinkSlot {
    /// Only the first failure of a run is a warning; repeats go to debug.
    fn failed(&mut self, err: SinkError) {
        self.failures += 1;
        if self.failures == 1 {
            warn!(sink = self.sink.name(), "Sink write failed: {}", err);
        } else {
            debug!(
                sink = self.sink.name(),
                failures = self.failures,
                "Sink write failed again: {}",
                err
            );
        }
    }

    fn delivered(&mut self) {
        if self.failures > 0 {
            info!(
                sink = self.sink.name(),
                failures = self.failures,
                "Sink recovered"
            );
            self.failures = 0;
        }
    }
}

/// The set of sinks plus the pass loop body.
pub struct FanOut {
    state: Arc<RunState>,
    sinks: Vec<SinkSlot>,
    monitor: FrequencyMonitor,
    show_rate: bool,
}

impl FanOut {
    pub fn new(state: Arc<RunState>) -> Self {
        Self {
            state,
            sinks: Vec::new(),
            monitor: FrequencyMonitor::new(),
            show_rate: false,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn RecordSink>) -> Self {
        self.sinks.push(SinkSlot { sink, failures: 0 });
        self
    }

    /// Print the update rate on stderr at every checkpoint.
    pub fn with_rate_display(mut self, show_rate: bool) -> Self {
        self.show_rate = show_rate;
        self
    }

    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }

    /// Whether any sink would deliver a record right now.
    pub fn has_active_sink(&self) -> bool {
        self.sinks.iter().any(|slot| slot.sink.is_active())
    }

    /// Run one pass over `stations` stations.
    pub async fn run_pass(
        &mut self,
        device: &mut dyn TrackerDevice,
        stations: usize,
        poll: bool,
    ) -> Result<(), DeviceError> {
        if let Some(rate) = self.monitor.tick() {
            debug!(rate_hz = rate, "Update frequency");
            if self.show_rate {
                eprint!("Update frequency: {rate:.2} Hz           \r");
            }
        }

        if poll {
            if let Err(e) = device.request_data().await {
                warn!("Data request failed: {}", e);
            }
        }

        for slot in &mut self.sinks {
            if let Err(e) = slot.sink.begin_pass().await {
                slot.failed(e);
            }
        }

        let mut result = Ok(());
        for station in 0..stations {
            match device.read_record(station).await {
                Ok(record) => {
                    self.state.set_data_good(true);
                    self.publish(&record).await;
                }
                Err(e) => {
                    self.state.set_data_good(false);
                    result = Err(e);
                    break;
                }
            }
        }

        for slot in &mut self.sinks {
            if let Err(e) = slot.sink.end_pass().await {
                slot.failed(e);
            }
        }
        result
    }

    async fn publish(&mut self, record: &Record) {
        for slot in &mut self.sinks {
            match slot.sink.publish(record).await {
                Ok(()) => slot.delivered(),
                Err(e) => slot.failed(e),
            }
        }
    }

    /// Tear down every sink.
    pub async fn shutdown(&mut self) {
        for slot in &mut self.sinks {
            slot.sink.teardown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{DataFields, MockBackend, MockTrackerConfig, TrackerBackend};
    use parking_lot::Mutex;
    use tracing_test::traced_test;

    #[derive(Clone, Default)]
    struct Collect {
        records: Arc<Mutex<Vec<Record>>>,
        passes: Arc<Mutex<usize>>,
    }

    #[async_trait]
    impl RecordSink for Collect {
        fn name(&self) -> &'static str {
            "collect"
        }

        async fn publish(&mut self, record: &Record) -> Result<(), SinkError> {
            self.records.lock().push(record.clone());
            Ok(())
        }

        async fn end_pass(&mut self) -> Result<(), SinkError> {
            *self.passes.lock() += 1;
            Ok(())
        }
    }

    async fn streaming_device(config: MockTrackerConfig) -> Box<dyn TrackerDevice> {
        let backend = MockBackend::new(config);
        let mut device = backend.open("sim").await.unwrap();
        device.set_data_fields(DataFields::POSITION).await.unwrap();
        device.binary_mode().await.unwrap();
        device
    }

    #[tokio::test]
    async fn test_pass_reads_every_station() {
        let state = Arc::new(RunState::new(true, None));
        let collect = Collect::default();
        let mut fanout = FanOut::new(state.clone()).with_sink(Box::new(collect.clone()));
        let mut device = streaming_device(MockTrackerConfig::new("sim").with_stations(3)).await;

        fanout.run_pass(device.as_mut(), 3, true).await.unwrap();

        let stations: Vec<u8> = collect.records.lock().iter().map(|r| r.station).collect();
        assert_eq!(stations, vec![0, 1, 2]);
        assert_eq!(*collect.passes.lock(), 1);
        assert!(state.data_good());
    }

    #[tokio::test]
    async fn test_read_failure_aborts_pass() {
        let state = Arc::new(RunState::new(true, None));
        state.set_data_good(true);
        let collect = Collect::default();
        let mut fanout = FanOut::new(state.clone()).with_sink(Box::new(collect.clone()));
        let mut device = streaming_device(
            MockTrackerConfig::new("sim")
                .with_stations(3)
                .failing_reads_after(1),
        )
        .await;

        let result = fanout.run_pass(device.as_mut(), 3, false).await;

        assert!(matches!(result, Err(DeviceError::Timeout)));
        assert_eq!(collect.records.lock().len(), 1);
        assert_eq!(*collect.passes.lock(), 1);
        assert!(!state.data_good());
    }

    /// Fails the first `failing` publishes, then accepts everything.
    struct Flaky {
        failing: usize,
    }

    #[async_trait]
    impl RecordSink for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn publish(&mut self, _record: &Record) -> Result<(), SinkError> {
            if self.failing > 0 {
                self.failing -= 1;
                return Err(SinkError::Signal("unreachable".into()));
            }
            Ok(())
        }
    }

    fn warn_lines(lines: &[&str], needle: &str) -> usize {
        lines
            .iter()
            .filter(|line| line.contains("WARN") && line.contains(needle))
            .count()
    }

    #[tokio::test]
    #[traced_test]
    async fn test_repeated_sink_failures_warn_once_per_run() {
        let state = Arc::new(RunState::new(true, None));
        let mut fanout = FanOut::new(state).with_sink(Box::new(Flaky { failing: 20 }));
        let mut device = streaming_device(MockTrackerConfig::new("sim").with_stations(2)).await;

        for _ in 0..10 {
            fanout.run_pass(device.as_mut(), 2, false).await.unwrap();
        }
        logs_assert(|lines| match warn_lines(lines, "Sink write failed") {
            1 => Ok(()),
            n => Err(format!("expected one warning, saw {n}")),
        });

        fanout.run_pass(device.as_mut(), 2, false).await.unwrap();
        assert!(logs_contain("Sink recovered"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_failure_after_recovery_warns_again() {
        let state = Arc::new(RunState::new(true, None));
        let mut fanout = FanOut::new(state).with_sink(Box::new(Flaky { failing: 1 }));
        let mut device = streaming_device(MockTrackerConfig::new("sim").with_stations(1)).await;

        fanout.run_pass(device.as_mut(), 1, false).await.unwrap();
        fanout.run_pass(device.as_mut(), 1, false).await.unwrap();
        assert_eq!(fanout.sinks[0].failures, 0);

        fanout.sinks[0].failed(SinkError::Signal("unreachable".into()));
        logs_assert(|lines| match warn_lines(lines, "Sink write failed") {
            2 => Ok(()),
            n => Err(format!("expected two warnings, saw {n}")),
        });
    }
}
