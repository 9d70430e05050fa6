//! Dynamic signal mapping.
//!
//! The mapping sink exposes every station as six named output signals
//! (`/marker.<n>/x` … `/marker.<n>/roll`) on a [`SignalBus`]. Signals are
//! registered lazily the first time a station produces a record and stay
//! registered until the sink is torn down. All updates of one pass share a
//! single timetag and are flushed together at the end of the pass.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::SinkError;
use crate::fanout::RecordSink;
use crate::hardware::{DataFields, Record};
use crate::network::{Destination, Message, MessageArg, MessageTransport};

/// One output value of a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    X,
    Y,
    Z,
    Azimuth,
    Elevation,
    Roll,
}

impl SignalKind {
    pub const ALL: [SignalKind; 6] = [
        SignalKind::X,
        SignalKind::Y,
        SignalKind::Z,
        SignalKind::Azimuth,
        SignalKind::Elevation,
        SignalKind::Roll,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SignalKind::X => "x",
            SignalKind::Y => "y",
            SignalKind::Z => "z",
            SignalKind::Azimuth => "azimuth",
            SignalKind::Elevation => "elevation",
            SignalKind::Roll => "roll",
        }
    }

    /// Unit announced with the signal. Angles have none.
    pub fn unit(&self) -> Option<&'static str> {
        match self {
            SignalKind::X | SignalKind::Y | SignalKind::Z => Some("cm"),
            _ => None,
        }
    }

    /// This signal's value in `record`, if the field is present.
    pub fn value(&self, record: &Record) -> Option<f32> {
        let (field, values, index) = match self {
            SignalKind::X => (DataFields::POSITION, &record.position, 0),
            SignalKind::Y => (DataFields::POSITION, &record.position, 1),
            SignalKind::Z => (DataFields::POSITION, &record.position, 2),
            SignalKind::Azimuth => (DataFields::EULER, &record.euler, 0),
            SignalKind::Elevation => (DataFields::EULER, &record.euler, 1),
            SignalKind::Roll => (DataFields::EULER, &record.euler, 2),
        };
        record.fields.contains(field).then(|| values[index])
    }
}

/// Opaque identifier of a registered output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalHandle(pub u32);

/// Time stamp attached to a batch of updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timetag(pub DateTime<Utc>);

/// Output side of the signal mapping network.
#[async_trait]
pub trait SignalBus: Send + Sync {
    /// Announce a new output signal.
    fn add_output(&mut self, name: &str, unit: Option<&str>) -> Result<SignalHandle, SinkError>;

    /// Current time on the bus clock.
    fn now(&self) -> Timetag {
        Timetag(Utc::now())
    }

    /// Begin collecting updates stamped `at`.
    fn start_queue(&mut self, at: Timetag);

    /// Queue one value.
    fn update(&mut self, signal: SignalHandle, value: f32, at: Timetag) -> Result<(), SinkError>;

    /// Deliver everything queued since `start_queue`.
    async fn send_queue(&mut self, at: Timetag) -> Result<(), SinkError>;

    /// Drop all outputs.
    fn clear(&mut self);
}

/// Lazily filled `(station, kind) → signal` table.
#[derive(Debug, Clone)]
pub struct SignalRegistry {
    signals: HashMap<(u8, SignalKind), SignalHandle>,
    max_stations: usize,
}

impl SignalRegistry {
    pub fn new(max_stations: usize) -> Self {
        Self {
            signals: HashMap::new(),
            max_stations,
        }
    }

    /// Register the six outputs of `station` unless already present.
    pub fn ensure_station(&mut self, station: u8, bus: &mut dyn SignalBus) -> Result<(), SinkError> {
        if usize::from(station) >= self.max_stations {
            return Err(SinkError::Signal(format!(
                "station {station} exceeds the configured maximum of {} stations",
                self.max_stations
            )));
        }
        if self.signals.contains_key(&(station, SignalKind::X)) {
            return Ok(());
        }

        for kind in SignalKind::ALL {
            let name = format!("/marker.{}/{}", station, kind.name());
            let handle = bus.add_output(&name, kind.unit())?;
            self.signals.insert((station, kind), handle);
        }
        info!(station, "Registered mapping signals");
        Ok(())
    }

    pub fn get(&self, station: u8, kind: SignalKind) -> Option<SignalHandle> {
        self.signals.get(&(station, kind)).copied()
    }

    /// Number of registered signals.
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    pub fn clear(&mut self) {
        self.signals.clear();
    }
}

/// Sink publishing records as mapped signals.
pub struct MappingSink {
    bus: Box<dyn SignalBus>,
    registry: SignalRegistry,
    timetag: Option<Timetag>,
}

impl MappingSink {
    pub fn new(bus: Box<dyn SignalBus>, max_stations: usize) -> Self {
        Self {
            bus,
            registry: SignalRegistry::new(max_stations),
            timetag: None,
        }
    }

    pub fn registry(&self) -> &SignalRegistry {
        &self.registry
    }
}

#[async_trait]
impl RecordSink for MappingSink {
    fn name(&self) -> &'static str {
        "mapper"
    }

    async fn begin_pass(&mut self) -> Result<(), SinkError> {
        let now = self.bus.now();
        self.bus.start_queue(now);
        self.timetag = Some(now);
        Ok(())
    }

    async fn publish(&mut self, record: &Record) -> Result<(), SinkError> {
        self.registry.ensure_station(record.station, self.bus.as_mut())?;
        let at = match self.timetag {
            Some(at) => at,
            None => {
                let now = self.bus.now();
                self.bus.start_queue(now);
                self.timetag = Some(now);
                now
            }
        };

        for kind in SignalKind::ALL {
            let value = kind.value(record);
            let handle = self.registry.get(record.station, kind);
            if let (Some(value), Some(handle)) = (value, handle) {
                self.bus.update(handle, value, at)?;
            }
        }
        Ok(())
    }

    async fn end_pass(&mut self) -> Result<(), SinkError> {
        match self.timetag.take() {
            Some(at) => self.bus.send_queue(at).await,
            None => Ok(()),
        }
    }

    async fn teardown(&mut self) {
        self.registry.clear();
        self.bus.clear();
        debug!("Mapping signals released");
    }
}

/// [`SignalBus`] delivering queued updates as typed messages
/// `/<alias>/marker.<n>/<kind>` to one destination.
pub struct MessageSignalBus {
    transport: Arc<dyn MessageTransport>,
    destination: Destination,
    alias: String,
    outputs: Vec<String>,
    queue: Vec<Message>,
}

impl MessageSignalBus {
    pub fn new(
        transport: Arc<dyn MessageTransport>,
        destination: Destination,
        alias: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            destination,
            alias: alias.into(),
            outputs: Vec::new(),
            queue: Vec::new(),
        }
    }
}

#[async_trait]
impl SignalBus for MessageSignalBus {
    fn add_output(&mut self, name: &str, unit: Option<&str>) -> Result<SignalHandle, SinkError> {
        let handle = u32::try_from(self.outputs.len())
            .map(SignalHandle)
            .map_err(|_| SinkError::Signal("too many outputs".into()))?;
        debug!(alias = %self.alias, name, unit, "Added output signal");
        self.outputs.push(format!("/{}{}", self.alias, name));
        Ok(handle)
    }

    fn start_queue(&mut self, _at: Timetag) {
        self.queue.clear();
    }

    fn update(&mut self, signal: SignalHandle, value: f32, _at: Timetag) -> Result<(), SinkError> {
        let path = self
            .outputs
            .get(signal.0 as usize)
            .ok_or_else(|| SinkError::Signal(format!("unknown signal {}", signal.0)))?;
        self.queue
            .push(Message::new(path.clone()).arg(MessageArg::Float(value)));
        Ok(())
    }

    async fn send_queue(&mut self, _at: Timetag) -> Result<(), SinkError> {
        let mut first_error = None;
        for message in self.queue.drain(..) {
            if let Err(e) = self.transport.send(&self.destination, &message).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn clear(&mut self) {
        self.outputs.clear();
        self.queue.clear();
    }
}
