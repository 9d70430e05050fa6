//! Tracker data types shared by the Device API and the fan-out sinks.

use bitflags::bitflags;
use chrono::{DateTime, Utc};
use std::fmt;

bitflags! {
    /// Data fields a tracker can include in each record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DataFields: u8 {
        /// Cartesian position (x, y, z)
        const POSITION = 0b001;
        /// Euler angles (azimuth, elevation, roll)
        const EULER = 0b010;
        /// Device-native frame counter
        const TIMESTAMP = 0b100;
    }
}

/// One decoded sample for one station.
///
/// Values in `position`, `euler` and `timestamp` are only meaningful when the
/// corresponding bit is present in `fields`.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Station index in `[0, stations)`
    pub station: u8,
    /// Fields actually present on this record
    pub fields: DataFields,
    /// Position in device units (cm when metric)
    pub position: [f32; 3],
    /// Azimuth, elevation, roll in degrees
    pub euler: [f32; 3],
    /// Device frame counter
    pub timestamp: u32,
    /// Wall-clock time the record was received
    pub read_time: DateTime<Utc>,
}

impl Record {
    /// Create an empty record for `station` stamped with the current time.
    pub fn new(station: u8) -> Self {
        Self {
            station,
            fields: DataFields::empty(),
            position: [0.0; 3],
            euler: [0.0; 3],
            timestamp: 0,
            read_time: Utc::now(),
        }
    }

    /// Set position values and mark the field present.
    pub fn with_position(mut self, position: [f32; 3]) -> Self {
        self.position = position;
        self.fields |= DataFields::POSITION;
        self
    }

    /// Set Euler angles and mark the field present.
    pub fn with_euler(mut self, euler: [f32; 3]) -> Self {
        self.euler = euler;
        self.fields |= DataFields::EULER;
        self
    }

    /// Set the device timestamp and mark the field present.
    pub fn with_timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self.fields |= DataFields::TIMESTAMP;
        self
    }

    /// Override the receive time.
    pub fn with_read_time(mut self, read_time: DateTime<Utc>) -> Self {
        self.read_time = read_time;
        self
    }

    /// Receive time as milliseconds since the Unix epoch.
    pub fn read_time_ms(&self) -> f64 {
        self.read_time.timestamp_micros() as f64 / 1000.0
    }
}

/// Tracker model reported by the version query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Liberty,
    Patriot,
    Unknown,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Liberty => f.write_str("Liberty"),
            DeviceType::Patriot => f.write_str("Patriot"),
            DeviceType::Unknown => f.write_str("unknown"),
        }
    }
}

/// Unit system for position output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    Metric,
    Imperial,
}

/// Supported output rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRate {
    Hz120,
    Hz240,
}

impl SampleRate {
    /// Map a rate in Hz onto a supported setting.
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            120 => Some(SampleRate::Hz120),
            240 => Some(SampleRate::Hz240),
            _ => None,
        }
    }

    /// Rate in Hz.
    pub fn hz(&self) -> u32 {
        match self {
            SampleRate::Hz120 => 120,
            SampleRate::Hz240 => 240,
        }
    }
}

/// Result of a bounded-timeout read used to discard in-flight bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Some bytes arrived before the timeout and were discarded
    Consumed,
    /// Nothing arrived within the timeout
    TimedOut,
}
