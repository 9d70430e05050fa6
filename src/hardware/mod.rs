//! Tracker hardware boundary.
//!
//! Device API traits, record types, and the simulated tracker.

pub mod capabilities;
pub mod mock;
pub mod record;

pub use capabilities::{TrackerBackend, TrackerDevice};
pub use mock::{MockBackend, MockProbe, MockStep, MockTracker, MockTrackerConfig};
pub use record::{DataFields, DeviceType, ReadOutcome, Record, SampleRate, Units};
