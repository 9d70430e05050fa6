//! Tracker Device API
//!
//! The acquisition core talks to motion trackers only through these two traits:
//!
//! - `TrackerBackend` discovers devices and opens them
//! - `TrackerDevice` is one open handle, exclusively owned by the session
//!
//! The serial wire protocol (handshake, text/binary mode switching, record
//! framing) lives behind `TrackerDevice`. Implementations exist for the
//! simulated tracker in `hardware::mock`; a serial driver implements the same
//! traits.
//!
//! # Design Philosophy
//!
//! Each trait:
//! - Is async (uses #[async_trait])
//! - Is thread-safe (`Send`, and `Sync` for the shared backend)
//! - Reports failures as `DeviceError`
//!
//! # Example
//!
//! ```rust,ignore
//! async fn first_record(backend: &dyn TrackerBackend) -> DeviceResult<Record> {
//!     backend.find_device("/dev/ttyUSB0").await?;
//!     let mut device = backend.open("/dev/ttyUSB0").await?;
//!     device.set_data_fields(DataFields::POSITION).await?;
//!     device.binary_mode().await?;
//!     device.request_data().await?;
//!     let record = device.read_record(0).await;
//!     device.close().await;
//!     record
//! }
//! ```

use async_trait::async_trait;
use std::time::Duration;

use crate::error::DeviceResult;
use crate::hardware::record::{DataFields, DeviceType, ReadOutcome, Record, SampleRate, Units};

/// Device discovery and open.
#[async_trait]
pub trait TrackerBackend: Send + Sync {
    /// Check whether a device is present at `name`.
    ///
    /// # Returns
    /// - Ok(()) if the device can be opened
    /// - Err(DeviceError::NotFound) otherwise
    async fn find_device(&self, name: &str) -> DeviceResult<()>;

    /// Open the device at `name` and hand over exclusive ownership of it.
    async fn open(&self, name: &str) -> DeviceResult<Box<dyn TrackerDevice>>;
}

/// One open tracker.
///
/// # Contract
/// - Configuration calls are idempotent and may be reissued on every cycle
/// - `read_record` blocks at most for the device's own read timeout
/// - `close` never fails and is safe to call more than once
#[async_trait]
pub trait TrackerDevice: Send {
    /// Request a single burst of records. Also stops continuous output.
    async fn request_data(&mut self) -> DeviceResult<()>;

    /// Ask the device to stream records without further requests.
    async fn request_continuous(&mut self) -> DeviceResult<()>;

    /// Discard whatever arrives within `timeout`.
    async fn read_until_timeout(&mut self, timeout: Duration) -> ReadOutcome;

    /// Hardware reset. Blocks for roughly ten seconds on real devices.
    async fn reset(&mut self) -> DeviceResult<()>;

    /// Switch the device to ASCII command responses.
    async fn text_mode(&mut self) -> DeviceResult<()>;

    /// Switch the device to binary record output.
    async fn binary_mode(&mut self) -> DeviceResult<()>;

    /// Query firmware version and model.
    async fn version(&mut self) -> DeviceResult<DeviceType>;

    /// Read the initialization status bits; Err if any error bit is set.
    async fn read_bits(&mut self) -> DeviceResult<()>;

    /// Number of active stations.
    async fn stations(&mut self) -> DeviceResult<usize>;

    /// Set the tracking hemisphere for all stations.
    async fn set_hemisphere(&mut self) -> DeviceResult<()>;

    /// Select the unit system.
    async fn set_units(&mut self, units: Units) -> DeviceResult<()>;

    /// Select the output rate.
    async fn set_rate(&mut self, rate: SampleRate) -> DeviceResult<()>;

    /// Select which fields are included in each record.
    async fn set_data_fields(&mut self, fields: DataFields) -> DeviceResult<()>;

    /// Read the next record for `station`.
    async fn read_record(&mut self, station: usize) -> DeviceResult<Record>;

    /// Release the handle.
    async fn close(&mut self);
}
