//! Custom error types for the relay.
//!
//! The crate splits its failures by the collaborator they come from, using the
//! `thiserror` crate for each:
//!
//! - **`DeviceError`**: anything the tracker reports through the Device API,
//!   from a missing device to a record read that timed out.
//! - **`TransportError`**: address resolution and message send/receive problems
//!   on the network side.
//! - **`SinkError`**: a fan-out sink could not deliver a record. These are
//!   always logged and never stop acquisition.
//! - **`RelayError`**: the application-level error. It names the acquisition
//!   stage that failed so the binary can print a one-line diagnostic.
//!
//! By using `#[from]`, the lower-level errors convert into `RelayError` with `?`
//! where no extra context is needed.

use std::fmt;
use thiserror::Error;

/// Convenience alias for results using the application error type.
pub type RelayResult<T> = std::result::Result<T, RelayError>;

/// Convenience alias for Device API results.
pub type DeviceResult<T> = std::result::Result<T, DeviceError>;

/// Errors reported by a tracker device or its backend.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("No device found at {0}")]
    NotFound(String),

    #[error("Timed out waiting for the device")]
    Timeout,

    #[error("Device I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Device protocol error: {0}")]
    Protocol(String),

    #[error("Device handle is closed")]
    Closed,
}

/// Errors raised by the message transport.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Could not resolve {host}:{port}: {reason}")]
    Resolve {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Invalid destination URL '{0}'")]
    InvalidUrl(String),

    #[error("Transport I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to decode message: {0}")]
    Decode(String),
}

/// A sink failed to deliver a record.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Log write failed: {0}")]
    Write(#[from] std::io::Error),

    #[error("Remote send failed: {0}")]
    Transport(#[from] TransportError),

    #[error("Signal update failed: {0}")]
    Signal(String),
}

/// Step of the configuration sequence run right after the device is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigStage {
    DataRequest,
    TextMode,
    Version,
    ReadBits,
    Stations,
    Hemisphere,
    Units,
    Rate,
    DataFields,
    BinaryMode,
    RequestContinuous,
}

impl ConfigStage {
    /// Short stage name used in diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigStage::DataRequest => "data_request",
            ConfigStage::TextMode => "text_mode",
            ConfigStage::Version => "get_version",
            ConfigStage::ReadBits => "read_bits",
            ConfigStage::Stations => "get_stations",
            ConfigStage::Hemisphere => "set_hemisphere",
            ConfigStage::Units => "set_units",
            ConfigStage::Rate => "set_rate",
            ConfigStage::DataFields => "set_data_fields",
            ConfigStage::BinaryMode => "binary_mode",
            ConfigStage::RequestContinuous => "data_request_continuous",
        }
    }
}

impl fmt::Display for ConfigStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Application-level error.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not find device at {device}")]
    DeviceNotFound {
        device: String,
        #[source]
        source: DeviceError,
    },

    #[error("Could not open device {device}: {source}")]
    DeviceOpenFailed {
        device: String,
        #[source]
        source: DeviceError,
    },

    #[error("Device configuration failed at {stage}: {source}")]
    ConfigurationFailed {
        stage: ConfigStage,
        #[source]
        source: DeviceError,
    },

    #[error("Data stream error: {0}")]
    Read(#[source] DeviceError),

    #[error("Address resolution failed: {0}")]
    AddressResolution(#[source] TransportError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

impl From<figment::Error> for RelayError {
    fn from(value: figment::Error) -> Self {
        RelayError::Config(Box::new(value))
    }
}

impl RelayError {
    /// Name of the acquisition stage this error belongs to, if any.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            RelayError::DeviceNotFound { .. } => Some("find_device"),
            RelayError::DeviceOpenFailed { .. } => Some("open_device"),
            RelayError::ConfigurationFailed { stage, .. } => Some(stage.as_str()),
            RelayError::Read(_) => Some("read_data_record"),
            _ => None,
        }
    }
}
