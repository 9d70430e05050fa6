//! Configuration using Figment
//!
//! Configuration is layered, later layers overriding earlier ones:
//! 1. Built-in defaults (`RelayConfig::default()`)
//! 2. `config/tracker-relay.toml`, or the file passed with `--config`
//! 3. Environment variables prefixed with `TRACKER_RELAY_`, nested with `__`
//!    (e.g. `TRACKER_RELAY_DEVICE__NAME=/dev/ttyUSB1`)
//! 4. Command-line flags, applied by the binary
//!
//! # Example
//! ```no_run
//! use tracker_relay::config::RelayConfig;
//!
//! let config = RelayConfig::load()?;
//! config.validate()?;
//! println!("Device: {}", config.device.name);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{RelayError, RelayResult};
use crate::fanout::FloatFormat;
use crate::hardware::{DataFields, SampleRate};
use crate::session::{AcquisitionMode, AcquisitionSettings};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "config/tracker-relay.toml";

/// Prefix of environment variable overrides.
pub const ENV_PREFIX: &str = "TRACKER_RELAY_";

/// `output.log` value selecting standard output.
pub const STDOUT_LOG: &str = "-";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub application: ApplicationConfig,
    pub device: DeviceConfig,
    pub data: DataConfig,
    pub output: OutputConfig,
    pub network: NetworkConfig,
    pub mapper: MapperConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Diagnostic output format (pretty, compact, json)
    pub log_format: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "tracker-relay".to_string(),
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

/// Tracker and acquisition loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device backend. Only "simulated" ships with the crate.
    pub backend: String,
    /// Device path or name passed to discovery and open
    pub name: String,
    /// Retry forever instead of exiting on the first failure
    pub daemon: bool,
    /// Reset the device before configuring it (takes about 10 s)
    pub reset: bool,
    /// Poll instead of streaming; the value is the period in milliseconds
    /// (0 = as fast as possible). Unset selects continuous mode.
    pub poll_period_ms: Option<f64>,
    /// Output rate in Hz (120 or 240)
    pub rate_hz: u32,
    /// Delay between daemon-mode cycles
    pub retry_delay_ms: u64,
    /// Timeout of each read used to discard pending output
    pub drain_timeout_ms: u64,
    /// Upper bound on discard reads while configuring
    pub max_drain_reads: usize,
    /// Highest station count the mapping sink registers signals for
    pub max_stations: usize,
    /// Stations reported by the simulated tracker
    pub stations: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: "simulated".to_string(),
            name: "/dev/ttyUSB0".to_string(),
            daemon: false,
            reset: false,
            poll_period_ms: None,
            rate_hz: 240,
            retry_delay_ms: 1000,
            drain_timeout_ms: 500,
            max_drain_reads: 64,
            max_stations: 16,
            stations: 2,
        }
    }
}

/// Fields requested from the tracker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub position: bool,
    pub euler: bool,
    pub timestamp: bool,
}

/// Local record log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Log file path, or "-" for standard output. Unset disables the log.
    pub log: Option<String>,
    /// Write float values as IEEE-754 hex
    pub hex: bool,
    /// Print the update rate on stderr
    pub show_rate: bool,
}

/// Remote destination and command listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Startup remote destination URL (`osc.udp://host:port`, `udp://host:port`, `host:port`)
    pub send: Option<String>,
    /// UDP port for start/stop/status commands
    pub listen: Option<u16>,
    /// Address the command listener binds to
    pub bind_host: String,
    /// Path prefix of every command and data message
    pub namespace: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            send: None,
            listen: None,
            bind_host: "0.0.0.0".to_string(),
            namespace: "/liberty".to_string(),
        }
    }
}

/// Dynamic signal mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    pub enabled: bool,
    /// Device alias prefixed to every signal path
    pub alias: String,
    /// Where signal updates are sent
    pub destination: Option<String>,
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            alias: "polhemus".to_string(),
            destination: None,
        }
    }
}

impl RelayConfig {
    /// Load configuration from the default file and environment variables
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path. A missing file is skipped.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Parse a TOML document on top of the defaults, ignoring the environment.
    pub fn from_toml_str(toml: &str) -> Result<Self, figment::Error> {
        Figment::new().merge(Toml::string(toml)).extract()
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), String> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            ));
        }

        let valid_formats = ["pretty", "compact", "json"];
        if !valid_formats.contains(&self.application.log_format.as_str()) {
            return Err(format!(
                "Invalid log_format '{}'. Must be one of: {}",
                self.application.log_format,
                valid_formats.join(", ")
            ));
        }

        if self.device.backend != "simulated" {
            return Err(format!(
                "Unsupported device backend '{}'. Must be: simulated",
                self.device.backend
            ));
        }

        if self.data_fields().is_empty() {
            return Err("No data requested. Enable at least one of position, euler, timestamp".into());
        }

        if SampleRate::from_hz(self.device.rate_hz).is_none() {
            return Err(format!(
                "Invalid rate_hz {}. Must be 120 or 240",
                self.device.rate_hz
            ));
        }

        if let Some(period) = self.device.poll_period_ms {
            if !period.is_finite() || period < 0.0 {
                return Err(format!("Invalid poll_period_ms {period}. Must be >= 0"));
            }
        }

        if !(1..=64).contains(&self.device.max_stations) {
            return Err(format!(
                "Invalid max_stations {}. Must be 1-64",
                self.device.max_stations
            ));
        }

        if !self.network.namespace.starts_with('/') {
            return Err(format!(
                "Invalid namespace '{}'. Must start with '/'",
                self.network.namespace
            ));
        }

        if self.mapper.enabled && self.mapper.destination.is_none() {
            return Err("Mapper enabled without a destination".into());
        }

        Ok(())
    }

    /// Requested record fields.
    pub fn data_fields(&self) -> DataFields {
        let mut fields = DataFields::empty();
        fields.set(DataFields::POSITION, self.data.position);
        fields.set(DataFields::EULER, self.data.euler);
        fields.set(DataFields::TIMESTAMP, self.data.timestamp);
        fields
    }

    pub fn float_format(&self) -> FloatFormat {
        if self.output.hex {
            FloatFormat::Hex
        } else {
            FloatFormat::Decimal
        }
    }

    pub fn acquisition_mode(&self) -> AcquisitionMode {
        match self.device.poll_period_ms {
            Some(ms) => AcquisitionMode::Poll {
                period: Duration::from_secs_f64(ms.max(0.0) / 1000.0),
            },
            None => AcquisitionMode::Continuous,
        }
    }

    /// Settings for the acquisition loop. Runs [`validate`](Self::validate).
    pub fn acquisition_settings(&self) -> RelayResult<AcquisitionSettings> {
        self.validate().map_err(RelayError::Configuration)?;
        let rate = SampleRate::from_hz(self.device.rate_hz).ok_or_else(|| {
            RelayError::Configuration(format!("Invalid rate_hz {}", self.device.rate_hz))
        })?;

        Ok(AcquisitionSettings {
            device_name: self.device.name.clone(),
            daemon: self.device.daemon,
            reset: self.device.reset,
            mode: self.acquisition_mode(),
            fields: self.data_fields(),
            rate,
            retry_delay: Duration::from_millis(self.device.retry_delay_ms),
            drain_timeout: Duration::from_millis(self.device.drain_timeout_ms),
            max_drain_reads: self.device.max_drain_reads,
        })
    }
}
