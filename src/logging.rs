//! Diagnostic logging
//!
//! Sets up `tracing-subscriber` for the relay. Diagnostics always go to
//! stderr: stdout is reserved for the record log when `--output` has no path.
//!
//! Without `RUST_LOG`, the configured level applies to this crate and other
//! crates are held at `warn`.
//!
//! # Example
//! ```no_run
//! use tracker_relay::{config::RelayConfig, logging};
//! use tracing::info;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RelayConfig::load()?;
//! logging::init_from_config(&config)?;
//! info!("Relay started");
//! # Ok(())
//! # }
//! ```

use std::io;
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::RelayConfig;

/// Diagnostic line layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Multi-line, colored
    #[default]
    Pretty,
    /// One line per event
    Compact,
    /// One JSON object per event
    Json,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(format: &str) -> Result<Self, Self::Err> {
        match format.to_lowercase().as_str() {
            "pretty" => Ok(OutputFormat::Pretty),
            "compact" => Ok(OutputFormat::Compact),
            "json" => Ok(OutputFormat::Json),
            _ => Err(format!(
                "Invalid log format '{}'. Must be one of: pretty, compact, json",
                format
            )),
        }
    }
}

/// Subscriber options
#[derive(Debug, Clone)]
pub struct TracingConfig {
    /// Level for this crate's events
    pub level: Level,
    pub format: OutputFormat,
    /// Print source file and line
    pub with_source: bool,
    /// Print the event target (module path)
    pub with_target: bool,
    /// ANSI colors; ignored for JSON
    pub with_ansi: bool,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            format: OutputFormat::default(),
            with_source: false,
            with_target: true,
            with_ansi: true,
        }
    }
}

impl TracingConfig {
    pub fn new(level: Level) -> Self {
        Self {
            level,
            ..Default::default()
        }
    }

    /// Options from the `[application]` section.
    pub fn from_relay_config(config: &RelayConfig) -> Result<Self, String> {
        Ok(Self {
            level: parse_log_level(&config.application.log_level)?,
            format: config.application.log_format.parse()?,
            ..Default::default()
        })
    }

    pub fn with_format(mut self, format: OutputFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_source(mut self, enabled: bool) -> Self {
        self.with_source = enabled;
        self
    }

    pub fn with_ansi(mut self, enabled: bool) -> Self {
        self.with_ansi = enabled;
        self
    }

    /// Filter used when `RUST_LOG` is unset.
    pub fn default_directives(&self) -> String {
        format!(
            "warn,{}={}",
            env!("CARGO_CRATE_NAME"),
            self.level.as_str().to_lowercase()
        )
    }
}

/// Install the global subscriber described by the relay configuration.
pub fn init_from_config(config: &RelayConfig) -> Result<(), String> {
    init(TracingConfig::from_relay_config(config)?)
}

/// Install the global subscriber.
///
/// Does nothing if a subscriber is already installed, so tests and host
/// binaries may call it freely.
pub fn init(config: TracingConfig) -> Result<(), String> {
    if tracing::dispatcher::has_been_set() {
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_directives()));

    let layer = fmt::layer()
        .with_writer(io::stderr)
        .with_target(config.with_target)
        .with_file(config.with_source)
        .with_line_number(config.with_source);

    let layer = match config.format {
        OutputFormat::Pretty => layer.pretty().with_ansi(config.with_ansi).boxed(),
        OutputFormat::Compact => layer.compact().with_ansi(config.with_ansi).boxed(),
        OutputFormat::Json => layer.json().with_ansi(false).boxed(),
    };

    tracing_subscriber::registry()
        .with(layer.with_filter(filter))
        .try_init()
        .map_err(|e| format!("Failed to initialize tracing: {}", e))
}

/// Parse a level name, case-insensitively.
pub fn parse_log_level(level: &str) -> Result<Level, String> {
    Level::from_str(level).map_err(|_| {
        format!(
            "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
            level
        )
    })
}
