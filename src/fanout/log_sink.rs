//! Text log of every record, to stdout or a file.
//!
//! One line per record:
//!
//! ```text
//! station[, x, y, z][, azimuth, elevation, roll][, timestamp], readtime
//! ```
//!
//! Float values are printed either with four decimals or as `0x` followed by
//! the eight hex digits of the IEEE-754 bit pattern, most significant byte
//! first. The read time is milliseconds since the Unix epoch.

use async_trait::async_trait;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::{info, warn};

use crate::error::SinkError;
use crate::fanout::RecordSink;
use crate::hardware::{DataFields, Record};

/// How float values are rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FloatFormat {
    #[default]
    Decimal,
    Hex,
}

/// Render one float value.
pub fn format_float(value: f32, format: FloatFormat) -> String {
    match format {
        FloatFormat::Decimal => format!("{value:.4}"),
        FloatFormat::Hex => format!("0x{:08x}", value.to_bits()),
    }
}

/// Inverse of the hex rendering.
pub fn parse_hex_float(text: &str) -> Option<f32> {
    let digits = text.strip_prefix("0x")?;
    if digits.len() != 8 {
        return None;
    }
    u32::from_str_radix(digits, 16).ok().map(f32::from_bits)
}

/// Render one record as a log line, without the trailing newline.
pub fn format_record(record: &Record, format: FloatFormat) -> String {
    let mut parts = vec![record.station.to_string()];
    if record.fields.contains(DataFields::POSITION) {
        parts.extend(record.position.iter().map(|v| format_float(*v, format)));
    }
    if record.fields.contains(DataFields::EULER) {
        parts.extend(record.euler.iter().map(|v| format_float(*v, format)));
    }
    if record.fields.contains(DataFields::TIMESTAMP) {
        parts.push(record.timestamp.to_string());
    }
    parts.push(format!("{:.6}", record.read_time_ms()));
    parts.join(", ")
}

/// Sink writing [`format_record`] lines.
pub struct LogSink {
    writer: Box<dyn Write + Send + Sync>,
    format: FloatFormat,
}

impl LogSink {
    /// Log to standard output.
    pub fn stdout(format: FloatFormat) -> Self {
        Self::from_writer(Box::new(io::stdout()), format)
    }

    /// Log to a newly created (truncated) file.
    pub fn create(path: impl AsRef<Path>, format: FloatFormat) -> io::Result<Self> {
        let path = path.as_ref();
        let file = File::create(path)?;
        info!("Logging records to {}", path.display());
        Ok(Self::from_writer(Box::new(BufWriter::new(file)), format))
    }

    pub fn from_writer(writer: Box<dyn Write + Send + Sync>, format: FloatFormat) -> Self {
        Self { writer, format }
    }
}

#[async_trait]
impl RecordSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn publish(&mut self, record: &Record) -> Result<(), SinkError> {
        writeln!(self.writer, "{}", format_record(record, self.format))?;
        Ok(())
    }

    async fn end_pass(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }

    async fn teardown(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!(sink = "log", "Final flush failed: {}", e);
        }
    }
}
