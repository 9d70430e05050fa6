//! Per-field messages to the remote destination.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::SinkError;
use crate::fanout::RecordSink;
use crate::hardware::{DataFields, Record};
use crate::network::{Message, MessageArg, MessageTransport};
use crate::run_state::RunState;

const POSITION_NAMES: [&str; 3] = ["x", "y", "z"];
const EULER_NAMES: [&str; 3] = ["azimuth", "elevation", "roll"];

/// Messages carrying one record, under `namespace/marker/<station>/`.
pub fn record_messages(namespace: &str, record: &Record) -> Vec<Message> {
    let base = format!("{}/marker/{}", namespace.trim_end_matches('/'), record.station);
    let mut messages = Vec::with_capacity(8);

    if record.fields.contains(DataFields::POSITION) {
        for (name, value) in POSITION_NAMES.iter().zip(record.position) {
            messages.push(Message::new(format!("{base}/{name}")).arg(MessageArg::Float(value)));
        }
    }
    if record.fields.contains(DataFields::EULER) {
        for (name, value) in EULER_NAMES.iter().zip(record.euler) {
            messages.push(Message::new(format!("{base}/{name}")).arg(MessageArg::Float(value)));
        }
    }
    if record.fields.contains(DataFields::TIMESTAMP) {
        messages.push(
            Message::new(format!("{base}/timestamp"))
                .arg(MessageArg::Long(i64::from(record.timestamp))),
        );
    }
    messages.push(
        Message::new(format!("{base}/readtime")).arg(MessageArg::Double(record.read_time_ms())),
    );
    messages
}

/// Sends each record to whatever remote is set when it is published.
pub struct RemoteSink {
    state: Arc<RunState>,
    transport: Arc<dyn MessageTransport>,
    namespace: String,
}

impl RemoteSink {
    pub fn new(
        state: Arc<RunState>,
        transport: Arc<dyn MessageTransport>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            state,
            transport,
            namespace: namespace.into(),
        }
    }
}

#[async_trait]
impl RecordSink for RemoteSink {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn is_active(&self) -> bool {
        self.state.has_remote()
    }

    async fn publish(&mut self, record: &Record) -> Result<(), SinkError> {
        let Some(dest) = self.state.remote() else {
            return Ok(());
        };

        let mut first_error = None;
        for message in record_messages(&self.namespace, record) {
            if let Err(e) = self.transport.send(&dest, &message).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_for_all_fields() {
        let record = Record::new(2)
            .with_position([1.0, 2.0, 3.0])
            .with_euler([4.0, 5.0, 6.0])
            .with_timestamp(99);
        let paths: Vec<String> = record_messages("/liberty", &record)
            .into_iter()
            .map(|m| m.path)
            .collect();
        assert_eq!(
            paths,
            vec![
                "/liberty/marker/2/x",
                "/liberty/marker/2/y",
                "/liberty/marker/2/z",
                "/liberty/marker/2/azimuth",
                "/liberty/marker/2/elevation",
                "/liberty/marker/2/roll",
                "/liberty/marker/2/timestamp",
                "/liberty/marker/2/readtime",
            ]
        );
    }

    #[test]
    fn test_argument_types() {
        let record = Record::new(0).with_euler([4.0, 5.0, 6.0]).with_timestamp(7);
        let messages = record_messages("/liberty/", &record);
        let signatures: Vec<String> = messages.iter().map(Message::type_signature).collect();
        assert_eq!(signatures, vec!["f", "f", "f", "h", "d"]);
        assert_eq!(messages[3].args, vec![MessageArg::Long(7)]);
    }
}
