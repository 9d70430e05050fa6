//! Typed message format.
//!
//! Every message is a path plus a list of typed scalar arguments, in the style
//! of Open Sound Control. Handlers are selected by path and by the type
//! signature, the concatenated type tags of the arguments (`"si"` for a string
//! followed by an int).
//!
//! # Wire Format
//!
//! One message per UDP datagram, encoded as JSON:
//!
//! ```text
//! {"path":"/liberty/start","args":[{"type":"s","value":"10.0.0.5"},{"type":"i","value":9000}]}
//! ```
//!
//! | Tag | Type |
//! |-----|------|
//! | `i` | 32-bit int |
//! | `h` | 64-bit int |
//! | `f` | 32-bit float |
//! | `d` | 64-bit float |
//! | `s` | string |

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Largest datagram the listener accepts.
pub const MAX_DATAGRAM_SIZE: usize = 8192;

/// One typed message argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum MessageArg {
    #[serde(rename = "i")]
    Int(i32),
    #[serde(rename = "h")]
    Long(i64),
    #[serde(rename = "f")]
    Float(f32),
    #[serde(rename = "d")]
    Double(f64),
    #[serde(rename = "s")]
    Str(String),
}

impl MessageArg {
    /// Single-character type tag.
    pub fn type_tag(&self) -> char {
        match self {
            MessageArg::Int(_) => 'i',
            MessageArg::Long(_) => 'h',
            MessageArg::Float(_) => 'f',
            MessageArg::Double(_) => 'd',
            MessageArg::Str(_) => 's',
        }
    }

    /// Integer value, if this is an `i` argument.
    pub fn as_int(&self) -> Option<i32> {
        match self {
            MessageArg::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// String value, if this is an `s` argument.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MessageArg::Str(v) => Some(v),
            _ => None,
        }
    }
}

/// A path with typed arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub path: String,
    #[serde(default)]
    pub args: Vec<MessageArg>,
}

impl Message {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            args: Vec::new(),
        }
    }

    /// Append an argument.
    pub fn arg(mut self, arg: MessageArg) -> Self {
        self.args.push(arg);
        self
    }

    /// Concatenated type tags, e.g. `"si"`.
    pub fn type_signature(&self) -> String {
        self.args.iter().map(MessageArg::type_tag).collect()
    }

    pub fn encode(&self) -> Result<Vec<u8>, TransportError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TransportError> {
        let message: Message =
            serde_json::from_slice(bytes).map_err(|e| TransportError::Decode(e.to_string()))?;
        if !message.path.starts_with('/') {
            return Err(TransportError::Decode(format!(
                "path '{}' does not start with '/'",
                message.path
            )));
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_signature() {
        let msg = Message::new("/liberty/start")
            .arg(MessageArg::Str("localhost".into()))
            .arg(MessageArg::Int(9000));
        assert_eq!(msg.type_signature(), "si");
        assert_eq!(Message::new("/liberty/stop").type_signature(), "");
    }

    #[test]
    fn test_decode_wire_example() {
        let raw = br#"{"path":"/liberty/status","args":[{"type":"i","value":7000}]}"#;
        let msg = Message::decode(raw).unwrap();
        assert_eq!(msg.path, "/liberty/status");
        assert_eq!(msg.args, vec![MessageArg::Int(7000)]);
    }

    #[test]
    fn test_decode_without_args() {
        let msg = Message::decode(br#"{"path":"/liberty/stop"}"#).unwrap();
        assert!(msg.args.is_empty());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(Message::decode(b"not json").is_err());
        assert!(Message::decode(br#"{"path":"liberty/stop"}"#).is_err());
        assert!(Message::decode(br#"{"path":"/x","args":[{"type":"q","value":1}]}"#).is_err());
    }

    #[test]
    fn test_encoded_tags() {
        let msg = Message::new("/m").arg(MessageArg::Double(1.5));
        let text = String::from_utf8(msg.encode().unwrap()).unwrap();
        assert!(text.contains(r#""type":"d""#));
    }
}
