//! The `Frame` type.

use serde_json::Value;

use super::codec::LENGTH_PREFIX_LEN;

/// Message type reported when a payload has no readable `type` field.
pub const UNKNOWN_MESSAGE_TYPE: &str = "unknown";

/// One native messaging message, exactly as it appeared on the wire.
///
/// The payload is kept as opaque bytes. It is never re-serialised, so a
/// forwarded frame is byte-for-byte identical to the one that was read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Frame {
    payload: Vec<u8>,
}

impl Frame {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }

    /// Payload size in bytes (the value of the length prefix).
    pub const fn len(&self) -> usize {
        self.payload.len()
    }

    pub const fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Total size on the wire, including the length prefix.
    pub const fn encoded_len(&self) -> usize {
        LENGTH_PREFIX_LEN + self.payload.len()
    }

    /// The `type` field of the JSON payload, for logging.
    ///
    /// Returns [`UNKNOWN_MESSAGE_TYPE`] when the payload is not JSON, is not
    /// an object, or has no string `type` field. Never fails.
    pub fn message_type(&self) -> String {
        serde_json::from_slice::<Value>(&self.payload)
            .ok()
            .and_then(|value| value.get("type")?.as_str().map(String::from))
            .unwrap_or_else(|| UNKNOWN_MESSAGE_TYPE.to_string())
    }
}

impl From<Vec<u8>> for Frame {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

impl From<&[u8]> for Frame {
    fn from(payload: &[u8]) -> Self {
        Self::new(payload)
    }
}
