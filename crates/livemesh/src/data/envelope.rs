//! Application message envelope
//!
//! Everything on the peer data channel is one UTF-8 JSON object carrying the
//! caller's payload and the sender's identity: `{"data": ..., "userId": "..."}`.

use crate::signaling::protocol::ClientId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// One data-plane message: an application payload tagged with its sender
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataEnvelope {
    /// Application payload, any JSON value
    pub data: serde_json::Value,

    /// Sender identity, as assigned by the relay
    #[serde(rename = "userId")]
    pub user_id: ClientId,
}

impl DataEnvelope {
    /// Wrap a payload with the sender's identity
    pub fn new(data: serde_json::Value, user_id: ClientId) -> Self {
        Self { data, user_id }
    }

    /// Serialize to the wire form
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::SerializationError(format!("Failed to encode envelope: {}", e)))
    }

    /// Decode from raw data-channel bytes
    ///
    /// A payload that is not UTF-8 JSON is an error for this message alone;
    /// callers drop it and keep going.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::SerializationError(format!("Envelope is not UTF-8: {}", e)))?;
        serde_json::from_str(text)
            .map_err(|e| Error::SerializationError(format!("Failed to decode envelope: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_round_trip_preserves_payload_and_sender() {
        let envelope = DataEnvelope::new(json!({"x": 1, "y": 2}), "sender-a".to_string());
        let encoded = envelope.encode().unwrap();
        let decoded = DataEnvelope::decode(encoded.as_bytes()).unwrap();
        assert_eq!(decoded, envelope);
        assert_eq!(decoded.data, json!({"x": 1, "y": 2}));
        assert_eq!(decoded.user_id, "sender-a");
    }

    #[test]
    fn test_wire_field_is_user_id_camel_case() {
        let envelope = DataEnvelope::new(json!(42), "abc".to_string());
        let encoded = envelope.encode().unwrap();
        assert!(encoded.contains(r#""userId":"abc""#));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        assert!(DataEnvelope::decode(&[0xff, 0xfe, 0x00]).is_err());
    }

    #[test]
    fn test_decode_rejects_invalid_json() {
        assert!(DataEnvelope::decode(b"{not json").is_err());
    }

    #[test]
    fn test_decode_rejects_missing_sender() {
        assert!(DataEnvelope::decode(br#"{"data": 1}"#).is_err());
    }
}
