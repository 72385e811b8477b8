//! Wire protocol spoken between peers and the relay
//!
//! Every frame on the signaling WebSocket is one JSON object tagged by an
//! `event` field. The relay never looks inside `sending-signal` payloads;
//! `data` is carried as an opaque string end to end.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Identity assigned to a client by the relay for one transport session
pub type ClientId = String;

/// Events sent from a client to the relay
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientRequest {
    /// Ask the matchmaker for a room
    ///
    /// Naming a room selects the fixed-room policy; omitting it asks for
    /// pairwise mesh matchmaking.
    CreateOrJoin {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        room: Option<String>,
    },

    /// Tell the other members of `room` to begin peer setup
    InitiatePeer { room: String },

    /// Forward an opaque signaling payload to the other members of `room`
    SendingSignal { room: String, data: String },

    /// Broadcast an application message to every other connected client
    Message { payload: serde_json::Value },

    /// Ask the relay for its host's LAN address
    #[serde(rename = "ipaddr")]
    IpAddress,

    /// Leave every room and end the session
    Hangup,
}

/// Events sent from the relay to a client
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerEvent {
    /// Session identity assignment, sent once immediately after connect
    Welcome { client_id: ClientId },

    /// The requester created `room` and is its sole member
    Created { room: String, client_id: ClientId },

    /// The requester was added to `room` as a non-initiating member
    Joined { room: String, client_id: ClientId },

    /// Another client was added to a room this client is already in
    Join { room: String },

    /// The named room is at capacity; no membership change was made
    Full { room: String },

    /// The room has a full complement of members; signaling may begin
    Ready { room: String },

    /// A room member asked everyone else to begin peer setup
    InitiatePeer { room: String },

    /// Opaque signaling payload forwarded from another room member
    SendingSignal { room: String, data: String },

    /// Relay-side diagnostic lines
    Log { entries: Vec<String> },

    /// Application broadcast from another client
    Message { payload: serde_json::Value },

    /// A LAN address of the relay host
    #[serde(rename = "ipaddr")]
    IpAddress { address: String },
}

impl ClientRequest {
    /// Convert the request to a JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::SerializationError(format!("Failed to serialize request: {}", e)))
    }

    /// Parse a request from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::SerializationError(format!("Failed to deserialize request: {}", e)))
    }
}

impl ServerEvent {
    /// Convert the event to a JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| Error::SerializationError(format!("Failed to serialize event: {}", e)))
    }

    /// Parse an event from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::SerializationError(format!("Failed to deserialize event: {}", e)))
    }

    /// Get the wire name of the event
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerEvent::Welcome { .. } => "welcome",
            ServerEvent::Created { .. } => "created",
            ServerEvent::Joined { .. } => "joined",
            ServerEvent::Join { .. } => "join",
            ServerEvent::Full { .. } => "full",
            ServerEvent::Ready { .. } => "ready",
            ServerEvent::InitiatePeer { .. } => "initiate-peer",
            ServerEvent::SendingSignal { .. } => "sending-signal",
            ServerEvent::Log { .. } => "log",
            ServerEvent::Message { .. } => "message",
            ServerEvent::IpAddress { .. } => "ipaddr",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_or_join_round_trip() {
        let anonymous = ClientRequest::CreateOrJoin { room: None };
        let named = ClientRequest::CreateOrJoin {
            room: Some("studio".to_string()),
        };

        for msg in [anonymous, named] {
            let json = msg.to_json().unwrap();
            assert_eq!(ClientRequest::from_json(&json).unwrap(), msg);
        }
    }

    #[test]
    fn test_anonymous_request_omits_room() {
        let json = ClientRequest::CreateOrJoin { room: None }.to_json().unwrap();
        assert_eq!(json, r#"{"event":"create-or-join"}"#);
    }

    #[test]
    fn test_event_tag_names() {
        let json = ClientRequest::SendingSignal {
            room: "room0".to_string(),
            data: "{\"type\":\"offer\"}".to_string(),
        }
        .to_json()
        .unwrap();
        assert!(json.contains(r#""event":"sending-signal""#));

        let json = ServerEvent::InitiatePeer {
            room: "room0".to_string(),
        }
        .to_json()
        .unwrap();
        assert!(json.contains(r#""event":"initiate-peer""#));
    }

    #[test]
    fn test_client_id_field_is_camel_case() {
        let json = ServerEvent::Created {
            room: "room0".to_string(),
            client_id: "abc".to_string(),
        }
        .to_json()
        .unwrap();
        assert!(json.contains(r#""clientId":"abc""#));
    }

    #[test]
    fn test_signal_payload_is_opaque() {
        // The relay must be able to round-trip a payload it cannot parse.
        let garbage = "\u{1}not json at all\u{2}";
        let msg = ServerEvent::SendingSignal {
            room: "room0".to_string(),
            data: garbage.to_string(),
        };
        let json = msg.to_json().unwrap();
        match ServerEvent::from_json(&json).unwrap() {
            ServerEvent::SendingSignal { data, .. } => assert_eq!(data, garbage),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_welcome_round_trip() {
        let msg = ServerEvent::Welcome {
            client_id: "b37a9cc1".to_string(),
        };
        let json = msg.to_json().unwrap();
        assert_eq!(ServerEvent::from_json(&json).unwrap(), msg);
        assert_eq!(msg.event_name(), "welcome");
    }

    #[test]
    fn test_rejects_unknown_event() {
        assert!(ServerEvent::from_json(r#"{"event":"teleport"}"#).is_err());
    }
}
