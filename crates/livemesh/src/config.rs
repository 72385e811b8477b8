//! Configuration types for the relay and the peer client

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Configuration for a [`PeerClient`](crate::client::PeerClient)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay WebSocket URL (ws:// or wss://)
    pub relay_url: String,

    /// Room to request on connect. Naming a room selects the fixed-room
    /// policy; `None` asks the relay for pairwise mesh matchmaking.
    pub room: Option<String>,

    /// Options passed through to every peer connection this client opens
    pub peer: PeerOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:8081".to_string(),
            room: None,
            peer: PeerOptions::default(),
        }
    }
}

impl ClientConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !self.relay_url.starts_with("ws://") && !self.relay_url.starts_with("wss://") {
            return Err(Error::InvalidConfig(format!(
                "relay_url must be a ws:// or wss:// URL, got {}",
                self.relay_url
            )));
        }
        if let Some(room) = &self.room {
            if room.is_empty() {
                return Err(Error::InvalidConfig(
                    "room name must not be empty when set".to_string(),
                ));
            }
        }
        self.peer.validate()
    }
}

/// Options for the underlying peer connections
///
/// The former free-form options bag is pinned down to named fields; anything
/// the peer-connection library needs beyond these is derived internally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerOptions {
    /// STUN server URLs
    pub stun_servers: Vec<String>,

    /// TURN server configurations (optional)
    pub turn_servers: Vec<TurnServerConfig>,

    /// Label assigned to the peer-to-peer data channel
    pub data_channel_label: String,
}

impl Default for PeerOptions {
    fn default() -> Self {
        Self {
            stun_servers: vec!["stun:stun.l.google.com:19302".to_string()],
            turn_servers: Vec::new(),
            data_channel_label: "livemesh".to_string(),
        }
    }
}

impl PeerOptions {
    /// Validate the options
    pub fn validate(&self) -> Result<()> {
        for url in &self.stun_servers {
            if !url.starts_with("stun:") {
                return Err(Error::InvalidConfig(format!(
                    "STUN server URL must start with stun:, got {}",
                    url
                )));
            }
        }
        for turn in &self.turn_servers {
            if !turn.url.starts_with("turn:") && !turn.url.starts_with("turns:") {
                return Err(Error::InvalidConfig(format!(
                    "TURN server URL must start with turn: or turns:, got {}",
                    turn.url
                )));
            }
        }
        if self.data_channel_label.is_empty() {
            return Err(Error::InvalidConfig(
                "data_channel_label must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// TURN server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnServerConfig {
    /// TURN server URL (turn:// or turns://)
    pub url: String,

    /// Username for TURN authentication
    pub username: String,

    /// Credential for TURN authentication
    pub credential: String,
}

/// Configuration for the signaling relay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Address the relay listens on
    pub bind_addr: String,

    /// Maximum number of clients per room
    pub room_capacity: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8081".to_string(),
            room_capacity: 2,
        }
    }
}

impl RelayConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.bind_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::InvalidConfig(format!(
                "bind_addr is not a valid socket address: {}",
                self.bind_addr
            )));
        }
        if self.room_capacity < 2 {
            return Err(Error::InvalidConfig(format!(
                "room_capacity must be at least 2, got {}",
                self.room_capacity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_client_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.room.is_none());
    }

    #[test]
    fn test_rejects_non_websocket_url() {
        let config = ClientConfig {
            relay_url: "http://localhost:8081".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_room_name() {
        let config = ClientConfig {
            room: Some(String::new()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_stun_url() {
        let mut options = PeerOptions::default();
        options.stun_servers.push("https://example.com".to_string());
        assert!(options.validate().is_err());
    }

    #[test]
    fn test_default_relay_config_is_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.room_capacity, 2);
    }

    #[test]
    fn test_rejects_undersized_room() {
        let config = RelayConfig {
            room_capacity: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
