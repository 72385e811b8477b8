//! Rendezvous relay and peer-to-peer connection lifecycle
//!
//! LiveMesh lets two or more clients discover each other through a
//! lightweight signaling relay and establish direct peer-to-peer data/media
//! channels. The relay only brokers rooms and forwards opaque signaling
//! payloads; once a pair of peers is connected, data flows directly between
//! them.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  Application                                         │
//! │  ↓ connect() / send() / callbacks                    │
//! │  PeerClient                                          │
//! │  ├─ SignalTransport (JSON events over WebSocket)     │
//! │  ├─ ConnectionRegistry (one entry per room)          │
//! │  │   └─ PeerSession (webrtc offer/answer + data)     │
//! │  └─ DataEnvelope / Roster (identity-tagged payloads) │
//! │     ↕ (handshake only)                               │
//! │  SignalingServer (room matchmaking + forwarding)     │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use livemesh::{ClientConfig, PeerClient};
//!
//! # async fn example() -> livemesh::Result<()> {
//! let client = PeerClient::new(ClientConfig::default()).await?;
//! client.on_data(|payload, user_id| {
//!     println!("{} sent {}", user_id, payload);
//! });
//! client.connect();
//! client.send(&serde_json::json!({ "x": 1, "y": 2 })).await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod data;
pub mod error;
pub mod peer;
pub mod signaling;

// Re-exports for the public API surface
pub use client::PeerClient;
pub use config::{ClientConfig, PeerOptions, RelayConfig, TurnServerConfig};
pub use data::{DataEnvelope, Roster, RosterEntry};
pub use error::{Error, Result};
pub use peer::{ConnectionRegistry, ConnectionState};
pub use signaling::server::{SignalingServer, SignalingServerHandle};
pub use signaling::{ClientId, ClientRequest, ServerEvent, SignalTransport};

/// Get the version of this crate
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }
}
