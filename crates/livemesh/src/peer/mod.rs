//! Client-side peer connections: sessions and the per-room registry

mod connection;
mod registry;

pub use connection::{PeerEvent, PeerSession};
pub use registry::{Connection, ConnectionRegistry, ConnectionState};
