//! Signaling: the wire protocol, the client transport, and the relay
//!
//! Signaling only matters during the handshake. Once two peers are
//! connected, data flows directly between them and the relay is idle for
//! that pair.

pub mod protocol;
pub mod server;
pub mod transport;

pub use protocol::{ClientId, ClientRequest, ServerEvent};
pub use transport::SignalTransport;
