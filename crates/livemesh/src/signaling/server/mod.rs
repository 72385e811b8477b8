//! Relay-side signaling: room matchmaking and opaque signal forwarding
//!
//! The relay brokers room membership and forwards signaling payloads between
//! room members. Once a pair of peers is connected, the relay is out of the
//! data path for that pair.

mod handler;
mod rooms;
mod server;

pub use handler::SharedState;
pub use rooms::{Placement, Room, RoomTable};
pub use server::{SignalingServer, SignalingServerHandle};
