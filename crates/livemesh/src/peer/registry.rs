//! Registry of per-room connections
//!
//! One [`Connection`] tracks the lifecycle of one room the client occupies,
//! from matchmaking through signaling to the established session. The
//! registry is the only owner of that state: event handlers and API calls
//! both go through [`ConnectionRegistry::find_or_create`], so two code paths
//! can never race a duplicate entry for the same room into existence.

use super::connection::PeerSession;
use crate::{Error, Result};
use std::sync::Arc;

/// Lifecycle of one per-room connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// The room is known but has no partner yet
    RoomPending,
    /// A partner is present; peer setup may begin
    RoomReady,
    /// A peer session exists and the handshake is underway
    Signaling,
    /// The data channel is open
    Connected,
    /// The session ended; the entry is never reused
    Closed,
    /// The session failed; the entry is never reused
    Failed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::RoomPending => write!(f, "room-pending"),
            ConnectionState::RoomReady => write!(f, "room-ready"),
            ConnectionState::Signaling => write!(f, "signaling"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Closed => write!(f, "closed"),
            ConnectionState::Failed => write!(f, "failed"),
        }
    }
}

/// One tracked room and its (eventual) peer session
#[derive(Debug)]
pub struct Connection {
    room: String,
    is_initiator: bool,
    room_ready: bool,
    peer_started: bool,
    state: ConnectionState,
    peer: Option<Arc<PeerSession>>,
}

impl Connection {
    fn new(room: &str) -> Self {
        Self {
            room: room.to_string(),
            is_initiator: false,
            room_ready: false,
            peer_started: false,
            state: ConnectionState::RoomPending,
            peer: None,
        }
    }

    /// Room this entry tracks
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Whether this side creates the offer
    pub fn is_initiator(&self) -> bool {
        self.is_initiator
    }

    /// Whether the room has its full complement of members
    pub fn room_ready(&self) -> bool {
        self.room_ready
    }

    /// Whether a peer session was ever started for this entry
    ///
    /// Flips true when signaling begins, not when the session connects;
    /// readiness checks ask "is a handshake underway", deliberately.
    pub fn peer_started(&self) -> bool {
        self.peer_started
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// The peer session, once started
    pub fn peer(&self) -> Option<Arc<PeerSession>> {
        self.peer.clone()
    }

    fn is_terminal(&self) -> bool {
        matches!(self.state, ConnectionState::Closed | ConnectionState::Failed)
    }

    /// Mark this side as the initiator (set on `created`, and only there)
    pub fn mark_initiator(&mut self) {
        self.is_initiator = true;
    }

    /// Record that the room has a partner
    pub fn mark_room_ready(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.room_ready = true;
        if self.state == ConnectionState::RoomPending {
            self.state = ConnectionState::RoomReady;
        }
    }

    /// Attach the peer session and enter `Signaling`
    ///
    /// `peer_started` transitions false to true exactly once; a second start
    /// is a state error, never a silent replacement.
    pub fn start_peer(&mut self, peer: Arc<PeerSession>) -> Result<()> {
        if self.peer_started {
            return Err(Error::PeerConnectionError(format!(
                "Peer already started for room {}",
                self.room
            )));
        }
        if self.is_terminal() {
            return Err(Error::PeerConnectionError(format!(
                "Connection for room {} is {}",
                self.room, self.state
            )));
        }
        self.peer_started = true;
        self.peer = Some(peer);
        self.state = ConnectionState::Signaling;
        Ok(())
    }

    /// Enter `Connected` (data channel open)
    pub fn mark_connected(&mut self) {
        if !self.is_terminal() {
            self.state = ConnectionState::Connected;
        }
    }

    /// Enter `Closed` and release the peer session
    ///
    /// Returns the session so the caller can close it. Idempotent: a second
    /// close yields nothing.
    pub fn mark_closed(&mut self) -> Option<Arc<PeerSession>> {
        if self.is_terminal() {
            return None;
        }
        self.state = ConnectionState::Closed;
        self.peer.take()
    }

    /// Enter `Failed` and release the peer session
    pub fn mark_failed(&mut self) -> Option<Arc<PeerSession>> {
        if self.is_terminal() {
            return None;
        }
        self.state = ConnectionState::Failed;
        self.peer.take()
    }
}

/// All connections of one client, in registration order
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: Vec<Connection>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up the entry for `room`, creating it if unknown
    ///
    /// The single entry point for insertion; idempotent per room id.
    pub fn find_or_create(&mut self, room: &str) -> &mut Connection {
        if let Some(idx) = self.connections.iter().position(|c| c.room == room) {
            return &mut self.connections[idx];
        }
        self.connections.push(Connection::new(room));
        let idx = self.connections.len() - 1;
        &mut self.connections[idx]
    }

    /// The entry for `room`, if any
    pub fn get(&self, room: &str) -> Option<&Connection> {
        self.connections.iter().find(|c| c.room == room)
    }

    /// The mutable entry for `room`, if any
    pub fn get_mut(&mut self, room: &str) -> Option<&mut Connection> {
        self.connections.iter_mut().find(|c| c.room == room)
    }

    /// Iterate entries in registration order
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    /// Iterate entries mutably in registration order
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Connection> {
        self.connections.iter_mut()
    }

    /// Whether signaling has begun on every tracked connection
    ///
    /// The AND over the roster: one pending entry makes the whole client
    /// not-started. An empty registry is not started.
    pub fn is_peer_started(&self) -> bool {
        !self.connections.is_empty() && self.connections.iter().all(|c| c.peer_started)
    }

    /// Peer sessions of every entry currently in `Connected`
    pub fn connected_peers(&self) -> Vec<Arc<PeerSession>> {
        self.connections
            .iter()
            .filter(|c| c.state == ConnectionState::Connected)
            .filter_map(|c| c.peer.clone())
            .collect()
    }

    /// Close every entry, returning the released peer sessions
    pub fn close_all(&mut self) -> Vec<Arc<PeerSession>> {
        self.connections
            .iter_mut()
            .filter_map(|c| c.mark_closed())
            .collect()
    }

    /// Number of tracked rooms
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether no rooms are tracked
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
