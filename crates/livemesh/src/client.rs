//! Peer client: the application-facing surface
//!
//! A [`PeerClient`] connects to the relay, asks the matchmaker for a room,
//! and from then on reacts to events: relay events drive the connection
//! registry, peer-session events drive callbacks and the data plane. All
//! state transitions run on one event-loop task, one event at a time; the
//! public API only queues work or reads state.

use crate::config::{ClientConfig, PeerOptions};
use crate::data::DataEnvelope;
use crate::peer::{ConnectionRegistry, ConnectionState, PeerEvent, PeerSession};
use crate::signaling::protocol::{ClientId, ClientRequest, ServerEvent};
use crate::signaling::transport::SignalTransport;
use crate::{Error, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, info, warn};
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

type ConnectHandler = Box<dyn Fn() + Send + Sync>;
type DataHandler = Box<dyn Fn(serde_json::Value, ClientId) + Send + Sync>;
type StreamHandler = Box<dyn Fn(Arc<TrackRemote>) + Send + Sync>;
type CloseHandler = Box<dyn Fn() + Send + Sync>;
type ErrorHandler = Box<dyn Fn(Error) + Send + Sync>;

/// At most one handler per event kind; firing an unset handler is a no-op.
#[derive(Default)]
struct Callbacks {
    connect: std::sync::Mutex<Option<ConnectHandler>>,
    data: std::sync::Mutex<Option<DataHandler>>,
    stream: std::sync::Mutex<Option<StreamHandler>>,
    close: std::sync::Mutex<Option<CloseHandler>>,
    error: std::sync::Mutex<Option<ErrorHandler>>,
}

impl Callbacks {
    fn fire_connect(&self) {
        if let Ok(guard) = self.connect.lock() {
            if let Some(cb) = guard.as_ref() {
                cb();
            }
        }
    }

    fn fire_data(&self, payload: serde_json::Value, user_id: ClientId) {
        if let Ok(guard) = self.data.lock() {
            if let Some(cb) = guard.as_ref() {
                cb(payload, user_id);
            }
        }
    }

    fn fire_stream(&self, track: Arc<TrackRemote>) {
        if let Ok(guard) = self.stream.lock() {
            if let Some(cb) = guard.as_ref() {
                cb(track);
            }
        }
    }

    fn fire_close(&self) {
        if let Ok(guard) = self.close.lock() {
            if let Some(cb) = guard.as_ref() {
                cb();
            }
        }
    }

    fn fire_error(&self, error: Error) {
        match self.error.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(cb) => cb(error),
                // No handler registered: the error is dropped, not raised.
                None => warn!("Unhandled peer error: {}", error),
            },
            Err(_) => warn!("Unhandled peer error: {}", error),
        }
    }
}

enum Command {
    Connect,
    Hangup,
}

/// Client handle for one relay session
///
/// Created connected: the matchmaking request goes out immediately, and the
/// registry fills as the relay assigns rooms. Peer setup begins when
/// [`PeerClient::connect`] is called (or when a remote peer initiates).
pub struct PeerClient {
    transport: SignalTransport,
    registry: Arc<Mutex<ConnectionRegistry>>,
    callbacks: Arc<Callbacks>,
    remote_stream: Arc<RwLock<Option<Arc<TrackRemote>>>>,
    init_requested: Arc<AtomicBool>,
    commands: mpsc::UnboundedSender<Command>,
}

impl PeerClient {
    /// Connect to the relay and request a room
    pub async fn new(config: ClientConfig) -> Result<Self> {
        Self::with_local_track(config, None).await
    }

    /// Connect to the relay with a local media track to share
    ///
    /// The track is added to every peer session this client opens; remote
    /// sides receive it through their `stream` callback.
    pub async fn with_local_track(
        config: ClientConfig,
        local_track: Option<Arc<dyn TrackLocal + Send + Sync>>,
    ) -> Result<Self> {
        config.validate()?;

        let (transport, server_events) = SignalTransport::connect(&config.relay_url).await?;
        transport.send(ClientRequest::CreateOrJoin {
            room: config.room.clone(),
        })?;
        info!(
            "Connected to relay as {}, requested {}",
            transport.client_id(),
            config
                .room
                .as_deref()
                .map(|r| format!("room {}", r))
                .unwrap_or_else(|| "mesh matchmaking".to_string())
        );

        let registry = Arc::new(Mutex::new(ConnectionRegistry::new()));
        let callbacks = Arc::new(Callbacks::default());
        let remote_stream = Arc::new(RwLock::new(None));
        let init_requested = Arc::new(AtomicBool::new(false));
        let (peer_tx, peer_events) = mpsc::unbounded_channel();
        let (command_tx, commands) = mpsc::unbounded_channel();

        let event_loop = EventLoop {
            transport: transport.clone(),
            registry: Arc::clone(&registry),
            callbacks: Arc::clone(&callbacks),
            peer_options: config.peer.clone(),
            local_track,
            remote_stream: Arc::clone(&remote_stream),
            init_requested: Arc::clone(&init_requested),
            peer_tx,
        };
        tokio::spawn(event_loop.run(server_events, peer_events, commands));

        Ok(Self {
            transport,
            registry,
            callbacks,
            remote_stream,
            init_requested,
            commands: command_tx,
        })
    }

    /// Identity the relay assigned to this client
    pub fn client_id(&self) -> &str {
        self.transport.client_id()
    }

    /// Request peer setup on every room the client occupies
    ///
    /// Non-blocking; progress surfaces through the registered callbacks.
    /// Rooms that become ready later start automatically.
    pub fn connect(&self) {
        self.init_requested.store(true, Ordering::SeqCst);
        let _ = self.commands.send(Command::Connect);
    }

    /// Whether signaling has begun on every tracked connection
    ///
    /// False while any room is still waiting on matchmaking or peer start;
    /// false when no room is tracked yet.
    pub async fn is_connection_started(&self) -> bool {
        self.registry.lock().await.is_peer_started()
    }

    /// Broadcast a payload to every connected peer
    ///
    /// The payload is wrapped with this client's identity and written to
    /// each connection in `Connected` state; connections still negotiating
    /// are silently skipped. With zero connected peers this writes nothing
    /// and raises nothing.
    pub async fn send<T: Serialize>(&self, payload: &T) -> Result<()> {
        let data = serde_json::to_value(payload)
            .map_err(|e| Error::SerializationError(format!("Unserializable payload: {}", e)))?;
        let envelope = DataEnvelope::new(data, self.transport.client_id().to_string());
        let text = envelope.encode()?;

        let peers = self.registry.lock().await.connected_peers();
        for peer in peers {
            if let Err(e) = peer.send_text(text.clone()).await {
                // A channel that closed mid-broadcast is that connection's
                // problem; the rest of the roster still gets the message.
                debug!("Skipping peer for {}: {}", peer.room(), e);
            }
        }
        Ok(())
    }

    /// The most recent remote media track, if any peer sent one
    pub async fn get_stream(&self) -> Option<Arc<TrackRemote>> {
        self.remote_stream.read().await.clone()
    }

    /// Close every peer session and end the relay session
    pub fn hangup(&self) {
        let _ = self.commands.send(Command::Hangup);
    }

    /// Register the handler fired when a peer connection is established
    pub fn on_connect(&self, callback: impl Fn() + Send + Sync + 'static) {
        if let Ok(mut guard) = self.callbacks.connect.lock() {
            *guard = Some(Box::new(callback));
        }
    }

    /// Register the handler fired for each received payload and its sender
    pub fn on_data(
        &self,
        callback: impl Fn(serde_json::Value, ClientId) + Send + Sync + 'static,
    ) {
        if let Ok(mut guard) = self.callbacks.data.lock() {
            *guard = Some(Box::new(callback));
        }
    }

    /// Register the handler fired when a remote media track arrives
    pub fn on_stream(&self, callback: impl Fn(Arc<TrackRemote>) + Send + Sync + 'static) {
        if let Ok(mut guard) = self.callbacks.stream.lock() {
            *guard = Some(Box::new(callback));
        }
    }

    /// Register the handler fired when a peer connection closes
    pub fn on_close(&self, callback: impl Fn() + Send + Sync + 'static) {
        if let Ok(mut guard) = self.callbacks.close.lock() {
            *guard = Some(Box::new(callback));
        }
    }

    /// Register the handler fired when a connection fails
    pub fn on_error(&self, callback: impl Fn(Error) + Send + Sync + 'static) {
        if let Ok(mut guard) = self.callbacks.error.lock() {
            *guard = Some(Box::new(callback));
        }
    }
}

impl std::fmt::Debug for PeerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerClient")
            .field("client_id", &self.transport.client_id())
            .finish()
    }
}

/// Owns every state transition; one event at a time, run to completion.
struct EventLoop {
    transport: SignalTransport,
    registry: Arc<Mutex<ConnectionRegistry>>,
    callbacks: Arc<Callbacks>,
    peer_options: PeerOptions,
    local_track: Option<Arc<dyn TrackLocal + Send + Sync>>,
    remote_stream: Arc<RwLock<Option<Arc<TrackRemote>>>>,
    init_requested: Arc<AtomicBool>,
    peer_tx: mpsc::UnboundedSender<(String, PeerEvent)>,
}

impl EventLoop {
    async fn run(
        self,
        mut server_events: mpsc::UnboundedReceiver<ServerEvent>,
        mut peer_events: mpsc::UnboundedReceiver<(String, PeerEvent)>,
        mut commands: mpsc::UnboundedReceiver<Command>,
    ) {
        loop {
            tokio::select! {
                event = server_events.recv() => match event {
                    Some(event) => self.handle_server_event(event).await,
                    None => {
                        self.handle_transport_closed().await;
                        break;
                    }
                },
                Some((room, event)) = peer_events.recv() => {
                    self.handle_peer_event(&room, event).await;
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        // Client handle dropped: tear down quietly.
                        self.close_all_peers().await;
                        break;
                    }
                },
            }
        }
        debug!("Client event loop exited");
    }

    async fn handle_command(&self, command: Command) {
        match command {
            Command::Connect => self.announce_and_start().await,
            Command::Hangup => {
                info!("Hanging up");
                self.close_all_peers().await;
                let _ = self.transport.send(ClientRequest::Hangup);
            }
        }
    }

    async fn handle_server_event(&self, event: ServerEvent) {
        match event {
            ServerEvent::Welcome { .. } => {}
            ServerEvent::Created { room, .. } => {
                debug!("Created room {}", room);
                let mut registry = self.registry.lock().await;
                registry.find_or_create(&room).mark_initiator();
            }
            ServerEvent::Join { room } => {
                debug!("Another peer is joining room {}", room);
                {
                    let mut registry = self.registry.lock().await;
                    registry.find_or_create(&room).mark_room_ready();
                }
                if self.init_requested.load(Ordering::SeqCst) {
                    self.announce_and_start().await;
                }
            }
            ServerEvent::Joined { room, .. } => {
                debug!("Joined room {}", room);
                {
                    let mut registry = self.registry.lock().await;
                    registry.find_or_create(&room).mark_room_ready();
                }
                if self.init_requested.load(Ordering::SeqCst) {
                    self.announce_and_start().await;
                }
            }
            ServerEvent::Ready { room } => {
                debug!("Room {} is ready", room);
            }
            ServerEvent::Full { room } => {
                warn!("Room {} is full", room);
                self.callbacks
                    .fire_error(Error::RoomError(format!("Room {} is full", room)));
            }
            ServerEvent::InitiatePeer { room } => {
                self.try_start(&room).await;
            }
            ServerEvent::SendingSignal { room, data } => {
                self.handle_signal(&room, &data).await;
            }
            ServerEvent::Log { entries } => {
                debug!("{}", entries.join(" "));
            }
            ServerEvent::Message { payload } => {
                debug!("Relay broadcast: {}", payload);
            }
            ServerEvent::IpAddress { address } => {
                debug!("Relay reports address {}", address);
            }
        }
    }

    async fn handle_peer_event(&self, room: &str, event: PeerEvent) {
        match event {
            PeerEvent::Signal(blob) => {
                let request = ClientRequest::SendingSignal {
                    room: room.to_string(),
                    data: blob.to_string(),
                };
                if self.transport.send(request).is_err() {
                    warn!("Transport closed; dropping outbound signal for {}", room);
                }
            }
            PeerEvent::Connect => {
                info!("Peer connected for room {}", room);
                {
                    let mut registry = self.registry.lock().await;
                    if let Some(entry) = registry.get_mut(room) {
                        entry.mark_connected();
                    }
                }
                self.callbacks.fire_connect();
            }
            PeerEvent::Data(bytes) => match DataEnvelope::decode(&bytes) {
                Ok(envelope) => {
                    self.callbacks.fire_data(envelope.data, envelope.user_id);
                }
                Err(e) => {
                    // Bad frame, not a bad connection: drop it and move on.
                    warn!("Dropping undecodable data message for {}: {}", room, e);
                }
            },
            PeerEvent::Stream(track) => {
                *self.remote_stream.write().await = Some(Arc::clone(&track));
                self.callbacks.fire_stream(track);
            }
            PeerEvent::Close => {
                let released = {
                    let mut registry = self.registry.lock().await;
                    registry.get_mut(room).and_then(|entry| entry.mark_closed())
                };
                if let Some(peer) = released {
                    info!("Peer connection closed for room {}", room);
                    tokio::spawn(async move {
                        let _ = peer.close().await;
                    });
                    self.callbacks.fire_close();
                }
            }
            PeerEvent::Error(message) => {
                self.fail_room(room, Error::PeerConnectionError(message)).await;
            }
        }
    }

    /// Announce peer setup for every room and start the initiator sides
    async fn announce_and_start(&self) {
        let rooms: Vec<(String, bool)> = {
            let registry = self.registry.lock().await;
            registry
                .iter()
                .map(|c| (c.room().to_string(), c.is_initiator()))
                .collect()
        };
        for (room, initiator) in rooms {
            let request = ClientRequest::InitiatePeer { room: room.clone() };
            if self.transport.send(request).is_err() {
                warn!("Transport closed while announcing peer start");
                return;
            }
            if initiator {
                self.try_start(&room).await;
            }
        }
    }

    /// Start a peer session if the room is ready and none was started
    async fn try_start(&self, room: &str) {
        let (ready, started, initiator) = {
            let mut registry = self.registry.lock().await;
            let entry = registry.find_or_create(room);
            (entry.room_ready(), entry.peer_started(), entry.is_initiator())
        };
        if started || !ready {
            debug!(
                "Not starting peer for {} (ready={}, started={})",
                room, ready, started
            );
            return;
        }
        self.start_peer(room, initiator).await;
    }

    /// Instantiate a session, attach it to the registry, and kick off the
    /// offer when this side initiates. Returns the session on success.
    async fn start_peer(&self, room: &str, initiator: bool) -> Option<Arc<PeerSession>> {
        let session = match PeerSession::new(
            room,
            initiator,
            &self.peer_options,
            self.local_track.clone(),
            self.peer_tx.clone(),
        )
        .await
        {
            Ok(session) => Arc::new(session),
            Err(e) => {
                self.fail_room(room, e).await;
                return None;
            }
        };

        {
            let mut registry = self.registry.lock().await;
            let entry = registry.find_or_create(room);
            if let Err(e) = entry.start_peer(Arc::clone(&session)) {
                debug!("Discarding duplicate peer for {}: {}", room, e);
                let extra = Arc::clone(&session);
                tokio::spawn(async move {
                    let _ = extra.close().await;
                });
                return entry.peer();
            }
        }

        if initiator {
            if let Err(e) = session.start().await {
                self.fail_room(room, e).await;
                return None;
            }
        }
        Some(session)
    }

    /// Apply one inbound signal, creating the connection first if the signal
    /// beat the matchmaking events here
    async fn handle_signal(&self, room: &str, data: &str) {
        let blob: serde_json::Value = match serde_json::from_str(data) {
            Ok(blob) => blob,
            Err(e) => {
                warn!("Dropping undecodable signal for {}: {}", room, e);
                return;
            }
        };

        let (peer, initiator, state) = {
            let mut registry = self.registry.lock().await;
            let entry = registry.find_or_create(room);
            // An inbound signal implies a partner exists, even if `joined`
            // has not arrived yet.
            entry.mark_room_ready();
            (entry.peer(), entry.is_initiator(), entry.state())
        };
        if matches!(state, ConnectionState::Closed | ConnectionState::Failed) {
            debug!("Ignoring signal for finished room {}", room);
            return;
        }

        let peer = match peer {
            Some(peer) => peer,
            None => match self.start_peer(room, initiator).await {
                Some(peer) => peer,
                None => return,
            },
        };

        if let Err(e) = peer.signal(&blob).await {
            self.fail_room(room, e).await;
        }
    }

    async fn fail_room(&self, room: &str, error: Error) {
        let (was_terminal, released) = {
            let mut registry = self.registry.lock().await;
            let entry = registry.find_or_create(room);
            let was_terminal = matches!(
                entry.state(),
                ConnectionState::Closed | ConnectionState::Failed
            );
            (was_terminal, entry.mark_failed())
        };
        if let Some(peer) = released {
            tokio::spawn(async move {
                let _ = peer.close().await;
            });
        }
        if !was_terminal {
            warn!("Connection for room {} failed: {}", room, error);
            self.callbacks.fire_error(error);
        }
    }

    async fn close_all_peers(&self) {
        let released = self.registry.lock().await.close_all();
        for peer in released {
            tokio::spawn(async move {
                let _ = peer.close().await;
            });
        }
    }

    async fn handle_transport_closed(&self) {
        info!("Signal transport closed");
        let released = self.registry.lock().await.close_all();
        let had_sessions = !released.is_empty();
        for peer in released {
            tokio::spawn(async move {
                let _ = peer.close().await;
            });
        }
        if had_sessions {
            self.callbacks.fire_close();
        }
    }
}
