//! Per-connection relay handler
//!
//! Each accepted WebSocket gets a session identity, a registry entry, and an
//! outbound event queue. All membership mutation goes through the
//! [`RoomTable`] under one lock; the handler only translates placements into
//! wire events.

use super::rooms::{Placement, RoomTable};
use crate::config::RelayConfig;
use crate::signaling::protocol::{ClientId, ClientRequest, ServerEvent};
use crate::Result;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

type EventTx = mpsc::UnboundedSender<ServerEvent>;

/// State shared by every connection of one relay instance
pub struct SharedState {
    inner: Mutex<RelayInner>,
}

struct RelayInner {
    table: RoomTable,
    clients: HashMap<ClientId, EventTx>,
}

impl SharedState {
    /// Create relay state for the given configuration
    pub fn new(config: &RelayConfig) -> Self {
        Self {
            inner: Mutex::new(RelayInner {
                table: RoomTable::new(config.room_capacity),
                clients: HashMap::new(),
            }),
        }
    }

    /// Number of currently registered client sessions
    pub async fn client_count(&self) -> usize {
        self.inner.lock().await.table.client_count()
    }

    /// Number of rooms with at least one member
    pub async fn room_count(&self) -> usize {
        self.inner.lock().await.table.room_count()
    }
}

impl RelayInner {
    fn send_to(&self, client: &str, event: ServerEvent) {
        if let Some(tx) = self.clients.get(client) {
            // A full or dropped queue means the client is going away; the
            // disconnect path cleans up membership.
            let _ = tx.send(event);
        }
    }

    fn log_to(&self, client: &str, line: String) {
        self.send_to(
            client,
            ServerEvent::Log {
                entries: vec!["Message from server:".to_string(), line],
            },
        );
    }
}

/// Serve one client connection until it disconnects
pub async fn handle_connection(stream: TcpStream, state: std::sync::Arc<SharedState>) -> Result<()> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| crate::Error::WebSocketError(format!("WebSocket handshake failed: {}", e)))?;
    let (mut sink, mut ws_stream) = ws.split();

    let client_id = uuid::Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();

    {
        let mut inner = state.inner.lock().await;
        inner.clients.insert(client_id.clone(), tx.clone());
        inner.table.register(&client_id);
    }
    let _ = tx.send(ServerEvent::Welcome {
        client_id: client_id.clone(),
    });
    info!("Client session opened: {}", client_id);

    // Writer drains the outbound queue so the read loop never blocks on a
    // slow peer.
    let write_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match event.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!("Dropping unserializable event: {}", e);
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = ws_stream.next().await {
        let msg = match frame {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Client {} transport error: {}", client_id, e);
                break;
            }
        };
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };
        let request = match ClientRequest::from_json(&text) {
            Ok(request) => request,
            Err(e) => {
                warn!("Invalid frame from {}: {}", client_id, e);
                continue;
            }
        };
        handle_request(&client_id, request, &state).await;
    }

    disconnect(&client_id, &state).await;
    write_task.abort();
    Ok(())
}

async fn handle_request(client_id: &str, request: ClientRequest, state: &SharedState) {
    match request {
        ClientRequest::CreateOrJoin { room } => {
            handle_create_or_join(client_id, room.as_deref(), state).await;
        }
        ClientRequest::InitiatePeer { room } => {
            let inner = state.inner.lock().await;
            for member in inner.table.other_members(&room, client_id) {
                inner.send_to(&member, ServerEvent::InitiatePeer { room: room.clone() });
            }
        }
        ClientRequest::SendingSignal { room, data } => {
            // Forward verbatim; an empty target set is a no-op, not an error.
            let inner = state.inner.lock().await;
            for member in inner.table.other_members(&room, client_id) {
                inner.send_to(
                    &member,
                    ServerEvent::SendingSignal {
                        room: room.clone(),
                        data: data.clone(),
                    },
                );
            }
        }
        ClientRequest::Message { payload } => {
            let inner = state.inner.lock().await;
            for client in inner.table.other_clients(client_id) {
                inner.send_to(
                    &client,
                    ServerEvent::Message {
                        payload: payload.clone(),
                    },
                );
            }
        }
        ClientRequest::IpAddress => {
            let inner = state.inner.lock().await;
            for iface in if_addrs::get_if_addrs().unwrap_or_default() {
                if let std::net::IpAddr::V4(v4) = iface.ip() {
                    if !v4.is_loopback() {
                        inner.send_to(
                            client_id,
                            ServerEvent::IpAddress {
                                address: v4.to_string(),
                            },
                        );
                    }
                }
            }
        }
        ClientRequest::Hangup => {
            info!("Client {} hung up", client_id);
            let mut inner = state.inner.lock().await;
            let vacated = inner.table.remove_client(client_id);
            if !vacated.is_empty() {
                debug!("Client {} vacated rooms {:?}", client_id, vacated);
            }
        }
    }
}

async fn handle_create_or_join(client_id: &str, room: Option<&str>, state: &SharedState) {
    let mut inner = state.inner.lock().await;
    inner.log_to(
        client_id,
        match room {
            Some(name) => format!("Received request to create or join room {}", name),
            None => "Received request to create or join".to_string(),
        },
    );

    let placements = inner.table.create_or_join(client_id, room);
    for placement in placements {
        match placement {
            Placement::Created { room } => {
                info!("Client {} created room {}", client_id, room);
                inner.log_to(client_id, format!("Client ID {} created room {}", client_id, room));
                inner.send_to(
                    client_id,
                    ServerEvent::Created {
                        room,
                        client_id: client_id.to_string(),
                    },
                );
            }
            Placement::Joined { room, others } => {
                info!("Client {} joined room {}", client_id, room);
                inner.log_to(client_id, format!("Client ID {} joined room {}", client_id, room));
                for other in &others {
                    inner.send_to(other, ServerEvent::Join { room: room.clone() });
                }
                inner.send_to(
                    client_id,
                    ServerEvent::Joined {
                        room: room.clone(),
                        client_id: client_id.to_string(),
                    },
                );
                for member in others.iter().map(String::as_str).chain([client_id]) {
                    inner.send_to(member, ServerEvent::Ready { room: room.clone() });
                }
            }
            Placement::Paired { room, partner } => {
                info!(
                    "Client {} paired with {} in fresh room {}",
                    client_id, partner, room
                );
                inner.send_to(
                    &partner,
                    ServerEvent::Created {
                        room: room.clone(),
                        client_id: partner.clone(),
                    },
                );
                inner.send_to(&partner, ServerEvent::Join { room: room.clone() });
                inner.send_to(
                    client_id,
                    ServerEvent::Joined {
                        room: room.clone(),
                        client_id: client_id.to_string(),
                    },
                );
                for member in [partner.as_str(), client_id] {
                    inner.send_to(member, ServerEvent::Ready { room: room.clone() });
                }
            }
            Placement::Full { room } => {
                info!("Room {} is full, rejecting {}", room, client_id);
                inner.send_to(client_id, ServerEvent::Full { room });
            }
        }
    }
}

async fn disconnect(client_id: &str, state: &SharedState) {
    let mut inner = state.inner.lock().await;
    inner.clients.remove(client_id);
    let vacated = inner.table.remove_client(client_id);
    info!(
        "Client session closed: {} (vacated {} room(s))",
        client_id,
        vacated.len()
    );
}
