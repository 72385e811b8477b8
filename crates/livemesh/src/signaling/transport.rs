//! Client-side signal transport
//!
//! One persistent WebSocket session to the relay. The first inbound frame is
//! the `welcome` identity assignment; everything after it is a named event
//! handed to the owner through a channel. Outbound requests are queued and
//! written in order; a `hangup` request ends the session after it is sent.

use crate::signaling::protocol::{ClientId, ClientRequest, ServerEvent};
use crate::{Error, Result};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};

/// Transport session to the signaling relay
///
/// Cheap to clone; all clones share the same session. The session ends when
/// a [`ClientRequest::Hangup`] is sent or the relay closes the socket. There
/// is no automatic reconnect: a new session gets a new identity, so recovery
/// is a fresh [`SignalTransport::connect`].
#[derive(Clone)]
pub struct SignalTransport {
    client_id: ClientId,
    outgoing: mpsc::UnboundedSender<ClientRequest>,
}

impl SignalTransport {
    /// Connect to the relay and complete the identity handshake
    ///
    /// Returns the transport and the stream of relay events. The event
    /// channel closes when the session ends.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::UnboundedReceiver<ServerEvent>)> {
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| Error::WebSocketError(format!("Failed to connect to {}: {}", url, e)))?;
        let (mut sink, mut stream) = ws.split();

        // The relay speaks first: one welcome frame assigning the session
        // identity, before any named event.
        let client_id = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => match ServerEvent::from_json(&text)? {
                    ServerEvent::Welcome { client_id } => break client_id,
                    other => {
                        return Err(Error::SignalingError(format!(
                            "Expected welcome during handshake, got {}",
                            other.event_name()
                        )))
                    }
                },
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(Error::WebSocketError(format!(
                        "Transport error during handshake: {}",
                        e
                    )))
                }
                None => {
                    return Err(Error::TransportClosed(
                        "Relay closed the socket during handshake".to_string(),
                    ))
                }
            }
        };
        debug!("Signal transport connected as {}", client_id);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            while let Some(frame) = stream.next().await {
                match frame {
                    Ok(Message::Text(text)) => match ServerEvent::from_json(&text) {
                        Ok(event) => {
                            if event_tx.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!("Dropping undecodable relay frame: {}", e),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("Signal transport read error: {}", e);
                        break;
                    }
                }
            }
            // Dropping event_tx closes the event channel, which is how the
            // owner observes the disconnect.
        });

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ClientRequest>();
        tokio::spawn(async move {
            while let Some(request) = out_rx.recv().await {
                let ends_session = matches!(request, ClientRequest::Hangup);
                match request.to_json() {
                    Ok(json) => {
                        if sink.send(Message::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!("Dropping unserializable request: {}", e);
                        continue;
                    }
                }
                if ends_session {
                    break;
                }
            }
            let _ = sink.send(Message::Close(None)).await;
            let _ = sink.close().await;
        });

        Ok((
            Self {
                client_id,
                outgoing: out_tx,
            },
            event_rx,
        ))
    }

    /// Identity assigned to this session by the relay
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Queue a request for delivery
    ///
    /// Fire-and-continue: delivery happens in transport order, results come
    /// back as events.
    pub fn send(&self, request: ClientRequest) -> Result<()> {
        self.outgoing
            .send(request)
            .map_err(|_| Error::TransportClosed("Signal transport is closed".to_string()))
    }
}

impl std::fmt::Debug for SignalTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalTransport")
            .field("client_id", &self.client_id)
            .finish()
    }
}
