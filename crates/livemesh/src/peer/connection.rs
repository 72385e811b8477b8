//! One peer-to-peer session over the WebRTC stack
//!
//! [`PeerSession`] wraps an `RTCPeerConnection` plus its data channel and
//! reduces the library's callback surface to a single event stream. The
//! initiator creates the data channel and the offer; the non-initiator
//! answers. Every signal the session emits is an opaque JSON blob for the
//! relay to forward; inbound blobs are fed back through [`PeerSession::signal`].

use crate::config::PeerOptions;
use crate::{Error, Result};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Events a peer session raises toward the connection registry
#[derive(Debug)]
pub enum PeerEvent {
    /// A signaling blob that must reach the remote peer via the relay
    Signal(serde_json::Value),

    /// The data channel is open; the session is usable
    Connect,

    /// Raw bytes received on the data channel
    Data(Bytes),

    /// A remote media track arrived
    Stream(Arc<TrackRemote>),

    /// The session ended (remote close or transport teardown)
    Close,

    /// The session failed
    Error(String),
}

/// A single peer-to-peer session
pub struct PeerSession {
    room: String,
    initiator: bool,
    pc: Arc<RTCPeerConnection>,
    data_channel: Arc<RwLock<Option<Arc<RTCDataChannel>>>>,
    events: mpsc::UnboundedSender<(String, PeerEvent)>,
}

impl PeerSession {
    /// Create a session for `room`
    ///
    /// `local_track`, when present, is added before negotiation so the
    /// remote side receives it as a `stream` event. Nothing is sent on the
    /// wire until [`PeerSession::start`] (initiator) or the first inbound
    /// signal (non-initiator).
    pub async fn new(
        room: &str,
        initiator: bool,
        options: &PeerOptions,
        local_track: Option<Arc<dyn TrackLocal + Send + Sync>>,
        events: mpsc::UnboundedSender<(String, PeerEvent)>,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::PeerConnectionError(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            Error::PeerConnectionError(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = options
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(options.turn_servers.iter().map(|turn| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: vec![turn.url.clone()],
                    username: turn.username.clone(),
                    credential: turn.credential.clone(),
                    ..Default::default()
                }
            }))
            .collect();

        let rtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(rtc_config).await.map_err(|e| {
            Error::PeerConnectionError(format!("Failed to create peer connection: {}", e))
        })?);

        let session = Self {
            room: room.to_string(),
            initiator,
            pc,
            data_channel: Arc::new(RwLock::new(None)),
            events,
        };
        session.install_handlers().await?;

        if let Some(track) = local_track {
            session
                .pc
                .add_track(track)
                .await
                .map_err(|e| Error::PeerConnectionError(format!("Failed to add track: {}", e)))?;
        }

        if initiator {
            let dc = session
                .pc
                .create_data_channel(&options.data_channel_label, None)
                .await
                .map_err(|e| {
                    Error::DataChannelError(format!("Failed to create data channel: {}", e))
                })?;
            Self::install_channel_handlers(&dc, &session.room, &session.events);
            *session.data_channel.write().await = Some(dc);
        }

        Ok(session)
    }

    /// Room this session belongs to
    pub fn room(&self) -> &str {
        &self.room
    }

    /// Whether this side drives the offer
    pub fn initiator(&self) -> bool {
        self.initiator
    }

    async fn install_handlers(&self) -> Result<()> {
        let room = self.room.clone();
        let events = self.events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let room = room.clone();
                let events = events.clone();
                Box::pin(async move {
                    let Some(candidate) = candidate else { return };
                    match candidate.to_json() {
                        Ok(init) => {
                            let blob = serde_json::json!({
                                "type": "candidate",
                                "candidate": init,
                            });
                            let _ = events.send((room, PeerEvent::Signal(blob)));
                        }
                        Err(e) => warn!("Failed to serialize ICE candidate: {}", e),
                    }
                })
            }));

        let room = self.room.clone();
        let events = self.events.clone();
        self.pc
            .on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
                let room = room.clone();
                let events = events.clone();
                Box::pin(async move {
                    debug!("Peer connection for {} is {}", room, state);
                    match state {
                        RTCPeerConnectionState::Failed => {
                            let _ = events.send((
                                room,
                                PeerEvent::Error("Peer connection failed".to_string()),
                            ));
                        }
                        RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
                            let _ = events.send((room, PeerEvent::Close));
                        }
                        _ => {}
                    }
                })
            }));

        let room = self.room.clone();
        let events = self.events.clone();
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>, _receiver: Arc<RTCRtpReceiver>, _transceiver: Arc<RTCRtpTransceiver>| {
                let room = room.clone();
                let events = events.clone();
                Box::pin(async move {
                    info!("Remote track arrived for {}", room);
                    let _ = events.send((room, PeerEvent::Stream(track)));
                })
            },
        ));

        if !self.initiator {
            let room = self.room.clone();
            let events = self.events.clone();
            let slot = Arc::clone(&self.data_channel);
            self.pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
                let room = room.clone();
                let events = events.clone();
                let slot = Arc::clone(&slot);
                Box::pin(async move {
                    debug!("Data channel '{}' announced for {}", dc.label(), room);
                    Self::install_channel_handlers(&dc, &room, &events);
                    *slot.write().await = Some(dc);
                })
            }));
        }

        Ok(())
    }

    fn install_channel_handlers(
        dc: &Arc<RTCDataChannel>,
        room: &str,
        events: &mpsc::UnboundedSender<(String, PeerEvent)>,
    ) {
        let room_open = room.to_string();
        let events_open = events.clone();
        dc.on_open(Box::new(move || {
            info!("Data channel open for {}", room_open);
            let _ = events_open.send((room_open.clone(), PeerEvent::Connect));
            Box::pin(async {})
        }));

        let room_msg = room.to_string();
        let events_msg = events.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let _ = events_msg.send((room_msg.clone(), PeerEvent::Data(msg.data)));
            Box::pin(async {})
        }));

        let room_close = room.to_string();
        let events_close = events.clone();
        dc.on_close(Box::new(move || {
            let _ = events_close.send((room_close.clone(), PeerEvent::Close));
            Box::pin(async {})
        }));

        let room_err = room.to_string();
        let events_err = events.clone();
        dc.on_error(Box::new(move |e| {
            let _ = events_err.send((room_err.clone(), PeerEvent::Error(e.to_string())));
            Box::pin(async {})
        }));
    }

    /// Begin negotiation (initiator only)
    ///
    /// Emits the offer as the session's first signal. Non-initiators wait
    /// for the offer to arrive through [`PeerSession::signal`].
    pub async fn start(&self) -> Result<()> {
        if !self.initiator {
            return Ok(());
        }
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to create offer: {}", e)))?;
        let sdp = offer.sdp.clone();
        self.pc
            .set_local_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("Failed to set local description: {}", e)))?;

        let blob = serde_json::json!({ "type": "offer", "sdp": sdp });
        let _ = self.events.send((self.room.clone(), PeerEvent::Signal(blob)));
        Ok(())
    }

    /// Feed one inbound signaling blob into the session
    ///
    /// Offers produce an answer signal; answers and candidates are applied
    /// silently. Blobs are processed strictly in arrival order, which the
    /// negotiation protocol depends on.
    pub async fn signal(&self, blob: &serde_json::Value) -> Result<()> {
        let kind = blob
            .get("type")
            .and_then(|t| t.as_str())
            .ok_or_else(|| Error::SignalingError("Signal blob has no type".to_string()))?;

        match kind {
            "offer" => {
                let sdp = blob
                    .get("sdp")
                    .and_then(|s| s.as_str())
                    .ok_or_else(|| Error::SdpError("Offer has no sdp".to_string()))?;
                let offer = RTCSessionDescription::offer(sdp.to_string())
                    .map_err(|e| Error::SdpError(format!("Failed to parse offer: {}", e)))?;
                self.pc.set_remote_description(offer).await.map_err(|e| {
                    Error::SdpError(format!("Failed to set remote description: {}", e))
                })?;

                let answer = self
                    .pc
                    .create_answer(None)
                    .await
                    .map_err(|e| Error::SdpError(format!("Failed to create answer: {}", e)))?;
                let sdp = answer.sdp.clone();
                self.pc.set_local_description(answer).await.map_err(|e| {
                    Error::SdpError(format!("Failed to set local description: {}", e))
                })?;

                let blob = serde_json::json!({ "type": "answer", "sdp": sdp });
                let _ = self.events.send((self.room.clone(), PeerEvent::Signal(blob)));
                Ok(())
            }
            "answer" => {
                let sdp = blob
                    .get("sdp")
                    .and_then(|s| s.as_str())
                    .ok_or_else(|| Error::SdpError("Answer has no sdp".to_string()))?;
                let answer = RTCSessionDescription::answer(sdp.to_string())
                    .map_err(|e| Error::SdpError(format!("Failed to parse answer: {}", e)))?;
                self.pc.set_remote_description(answer).await.map_err(|e| {
                    Error::SdpError(format!("Failed to set remote description: {}", e))
                })
            }
            "candidate" => {
                let init: RTCIceCandidateInit = blob
                    .get("candidate")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| {
                        Error::IceCandidateError(format!("Failed to parse candidate: {}", e))
                    })?
                    .ok_or_else(|| {
                        Error::IceCandidateError("Signal blob has no candidate".to_string())
                    })?;
                self.pc.add_ice_candidate(init).await.map_err(|e| {
                    Error::IceCandidateError(format!("Failed to add candidate: {}", e))
                })
            }
            other => Err(Error::SignalingError(format!(
                "Unknown signal type: {}",
                other
            ))),
        }
    }

    /// Write a text payload to the data channel
    ///
    /// Fails when the channel is not open; callers gate on connection state
    /// so an unconnected session is skipped, not written to.
    pub async fn send_text(&self, text: String) -> Result<()> {
        let dc = self.data_channel.read().await;
        match dc.as_ref() {
            Some(dc) if dc.ready_state() == RTCDataChannelState::Open => {
                dc.send_text(text).await.map_err(|e| {
                    Error::DataChannelError(format!("Failed to send on data channel: {}", e))
                })?;
                Ok(())
            }
            _ => Err(Error::DataChannelError(
                "Data channel is not open".to_string(),
            )),
        }
    }

    /// Close the session and release the underlying connection
    pub async fn close(&self) -> Result<()> {
        if let Some(dc) = self.data_channel.read().await.as_ref() {
            let _ = dc.close().await;
        }
        self.pc
            .close()
            .await
            .map_err(|e| Error::PeerConnectionError(format!("Failed to close connection: {}", e)))
    }
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("room", &self.room)
            .field("initiator", &self.initiator)
            .finish()
    }
}
