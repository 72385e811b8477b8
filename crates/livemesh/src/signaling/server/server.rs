//! WebSocket signaling relay
//!
//! Accepts client sessions, hands each to the connection handler, and owns
//! nothing but in-memory state: the room table is rebuilt empty on every
//! start.

use super::handler::{handle_connection, SharedState};
use crate::config::RelayConfig;
use crate::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Signaling relay server
pub struct SignalingServer {
    config: RelayConfig,
    state: Arc<SharedState>,
}

impl SignalingServer {
    /// Create a new relay for the given configuration
    pub fn new(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let state = Arc::new(SharedState::new(&config));
        Ok(Self { config, state })
    }

    /// Get shared state (for external inspection)
    pub fn state(&self) -> Arc<SharedState> {
        Arc::clone(&self.state)
    }

    /// Bind and start serving
    ///
    /// Resolves once the listener is bound; the accept loop runs until the
    /// returned handle is shut down. Binding port 0 picks an ephemeral port,
    /// which the handle reports via [`SignalingServerHandle::local_addr`].
    pub async fn start(self) -> Result<SignalingServerHandle> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Signaling relay listening on ws://{}", local_addr);

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel::<()>(1);
        let state = Arc::clone(&self.state);

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        match result {
                            Ok((stream, peer_addr)) => {
                                info!("Accepted connection from {}", peer_addr);
                                let state = Arc::clone(&state);
                                tokio::spawn(async move {
                                    if let Err(e) = handle_connection(stream, state).await {
                                        error!("Connection error from {}: {}", peer_addr, e);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Signaling relay shutting down");
                        break;
                    }
                }
            }
        });

        Ok(SignalingServerHandle {
            local_addr,
            shutdown_tx,
            task,
        })
    }
}

/// Handle for a running relay
pub struct SignalingServerHandle {
    local_addr: SocketAddr,
    shutdown_tx: broadcast::Sender<()>,
    task: JoinHandle<()>,
}

impl SignalingServerHandle {
    /// Address the relay is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Relay URL clients should connect to
    pub fn url(&self) -> String {
        format!("ws://{}", self.local_addr)
    }

    /// Stop accepting connections and wait for the accept loop to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                error!("Relay accept loop panicked: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for SignalingServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingServer")
            .field("bind_addr", &self.config.bind_addr)
            .field("room_capacity", &self.config.room_capacity)
            .finish()
    }
}
