//! Error types for the rendezvous and connection-lifecycle layer

/// Result type alias using LiveMesh Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in relay and peer-connection operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Signaling protocol error
    #[error("Signaling error: {0}")]
    SignalingError(String),

    /// WebSocket transport error
    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    /// The signal transport is closed or was never connected
    #[error("Transport closed: {0}")]
    TransportClosed(String),

    /// WebRTC peer connection error
    #[error("Peer connection error: {0}")]
    PeerConnectionError(String),

    /// SDP negotiation error
    #[error("SDP negotiation error: {0}")]
    SdpError(String),

    /// ICE candidate error
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Data channel error
    #[error("Data channel error: {0}")]
    DataChannelError(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Room membership error (unknown room, capacity violation)
    #[error("Room error: {0}")]
    RoomError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Any other error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::SignalingError(_)
                | Error::WebSocketError(_)
                | Error::TransportClosed(_)
                | Error::IoError(_)
        )
    }

    /// Check if this error is a peer-related error
    pub fn is_peer_error(&self) -> bool {
        matches!(
            self,
            Error::PeerConnectionError(_)
                | Error::SdpError(_)
                | Error::IceCandidateError(_)
                | Error::DataChannelError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidConfig("test".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: test");
    }

    #[test]
    fn test_error_is_retryable() {
        assert!(Error::WebSocketError("test".to_string()).is_retryable());
        assert!(Error::TransportClosed("test".to_string()).is_retryable());
        assert!(!Error::InvalidConfig("test".to_string()).is_retryable());
    }

    #[test]
    fn test_error_is_peer_error() {
        assert!(Error::SdpError("test".to_string()).is_peer_error());
        assert!(Error::DataChannelError("test".to_string()).is_peer_error());
        assert!(!Error::RoomError("test".to_string()).is_peer_error());
    }
}
