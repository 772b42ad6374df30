//! Error types for the wireless microphone

use std::net::SocketAddr;

use thiserror::Error;

use crate::session::SessionState;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Audio capture errors
#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Capture unavailable: {0}")]
    CaptureUnavailable(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Capture stream closed")]
    StreamClosed,
}

/// Network errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Socket bind failed on {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    /// ICMP feedback surfaced on a later receive (port unreachable and friends)
    #[error("Peer unreachable: {0}")]
    PeerUnreachable(String),

    #[error("Timeout")]
    Timeout,
}

impl NetworkError {
    /// Errors that only mean "nothing useful arrived this iteration"
    pub fn is_transient(&self) -> bool {
        matches!(self, NetworkError::Timeout | NetworkError::PeerUnreachable(_))
    }

    /// Classify an error returned by a datagram receive
    pub fn from_recv(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        match err.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted => {
                NetworkError::Timeout
            }
            ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset => {
                NetworkError::PeerUnreachable(err.to_string())
            }
            _ => NetworkError::ReceiveFailed(err.to_string()),
        }
    }
}

/// Session control errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session already active ({0:?})")]
    AlreadyActive(SessionState),

    #[error("Audio capture is not permitted")]
    PermissionDenied,
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_recv_error_classification() {
        let timeout = NetworkError::from_recv(io::Error::from(io::ErrorKind::WouldBlock));
        assert!(matches!(timeout, NetworkError::Timeout));
        assert!(timeout.is_transient());

        let refused = NetworkError::from_recv(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(refused.is_transient());

        let fatal = NetworkError::from_recv(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(fatal, NetworkError::ReceiveFailed(_)));
        assert!(!fatal.is_transient());
    }
}
