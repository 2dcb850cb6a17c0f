//! Client error types.

use linewire_protocol::ProtocolError;
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("disconnected")]
    Disconnected,

    #[error("not connected")]
    NotConnected,

    #[error("already connected or connecting")]
    AlreadyConnected,

    #[error("a command list is already open")]
    BatchOpen,

    #[error("no command list is open")]
    NoBatch,

    #[error("local sockets are not supported: {0}")]
    UnsupportedTarget(String),

    #[error("request cancelled by connection reset")]
    Cancelled,

    #[error("server error: {0}")]
    Server(String),
}

impl ClientError {
    /// Returns whether reconnecting and retrying may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Io(_) => true,
            ClientError::Protocol(_) => true,
            ClientError::Connect { .. } => true,
            ClientError::ConnectionClosed => true,
            ClientError::Cancelled => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ClientError::ConnectionClosed.is_retryable());
        assert!(ClientError::Cancelled.is_retryable());
        assert!(ClientError::Protocol(ProtocolError::UnterminatedQuote).is_retryable());
        assert!(ClientError::Io(std::io::Error::other("boom")).is_retryable());

        assert!(!ClientError::Disconnected.is_retryable());
        assert!(!ClientError::BatchOpen.is_retryable());
        assert!(!ClientError::Server("ACCESS-DENIED".into()).is_retryable());
    }

    #[test]
    fn test_connect_error_display() {
        let err = ClientError::Connect {
            target: "localhost:6600".into(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        };
        assert!(err.to_string().starts_with("failed to connect to localhost:6600"));
    }
}
