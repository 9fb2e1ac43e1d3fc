//! Error types for serialwire-client.

use std::fmt;

use thiserror::Error;

/// Kind of a port handshake that can be pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// OPEN / OPENED handshake.
    Open,
    /// CLOSE / CLOSED handshake.
    Close,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Open => f.write_str("OPEN"),
            OperationKind::Close => f.write_str("CLOSE"),
        }
    }
}

/// Error reported by the peer in an ERROR frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    /// Port the error refers to, `None` for connection-level errors.
    pub port: Option<String>,
    /// Human readable message sent by the server.
    pub message: String,
}

impl RemoteError {
    /// Create a new remote error.
    pub fn new(port: Option<String>, message: impl Into<String>) -> Self {
        Self {
            port,
            message: message.into(),
        }
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.port {
            Some(port) => write!(f, "{}: {}", port, self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Main error type for all serialwire operations.
#[derive(Debug, Error)]
pub enum SerialWireError {
    /// I/O error on the underlying byte stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error while loading configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Protocol error (malformed frame, unexpected opcode, bad payload).
    ///
    /// Fatal for the connection: the stream can no longer be trusted to be
    /// frame aligned.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Connection closed, either by EOF, a fatal error or an explicit close.
    #[error("Connection closed")]
    ConnectionClosed,

    /// No reply arrived within the configured deadline.
    #[error("Timed out waiting for reply")]
    Timeout,

    /// The peer answered with an ERROR frame.
    #[error("Remote error: {0}")]
    Remote(RemoteError),

    /// An OPEN or CLOSE for this port is already in flight.
    #[error("{kind} already pending for port {port}")]
    OperationAlreadyPending {
        /// Port name.
        port: String,
        /// Kind of the pending handshake.
        kind: OperationKind,
    },

    /// Port names must not be empty.
    #[error("Invalid port name")]
    InvalidPortName,

    /// The port is not open on this connection.
    #[error("Port not open: {0}")]
    PortNotOpen(String),

    /// The port was closed while a transmission was still unconfirmed.
    #[error("Port closed: {0}")]
    PortClosed(String),

    /// Rejected configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Backpressure timeout - write queue full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl SerialWireError {
    /// Returns true if the error means the whole connection is gone.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SerialWireError::Io(_) | SerialWireError::Protocol(_) | SerialWireError::ConnectionClosed
        )
    }
}

/// Result type alias using SerialWireError.
pub type Result<T> = std::result::Result<T, SerialWireError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display() {
        let with_port = RemoteError::new(Some("COM5".to_string()), "failed to claim port");
        assert_eq!(with_port.to_string(), "COM5: failed to claim port");

        let global = RemoteError::new(None, "CLOSE: unknown link");
        assert_eq!(global.to_string(), "CLOSE: unknown link");
    }

    #[test]
    fn test_already_pending_message() {
        let err = SerialWireError::OperationAlreadyPending {
            port: "COM5".to_string(),
            kind: OperationKind::Open,
        };
        assert_eq!(err.to_string(), "OPEN already pending for port COM5");
    }

    #[test]
    fn test_is_fatal() {
        assert!(SerialWireError::ConnectionClosed.is_fatal());
        assert!(SerialWireError::Protocol("bad".into()).is_fatal());
        assert!(!SerialWireError::Timeout.is_fatal());
        assert!(!SerialWireError::PortNotOpen("COM1".into()).is_fatal());
    }
}
