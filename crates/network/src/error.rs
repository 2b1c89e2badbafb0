// crates/network/src/error.rs
//! Error types for connections, TLS sessions and the control protocol

use thiserror::Error;

/// Result type for network operations
pub type NetworkResult<T> = Result<T, NetworkError>;

/// Errors that can occur while talking to a remote server
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Host/port could not be resolved to any address
    #[error("Failed to resolve address {host}:{port}: {message}")]
    Resolve {
        host: String,
        port: u16,
        message: String,
    },

    /// Every resolved candidate refused the connection
    #[error("Failed to connect to {host}: {message}")]
    Connect { host: String, message: String },

    /// TLS negotiation failed
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// No TLS backend could be loaded in this process
    #[error("No TLS backend available")]
    TlsUnavailable,

    /// A receive exceeded the configured timeout
    #[error("Operation timed out")]
    Timeout,

    /// Any other send/receive failure
    #[error("{operation} failed: {message}")]
    Io {
        operation: &'static str,
        message: String,
    },

    /// The peer closed the connection before a complete reply arrived
    #[error("Connection unexpectedly closed")]
    ConnectionClosed,

    /// The peer sent an empty reply line
    #[error("Empty reply")]
    EmptyReply,

    /// The server answered with a code the current exchange can't accept
    #[error("{context}: {code} {text}")]
    UnexpectedReply {
        context: String,
        code: u16,
        text: String,
    },

    /// A locator string couldn't be parsed
    #[error("Invalid locator: {0}")]
    InvalidLocator(String),

    /// The passive-mode reply didn't carry a usable address
    #[error("Invalid passive reply: {0}")]
    InvalidPassiveReply(String),

    /// Send/receive was attempted on a closed connection
    #[error("Not connected")]
    NotConnected,

    /// The caller asked a transfer in progress to stop
    #[error("Transfer cancelled")]
    Cancelled,
}

impl NetworkError {
    /// Wraps an I/O failure, mapping timeouts to [`NetworkError::Timeout`]
    pub fn io(operation: &'static str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => NetworkError::Timeout,
            _ => NetworkError::Io {
                operation,
                message: err.to_string(),
            },
        }
    }

    /// Returns true if reconnecting and retrying might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            NetworkError::Timeout
                | NetworkError::Io { .. }
                | NetworkError::ConnectionClosed
                | NetworkError::Connect { .. }
        )
    }

    /// Returns true if the control channel is no longer in a known state
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            NetworkError::ConnectionClosed | NetworkError::EmptyReply
        )
    }

    /// Returns the server's reply code, if this error carries one
    pub fn reply_code(&self) -> Option<u16> {
        match self {
            NetworkError::UnexpectedReply { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_error_display() {
        let err = NetworkError::InvalidLocator("ftp:/broken".to_string());
        assert!(err.to_string().contains("Invalid locator"));
    }

    #[test]
    fn test_unexpected_reply_display() {
        let err = NetworkError::UnexpectedReply {
            context: "Failed to retrieve file".to_string(),
            code: 550,
            text: "No such file".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to retrieve file: 550 No such file");
        assert_eq!(err.reply_code(), Some(550));
    }

    #[test]
    fn test_io_timeout_mapping() {
        let err = NetworkError::io("Receive", io::Error::from(io::ErrorKind::WouldBlock));
        assert!(matches!(err, NetworkError::Timeout));

        let err = NetworkError::io("Receive", io::Error::from(io::ErrorKind::TimedOut));
        assert!(matches!(err, NetworkError::Timeout));

        let err = NetworkError::io("Send", io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(err.to_string().starts_with("Send failed"));
    }

    #[test]
    fn test_retryable_errors() {
        assert!(NetworkError::Timeout.is_retryable());
        assert!(NetworkError::ConnectionClosed.is_retryable());
        assert!(!NetworkError::TlsUnavailable.is_retryable());
        assert!(!NetworkError::InvalidLocator("x".to_string()).is_retryable());
        assert!(!NetworkError::Cancelled.is_retryable());
    }

    #[test]
    fn test_protocol_errors() {
        assert!(NetworkError::EmptyReply.is_protocol_error());
        assert!(NetworkError::ConnectionClosed.is_protocol_error());
        assert!(!NetworkError::Timeout.is_protocol_error());
    }
}
