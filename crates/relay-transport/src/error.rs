//! Error types for the transport module.

use thiserror::Error;

/// Errors that can occur during transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid bus address.
    #[error("Invalid bus address: {0}")]
    InvalidAddress(String),

    /// Invalid publish subject.
    #[error("Invalid subject: {0:?}")]
    InvalidSubject(String),

    /// Payload exceeds the server's limit.
    #[error("Payload of {size} bytes exceeds server limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },

    /// Send failed.
    #[error("Send failed: {0}")]
    Send(String),

    /// Operation did not finish before its deadline.
    #[error("Timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Server reported an error.
    #[error("Server error: {0}")]
    Server(String),

    /// Not connected.
    #[error("Not connected")]
    NotConnected,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
