//! Error types for the source module.

use thiserror::Error;

/// Errors that can occur while reading the stream.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Invalid RTSP URL.
    #[error("Invalid RTSP URL: {0}")]
    InvalidUrl(String),

    /// RTSP session failed (connect, authentication, negotiation or RTP).
    #[error("RTSP session failed: {0}")]
    Session(#[from] retina::Error),

    /// The presentation has no H.264 video track.
    #[error("H264 track not found")]
    NoH264Track,

    /// Malformed access unit or decoder configuration.
    #[error("H264 stream error: {0}")]
    Protocol(String),

    /// No data within the read deadline.
    #[error("No data received for {0:?}")]
    Timeout(std::time::Duration),

    /// Server closed the stream.
    #[error("Stream ended")]
    StreamEnded,

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
