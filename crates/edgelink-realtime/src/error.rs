//! Error types for the real-time module.

use edgelink_types::CommandCode;
use thiserror::Error;

/// Errors that can occur in real-time operations.
#[derive(Debug, Error)]
pub enum RealtimeError {
    /// An inbound frame could not be decoded.
    #[error("malformed frame: {0}")]
    Decode(String),

    /// The session's send buffer is full.
    #[error("send buffer full")]
    BufferFull,

    /// The session's outbound channel is closed.
    #[error("channel closed")]
    ChannelClosed,

    /// A command code has no handler bound.
    #[error("no handler bound for command {0} ({code})", code = .0.as_u32())]
    MissingHandler(CommandCode),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
