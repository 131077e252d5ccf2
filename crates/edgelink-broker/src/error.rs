//! Error types for the broker link.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while talking to the message broker.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// The network connection could not be established.
    #[error("broker connection failed: {0}")]
    Connect(String),

    /// The handshake did not complete in time.
    #[error("broker handshake timed out after {0:?}")]
    Timeout(Duration),

    /// The broker rejected the connection (bad credentials, banned id).
    #[error("broker refused connection: {0}")]
    Refused(String),

    /// An established connection was lost.
    #[error("broker connection lost: {0}")]
    ConnectionLost(String),

    /// The outbound request queue is full.
    #[error("outbound queue full")]
    QueueFull,

    /// The link has been closed.
    #[error("broker link closed")]
    Closed,

    /// A payload could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl BrokerError {
    /// Whether this error belongs to the connect-time failure family.
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            BrokerError::Connect(_) | BrokerError::Timeout(_) | BrokerError::Refused(_)
        )
    }

    /// Wraps any failure that ends a connected period as a lost connection.
    pub(crate) fn into_connection_lost(self) -> Self {
        match self {
            BrokerError::ConnectionLost(_) => self,
            other => BrokerError::ConnectionLost(other.to_string()),
        }
    }

    /// Numeric error code reported to clients.
    pub fn error_code(&self) -> u32 {
        edgelink_types::error_code::BROKER_CONN_FAIL
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(err: serde_json::Error) -> Self {
        BrokerError::Serialization(err.to_string())
    }
}

/// A specialized Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_loss_reads_as_connection_lost() {
        for err in [
            BrokerError::Closed,
            BrokerError::Timeout(Duration::from_secs(1)),
            BrokerError::ConnectionLost("reset".to_string()),
        ] {
            let lost = err.into_connection_lost();
            assert!(matches!(lost, BrokerError::ConnectionLost(_)));
            assert_eq!(lost.error_code(), edgelink_types::error_code::BROKER_CONN_FAIL);
        }
        assert_eq!(
            BrokerError::Closed.into_connection_lost().to_string(),
            "broker connection lost: broker link closed"
        );
    }
}

