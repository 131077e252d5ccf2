//! Outbound message and publish outcome types.

use bytes::Bytes;
use serde::Serialize;

use crate::error::Result;

/// How a publish is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Wait in the background for the broker acknowledgment and log the outcome.
    Confirmed,
    /// Hand the message to the transport and forget about it.
    #[default]
    FireAndForget,
}

/// A unit of data exchanged with the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Destination or source topic.
    pub topic: String,
    /// Raw payload.
    pub payload: Bytes,
    /// Identifier carried from the caller's request context.
    pub correlation_id: String,
    /// Delivery mode.
    pub mode: DeliveryMode,
}

impl Message {
    /// Creates a fire-and-forget message with a fresh correlation id.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
            mode: DeliveryMode::FireAndForget,
        }
    }

    /// Creates a message with a JSON payload.
    pub fn json<T: Serialize>(topic: impl Into<String>, value: &T) -> Result<Self> {
        let payload = serde_json::to_vec(value)?;
        Ok(Self::new(topic, payload))
    }

    /// Sets the correlation id.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = id.into();
        self
    }

    /// Sets the delivery mode.
    pub fn with_mode(mut self, mode: DeliveryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Requests broker acknowledgment.
    pub fn confirmed(self) -> Self {
        self.with_mode(DeliveryMode::Confirmed)
    }
}

/// Why a publish was not handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The link is currently down.
    Disconnected,
    /// The transport's outbound queue is full.
    QueueFull,
    /// The link has been closed.
    Closed,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DropReason::Disconnected => write!(f, "disconnected"),
            DropReason::QueueFull => write!(f, "queue_full"),
            DropReason::Closed => write!(f, "closed"),
        }
    }
}

/// Result of a publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The message was handed to the transport.
    Sent,
    /// The message was lost; only a log line records it.
    Dropped(DropReason),
}

impl PublishOutcome {
    /// Whether the message was handed to the transport.
    pub fn is_sent(&self) -> bool {
        matches!(self, PublishOutcome::Sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_defaults() {
        let msg = Message::new("edgelink/events", "hello");
        assert_eq!(msg.mode, DeliveryMode::FireAndForget);
        assert!(!msg.correlation_id.is_empty());
        assert_eq!(msg.payload, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_json_message() {
        let msg = Message::json("t", &serde_json::json!({"a": 1}))
            .unwrap()
            .with_correlation_id("req-1")
            .confirmed();
        assert_eq!(msg.payload, Bytes::from_static(b"{\"a\":1}"));
        assert_eq!(msg.correlation_id, "req-1");
        assert_eq!(msg.mode, DeliveryMode::Confirmed);
    }
}
