//! Domain events pushed to connected sessions.

use crate::hub::RealtimeHub;
use crate::session::SessionId;
use edgelink_types::{PushCode, ResponseEnvelope};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default capacity of the event stream.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

/// A real-time event produced by a domain service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeEvent {
    /// The event kind.
    pub kind: EventKind,

    /// Event payload data.
    pub data: serde_json::Value,

    /// Unix timestamp (millis) when the event occurred.
    pub timestamp: u64,

    /// Unique event ID.
    pub event_id: String,

    /// Session the event is addressed to; every session when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<SessionId>,
}

impl RealtimeEvent {
    /// Create a new real-time event.
    pub fn new(kind: EventKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            data,
            timestamp: edgelink_types::now_millis(),
            event_id: uuid::Uuid::new_v4().to_string(),
            target: None,
        }
    }

    /// Address the event to a single session.
    pub fn to_session(mut self, session_id: impl Into<SessionId>) -> Self {
        self.target = Some(session_id.into());
        self
    }

    /// The client-facing message for this event.
    pub fn into_envelope(self) -> ResponseEnvelope {
        ResponseEnvelope::ok(
            self.kind.push_code(),
            json!({
                "eventId": self.event_id,
                "timestamp": self.timestamp,
                "data": self.data,
            }),
        )
    }
}

/// Kinds of events pushed to sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A driver instance changed its run status.
    DriverStatus,
    /// A device went online or offline.
    DeviceStatus,
    /// Progress of an image download or upgrade.
    ImageProgress,
    /// A message arrived on the broker's inbound topic.
    BrokerMessage,
}

impl EventKind {
    /// The push code clients see for this kind.
    pub fn push_code(self) -> PushCode {
        match self {
            EventKind::DriverStatus => PushCode::DriverStatusChanged,
            EventKind::DeviceStatus => PushCode::DeviceStatusChanged,
            EventKind::ImageProgress => PushCode::ImageProgress,
            EventKind::BrokerMessage => PushCode::BrokerMessage,
        }
    }
}

/// Producer side of the event stream, handed to domain services.
#[derive(Debug, Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<RealtimeEvent>,
}

impl EventEmitter {
    /// Emit an event. Returns false if it was dropped.
    ///
    /// Never waits: a full stream drops the event.
    pub fn emit(&self, kind: EventKind, data: serde_json::Value) -> bool {
        self.send(RealtimeEvent::new(kind, data))
    }

    /// Emit an event for one session only.
    pub fn emit_to(
        &self,
        session_id: impl Into<SessionId>,
        kind: EventKind,
        data: serde_json::Value,
    ) -> bool {
        self.send(RealtimeEvent::new(kind, data).to_session(session_id))
    }

    fn send(&self, event: RealtimeEvent) -> bool {
        match self.tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(kind = ?event.kind, "Event stream full, event dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// Consumer side of the event stream.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::Receiver<RealtimeEvent>,
}

impl EventStream {
    /// Next event, or `None` once every emitter is gone.
    pub async fn recv(&mut self) -> Option<RealtimeEvent> {
        self.rx.recv().await
    }
}

/// Create a bounded event stream.
pub fn event_channel(capacity: usize) -> (EventEmitter, EventStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventEmitter { tx }, EventStream { rx })
}

/// Deliver every event from `stream` through `hub` until the stream ends.
pub fn spawn_event_pump(mut stream: EventStream, hub: RealtimeHub) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(mut event) = stream.recv().await {
            debug!(kind = ?event.kind, event_id = %event.event_id, target = ?event.target, "Delivering event");
            let delivered = match event.target.take() {
                Some(session_id) => hub.send_to(session_id, event.into_envelope()),
                None => hub.broadcast(event.into_envelope()),
            };
            if delivered.is_err() {
                break;
            }
        }
        debug!("Event pump stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Session, SessionContext};
    use std::time::Duration;

    #[test]
    fn test_event_envelope() {
        let event = RealtimeEvent::new(EventKind::DeviceStatus, json!({"deviceId": "d1"}));
        let id = event.event_id.clone();
        let envelope = event.into_envelope();

        assert_eq!(envelope.code, 20002);
        assert!(envelope.data.success());
        assert_eq!(envelope.data.result()["eventId"], json!(id));
        assert_eq!(envelope.data.result()["data"]["deviceId"], "d1");
    }

    #[test]
    fn test_emit_drops_when_full() {
        let (emitter, _stream) = event_channel(1);
        assert!(emitter.emit(EventKind::ImageProgress, json!(10)));
        assert!(!emitter.emit(EventKind::ImageProgress, json!(20)));
    }

    #[tokio::test]
    async fn test_pump_broadcasts_events() {
        let (hub, _handle) = RealtimeHub::spawn();
        let (session, mut rx) = Session::new("s", SessionContext::default(), 8);
        hub.register(session);

        let (emitter, stream) = event_channel(8);
        let pump = spawn_event_pump(stream, hub.clone());
        emitter.emit(EventKind::DriverStatus, json!({"instanceId": "i1"}));

        let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(msg.code, PushCode::DriverStatusChanged.as_u32());

        drop(emitter);
        tokio::time::timeout(Duration::from_secs(2), pump)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_targeted_event_reaches_one_session() {
        let (hub, _handle) = RealtimeHub::spawn();
        let (alice, mut alice_rx) = Session::new("10.0.0.1_alice", SessionContext::default(), 8);
        let (bob, mut bob_rx) = Session::new("10.0.0.2_bob", SessionContext::default(), 8);
        hub.register(alice);
        hub.register(bob);

        let (emitter, stream) = event_channel(8);
        let _pump = spawn_event_pump(stream, hub.clone());
        emitter.emit_to("10.0.0.1_alice", EventKind::ImageProgress, json!({"progress": 100}));
        emitter.emit(EventKind::DeviceStatus, json!({"deviceId": "d1"}));

        let first = tokio::time::timeout(Duration::from_secs(2), alice_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.code, PushCode::ImageProgress.as_u32());

        let only = tokio::time::timeout(Duration::from_secs(2), bob_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(only.code, PushCode::DeviceStatusChanged.as_u32());
    }
}
