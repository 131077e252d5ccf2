//! Glue between the broker link and the realtime hub.

use edgelink_broker::{BrokerError, BrokerLink, LinkObserver, LinkState, Message};
use edgelink_realtime::{EventEmitter, EventKind};
use serde_json::{json, Value};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Logs link transitions.
#[derive(Debug, Default)]
pub struct LinkLogger;

impl LinkObserver for LinkLogger {
    fn on_connect(&self, identity: &str) {
        info!(identity = %identity, "Broker link connected");
    }

    fn on_disconnect(&self, identity: &str, error: &BrokerError) {
        warn!(identity = %identity, error = %error, "Broker link lost, reconnecting");
    }
}

/// Forward every inbound broker message to WebSocket clients as a
/// [`EventKind::BrokerMessage`] push.
///
/// Stops when the link is closed.
pub fn spawn_inbound_bridge(link: &BrokerLink, events: EventEmitter) -> JoinHandle<()> {
    let mut incoming = link.incoming();
    let mut state = link.watch_state();
    let identity = link.identity().to_string();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = incoming.recv() => match received {
                    Ok(message) => {
                        debug!(topic = %message.topic, "Inbound broker message");
                        events.emit(EventKind::BrokerMessage, inbound_payload(&message));
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(identity = %identity, skipped, "Inbound bridge lagging, messages skipped");
                    }
                    Err(RecvError::Closed) => break,
                },
                changed = state.changed() => {
                    if changed.is_err() || *state.borrow_and_update() == LinkState::Closed {
                        break;
                    }
                }
            }
        }
        debug!(identity = %identity, "Inbound bridge stopped");
    })
}

/// `{topic, payload}`; JSON payloads are embedded, anything else as text.
fn inbound_payload(message: &Message) -> Value {
    let payload = serde_json::from_slice::<Value>(&message.payload)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&message.payload).into_owned()));
    json!({ "topic": message.topic, "payload": payload })
}
