//! An in-process broker for tests and local development.
//!
//! The broker can refuse credentials, drop and restore every connection,
//! stall delivery, inject inbound messages and records everything published
//! to it.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::error::{BrokerError, Result};
use crate::message::Message;
use crate::options::LinkOptions;
use crate::transport::{AckSender, BrokerClient, BrokerEvents, Connector, LinkEvent};

type EventSender = mpsc::UnboundedSender<Result<LinkEvent>>;

struct Peer {
    id: u64,
    identity: String,
    events: EventSender,
    subscriptions: Vec<String>,
    capacity: usize,
    /// Publishes accepted while the broker is stalled.
    backlog: Vec<(Message, Option<AckSender>)>,
}

struct BrokerState {
    online: bool,
    refuse: bool,
    stalled: bool,
    next_peer: u64,
    connections: usize,
    peers: Vec<Peer>,
    published: Vec<Message>,
}

/// In-process message broker.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MemoryBroker {
    /// Create an online broker that accepts every client.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                online: true,
                refuse: false,
                stalled: false,
                next_peer: 0,
                connections: 0,
                peers: Vec::new(),
                published: Vec::new(),
            })),
        }
    }

    /// A connector that opens transports to this broker.
    pub fn connector(&self) -> Arc<MemoryConnector> {
        Arc::new(MemoryConnector {
            broker: self.clone(),
        })
    }

    /// Refuse (or accept again) new handshakes.
    pub fn refuse_connections(&self, refuse: bool) {
        self.state.lock().refuse = refuse;
    }

    /// Drop every connection; no handshake succeeds until [`Self::go_online`].
    pub fn go_offline(&self) {
        let mut state = self.state.lock();
        state.online = false;
        for peer in &state.peers {
            let _ = peer
                .events
                .send(Err(BrokerError::ConnectionLost("broker offline".to_string())));
        }
    }

    /// Accept connections again and reconnect every open transport.
    pub fn go_online(&self) {
        let mut state = self.state.lock();
        state.online = true;
        let refuse = state.refuse;
        for peer in &state.peers {
            let _ = peer.events.send(handshake(refuse));
        }
    }

    /// Stop draining client queues. Publishes wait in each client's outbound
    /// queue, bounded by its `queue_capacity`, and no acknowledgment is sent.
    pub fn stall(&self) {
        self.state.lock().stalled = true;
    }

    /// Deliver and acknowledge everything queued while stalled.
    pub fn resume(&self) {
        let mut state = self.state.lock();
        state.stalled = false;
        let backlog: Vec<_> = state
            .peers
            .iter_mut()
            .flat_map(|p| p.backlog.drain(..))
            .collect();
        for (message, ack) in backlog {
            state.published.push(message);
            if let Some(ack) = ack {
                let _ = ack.send(());
            }
        }
    }

    /// Deliver a message to every client subscribed to a matching filter.
    pub fn inject(&self, topic: &str, payload: impl Into<Bytes>) {
        let message = Message::new(topic, payload);
        let state = self.state.lock();
        for peer in &state.peers {
            if peer.subscriptions.iter().any(|f| topic_matches(f, topic)) {
                let _ = peer.events.send(Ok(LinkEvent::Message(message.clone())));
            }
        }
    }

    /// Every message published so far.
    pub fn published(&self) -> Vec<Message> {
        self.state.lock().published.clone()
    }

    /// Number of transports ever opened.
    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    /// Topics a client identity is subscribed to.
    pub fn subscriptions(&self, identity: &str) -> Vec<String> {
        self.state
            .lock()
            .peers
            .iter()
            .filter(|p| p.identity == identity)
            .flat_map(|p| p.subscriptions.iter().cloned())
            .collect()
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

fn handshake(refuse: bool) -> Result<LinkEvent> {
    if refuse {
        Err(BrokerError::Refused("NotAuthorized".to_string()))
    } else {
        Ok(LinkEvent::Connected)
    }
}

/// MQTT-style topic filter matching with `+` and `#` wildcards.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (None, None) => return true,
            _ => return false,
        }
    }
}

/// Opens transports to a [`MemoryBroker`].
pub struct MemoryConnector {
    broker: MemoryBroker,
}

impl Connector for MemoryConnector {
    fn open(&self, options: &LinkOptions) -> Result<(Arc<dyn BrokerClient>, Box<dyn BrokerEvents>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.broker.state.lock();
        let id = state.next_peer;
        state.next_peer += 1;
        state.connections += 1;
        if state.online {
            let _ = tx.send(handshake(state.refuse));
        }
        state.peers.push(Peer {
            id,
            identity: options.identity.clone(),
            events: tx,
            subscriptions: Vec::new(),
            capacity: options.queue_capacity.max(1),
            backlog: Vec::new(),
        });

        let client = MemoryClient {
            broker: self.broker.clone(),
            id,
        };
        Ok((Arc::new(client), Box::new(MemoryEvents { rx })))
    }
}

struct MemoryClient {
    broker: MemoryBroker,
    id: u64,
}

#[async_trait]
impl BrokerClient for MemoryClient {
    fn try_publish(&self, message: &Message, ack: Option<AckSender>) -> Result<()> {
        let mut state = self.broker.state.lock();
        if !state.online {
            return Err(BrokerError::ConnectionLost("broker offline".to_string()));
        }
        let stalled = state.stalled;
        let peer = state
            .peers
            .iter_mut()
            .find(|p| p.id == self.id)
            .ok_or(BrokerError::Closed)?;
        if stalled {
            if peer.backlog.len() >= peer.capacity {
                return Err(BrokerError::QueueFull);
            }
            peer.backlog.push((message.clone(), ack));
            return Ok(());
        }
        state.published.push(message.clone());
        if let Some(ack) = ack {
            let _ = ack.send(());
        }
        Ok(())
    }

    fn try_subscribe(&self, topic: &str) -> Result<()> {
        let mut state = self.broker.state.lock();
        let peer = state
            .peers
            .iter_mut()
            .find(|p| p.id == self.id)
            .ok_or(BrokerError::Closed)?;
        if !peer.subscriptions.iter().any(|t| t == topic) {
            peer.subscriptions.push(topic.to_string());
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.broker.state.lock().peers.retain(|p| p.id != self.id);
        Ok(())
    }
}

struct MemoryEvents {
    rx: mpsc::UnboundedReceiver<Result<LinkEvent>>,
}

#[async_trait]
impl BrokerEvents for MemoryEvents {
    async fn next(&mut self) -> Result<LinkEvent> {
        match self.rx.recv().await {
            Some(event) => event,
            // Disconnected transports stay silent.
            None => std::future::pending().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_matches() {
        assert!(topic_matches("edgelink/in", "edgelink/in"));
        assert!(topic_matches("edgelink/+/status", "edgelink/dev1/status"));
        assert!(topic_matches("edgelink/#", "edgelink/a/b/c"));
        assert!(!topic_matches("edgelink/+", "edgelink/a/b"));
        assert!(!topic_matches("edgelink/in", "edgelink/out"));
    }

    #[tokio::test]
    async fn test_memory_transport_records_publishes() {
        let broker = MemoryBroker::new();
        let (client, mut events) = broker
            .connector()
            .open(&LinkOptions::new("gw", "memory", 0))
            .unwrap();

        assert!(matches!(events.next().await, Ok(LinkEvent::Connected)));

        let (tx, rx) = tokio::sync::oneshot::channel();
        client.try_publish(&Message::new("t", "x"), Some(tx)).unwrap();
        assert!(rx.await.is_ok());
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test]
    async fn test_stalled_queue_is_bounded() {
        let broker = MemoryBroker::new();
        let mut options = LinkOptions::new("gw", "memory", 0);
        options.queue_capacity = 2;
        let (client, _events) = broker.connector().open(&options).unwrap();

        broker.stall();
        let (tx, mut rx) = tokio::sync::oneshot::channel();
        client.try_publish(&Message::new("t", "a"), Some(tx)).unwrap();
        client.try_publish(&Message::new("t", "b"), None).unwrap();
        assert!(matches!(
            client.try_publish(&Message::new("t", "c"), None),
            Err(BrokerError::QueueFull)
        ));
        assert!(broker.published().is_empty());
        assert!(rx.try_recv().is_err());

        broker.resume();
        assert_eq!(broker.published().len(), 2);
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_memory_transport_inject_respects_subscriptions() {
        let broker = MemoryBroker::new();
        let (client, mut events) = broker
            .connector()
            .open(&LinkOptions::new("gw", "memory", 0))
            .unwrap();
        let _ = events.next().await;

        client.try_subscribe("edgelink/in/#").unwrap();
        broker.inject("other/topic", "ignored");
        broker.inject("edgelink/in/rules", "hello");

        match events.next().await {
            Ok(LinkEvent::Message(m)) => assert_eq!(m.topic, "edgelink/in/rules"),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
