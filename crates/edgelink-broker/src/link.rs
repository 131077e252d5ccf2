//! A single logical connection to the message broker.

use edgelink_types::GatewayEvent;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{BrokerError, Result};
use crate::message::{DeliveryMode, DropReason, Message, PublishOutcome};
use crate::options::LinkOptions;
use crate::transport::{BrokerClient, BrokerEvents, Connector, LinkEvent};

/// Capacity of the inbound message fan-out.
const INCOMING_CAPACITY: usize = 256;

/// Connection lifecycle of a link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Not connected and not trying.
    Disconnected,
    /// Initial handshake in progress.
    Connecting,
    /// Connected to the broker.
    Connected,
    /// Connection lost; the background loop is retrying.
    Reconnecting,
    /// Closed for good.
    Closed,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
            LinkState::Reconnecting => write!(f, "reconnecting"),
            LinkState::Closed => write!(f, "closed"),
        }
    }
}

/// Receives connection transitions of a link.
///
/// Each callback fires exactly once per transition into or out of
/// [`LinkState::Connected`]. Callbacks run on the link's background task and
/// must not block.
pub trait LinkObserver: Send + Sync {
    /// The link entered the connected state.
    fn on_connect(&self, _identity: &str) {}

    /// The link left the connected state.
    fn on_disconnect(&self, _identity: &str, _error: &BrokerError) {}
}

/// Publish counters of a link since it was opened.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    /// Handed to the transport.
    pub sent: u64,
    /// Dropped because the link was down.
    pub dropped_disconnected: u64,
    /// Dropped because the outbound queue was full.
    pub dropped_queue_full: u64,
    /// Dropped because the link was closed.
    pub dropped_closed: u64,
    /// Confirmed publishes the broker acknowledged.
    pub acknowledged: u64,
    /// Confirmed publishes with no acknowledgment in time, or lost with the connection.
    pub unacknowledged: u64,
}

impl LinkStats {
    /// Every drop, whatever the reason.
    pub fn dropped(&self) -> u64 {
        self.dropped_disconnected + self.dropped_queue_full + self.dropped_closed
    }
}

#[derive(Default)]
struct Counters {
    sent: AtomicU64,
    dropped_disconnected: AtomicU64,
    dropped_queue_full: AtomicU64,
    dropped_closed: AtomicU64,
    acknowledged: AtomicU64,
    unacknowledged: AtomicU64,
}

impl Counters {
    fn dropped(&self, reason: DropReason) {
        let counter = match reason {
            DropReason::Disconnected => &self.dropped_disconnected,
            DropReason::QueueFull => &self.dropped_queue_full,
            DropReason::Closed => &self.dropped_closed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LinkStats {
        LinkStats {
            sent: self.sent.load(Ordering::Relaxed),
            dropped_disconnected: self.dropped_disconnected.load(Ordering::Relaxed),
            dropped_queue_full: self.dropped_queue_full.load(Ordering::Relaxed),
            dropped_closed: self.dropped_closed.load(Ordering::Relaxed),
            acknowledged: self.acknowledged.load(Ordering::Relaxed),
            unacknowledged: self.unacknowledged.load(Ordering::Relaxed),
        }
    }
}

/// One connection to the broker, shared by every publisher of an identity.
pub struct BrokerLink {
    options: LinkOptions,
    client: Arc<dyn BrokerClient>,
    /// Written from the event loop, read from arbitrary publishers.
    connected: AtomicBool,
    state: watch::Sender<LinkState>,
    observers: RwLock<Vec<Arc<dyn LinkObserver>>>,
    incoming: broadcast::Sender<Message>,
    counters: Arc<Counters>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for BrokerLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerLink")
            .field("identity", &self.options.identity)
            .field("state", &self.state())
            .finish()
    }
}

impl BrokerLink {
    fn new(
        options: LinkOptions,
        client: Arc<dyn BrokerClient>,
        observers: Vec<Arc<dyn LinkObserver>>,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        let (incoming, _) = broadcast::channel(INCOMING_CAPACITY);
        Self {
            options,
            client,
            connected: AtomicBool::new(false),
            state,
            observers: RwLock::new(observers),
            incoming,
            counters: Arc::new(Counters::default()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Open a transport, complete the handshake and start the background loop.
    pub(crate) async fn establish(
        options: LinkOptions,
        connector: &dyn Connector,
        observers: Vec<Arc<dyn LinkObserver>>,
    ) -> Result<Arc<Self>> {
        let (client, mut events) = connector.open(&options)?;
        let link = Arc::new(Self::new(options, client, observers));
        link.set_state(LinkState::Connecting);

        let timeout = link.options.connect_timeout;
        let handshake = tokio::time::timeout(timeout, link.await_handshake(events.as_mut())).await;
        let failure = match handshake {
            Ok(Ok(())) => None,
            Ok(Err(err)) => Some(err),
            Err(_) => Some(BrokerError::Timeout(timeout)),
        };
        if let Some(err) = failure {
            warn!(identity = %link.identity(), error = %err, "Broker handshake failed");
            link.shutdown.cancel();
            link.set_state(LinkState::Disconnected);
            if let Err(e) = link.client.disconnect().await {
                debug!(identity = %link.identity(), error = %e, "Disconnect after failed handshake");
            }
            return Err(err);
        }

        link.on_connected();
        tokio::spawn(link.clone().run(events));
        Ok(link)
    }

    /// Poll until the broker accepts the connection. Refusals end the wait;
    /// other errors are retried until the caller's timeout fires.
    async fn await_handshake(&self, events: &mut dyn BrokerEvents) -> Result<()> {
        let mut backoff = self.options.reconnect.backoff();
        loop {
            match events.next().await {
                Ok(LinkEvent::Connected) => return Ok(()),
                Ok(_) => continue,
                Err(err @ BrokerError::Refused(_)) => return Err(err),
                Err(err) => {
                    let delay = backoff.next_delay();
                    debug!(
                        identity = %self.identity(),
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis(),
                        error = %err,
                        "Handshake attempt failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Background loop: drives the transport, reconnects with backoff.
    async fn run(self: Arc<Self>, mut events: Box<dyn BrokerEvents>) {
        let mut backoff = self.options.reconnect.backoff();
        loop {
            let event = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = events.next() => event,
            };

            match event {
                Ok(LinkEvent::Connected) => {
                    backoff.reset();
                    self.on_connected();
                }
                Ok(LinkEvent::Message(message)) => {
                    debug!(identity = %self.identity(), topic = %message.topic, "Inbound broker message");
                    let _ = self.incoming.send(message);
                }
                Ok(LinkEvent::Other) => {}
                Err(err) => {
                    self.on_connection_lost(err);
                    let delay = backoff.next_delay();
                    debug!(
                        identity = %self.identity(),
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis(),
                        "Reconnecting after delay"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
        debug!(identity = %self.identity(), "Broker link loop stopped");
    }

    fn on_connected(&self) {
        for topic in &self.options.subscriptions {
            if let Err(e) = self.client.try_subscribe(topic) {
                warn!(identity = %self.identity(), topic = %topic, error = %e, "Subscribe failed");
            }
        }

        let was_connected = self.connected.swap(true, Ordering::SeqCst);
        self.set_state(LinkState::Connected);
        if !was_connected {
            info!(identity = %self.identity(), "Broker link connected");
            for observer in self.observers() {
                observer.on_connect(self.identity());
            }
        }
    }

    fn on_connection_lost(&self, err: BrokerError) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        self.set_state(LinkState::Reconnecting);
        if was_connected {
            let err = err.into_connection_lost();
            warn!(identity = %self.identity(), error = %err, "Broker link disconnected");
            for observer in self.observers() {
                observer.on_disconnect(self.identity(), &err);
            }
        } else {
            debug!(identity = %self.identity(), error = %err, "Reconnect attempt failed");
        }
    }

    fn observers(&self) -> Vec<Arc<dyn LinkObserver>> {
        self.observers.read().clone()
    }

    fn set_state(&self, next: LinkState) {
        self.state.send_if_modified(|state| {
            if *state == LinkState::Closed || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    /// Stop the background loop and release the network connection.
    pub(crate) async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        self.state.send_replace(LinkState::Closed);

        if self.connected.swap(false, Ordering::SeqCst) {
            let err = BrokerError::Closed.into_connection_lost();
            for observer in self.observers() {
                observer.on_disconnect(self.identity(), &err);
            }
        }

        if let Err(e) = self.client.disconnect().await {
            debug!(identity = %self.identity(), error = %e, "Disconnect failed");
        }
        info!(identity = %self.identity(), "Broker link closed");
    }

    /// Publish a message without blocking the caller.
    ///
    /// While the link is down the message is dropped and only a warning is
    /// logged; there is no retry queue. Confirmed messages are awaited on a
    /// detached task bounded by the acknowledgment timeout.
    pub fn publish(&self, message: Message) -> PublishOutcome {
        if self.shutdown.is_cancelled() {
            return self.dropped(&message, DropReason::Closed);
        }
        if !self.is_connected() {
            return self.dropped(&message, DropReason::Disconnected);
        }

        let (ack, ack_rx) = match message.mode {
            DeliveryMode::Confirmed => {
                let (tx, rx) = oneshot::channel();
                (Some(tx), Some(rx))
            }
            DeliveryMode::FireAndForget => (None, None),
        };

        if let Err(err) = self.client.try_publish(&message, ack) {
            let reason = match err {
                BrokerError::QueueFull => DropReason::QueueFull,
                BrokerError::Closed => DropReason::Closed,
                _ => DropReason::Disconnected,
            };
            return self.dropped(&message, reason);
        }

        self.counters.sent.fetch_add(1, Ordering::Relaxed);
        if let Some(rx) = ack_rx {
            self.await_ack(&message, rx);
        }
        PublishOutcome::Sent
    }

    /// Publish a gateway event as JSON under the outbound topic prefix,
    /// tagged with the caller's correlation id.
    pub fn publish_event(
        &self,
        event: &GatewayEvent,
        mode: DeliveryMode,
        correlation_id: impl Into<String>,
    ) -> Result<PublishOutcome> {
        let message = Message::json(self.topic(event.topic_suffix()), event)?
            .with_correlation_id(correlation_id)
            .with_mode(mode);
        Ok(self.publish(message))
    }

    fn await_ack(&self, message: &Message, rx: oneshot::Receiver<()>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!(topic = %message.topic, "No runtime to await acknowledgment");
            return;
        };

        let identity = self.identity().to_string();
        let topic = message.topic.clone();
        let correlation_id = message.correlation_id.clone();
        let timeout = self.options.ack_timeout;
        let counters = self.counters.clone();
        runtime.spawn(async move {
            let result = tokio::time::timeout(timeout, rx).await;
            let counter = match result {
                Ok(Ok(())) => &counters.acknowledged,
                _ => &counters.unacknowledged,
            };
            counter.fetch_add(1, Ordering::Relaxed);
            match result {
                Ok(Ok(())) => {
                    debug!(identity = %identity, topic = %topic, correlation_id = %correlation_id, "Publish acknowledged");
                }
                Ok(Err(_)) => {
                    warn!(identity = %identity, topic = %topic, correlation_id = %correlation_id, "Publish lost before acknowledgment");
                }
                Err(_) => {
                    warn!(
                        identity = %identity,
                        topic = %topic,
                        correlation_id = %correlation_id,
                        timeout_ms = timeout.as_millis(),
                        "Publish acknowledgment timed out"
                    );
                }
            }
        });
    }

    fn dropped(&self, message: &Message, reason: DropReason) -> PublishOutcome {
        self.counters.dropped(reason);
        warn!(
            identity = %self.identity(),
            topic = %message.topic,
            correlation_id = %message.correlation_id,
            reason = %reason,
            "Broker publish dropped"
        );
        PublishOutcome::Dropped(reason)
    }

    /// Register an observer for connection transitions.
    pub fn add_observer(&self, observer: Arc<dyn LinkObserver>) {
        self.observers.write().push(observer);
    }

    /// Whether the link is currently connected. Never blocks.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Publish counters since the link was opened.
    pub fn stats(&self) -> LinkStats {
        self.counters.snapshot()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Messages arriving on subscribed topics.
    pub fn incoming(&self) -> broadcast::Receiver<Message> {
        self.incoming.subscribe()
    }

    /// The link's identity.
    pub fn identity(&self) -> &str {
        &self.options.identity
    }

    /// Full topic for a suffix under the outbound prefix.
    pub fn topic(&self, suffix: &str) -> String {
        let prefix = self.options.publish_topic_prefix.trim_end_matches('/');
        if prefix.is_empty() {
            suffix.to_string()
        } else {
            format!("{}/{}", prefix, suffix.trim_start_matches('/'))
        }
    }
}
