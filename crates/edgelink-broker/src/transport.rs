//! Transport seam between a broker link and a concrete client library.
//!
//! A connector opens two halves: a client used to submit requests without
//! blocking, and an event source the link's background loop drives. After an
//! error, the next call to [`BrokerEvents::next`] attempts to reconnect.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::error::Result;
use crate::message::Message;
use crate::options::LinkOptions;

/// Signalled once the broker acknowledges a confirmed publish.
pub type AckSender = oneshot::Sender<()>;

/// Events surfaced by the transport's event source.
#[derive(Debug)]
pub enum LinkEvent {
    /// The handshake completed.
    Connected,
    /// A message arrived on a subscribed topic.
    Message(Message),
    /// Protocol traffic with no meaning for the link.
    Other,
}

/// Request half of a transport.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    /// Enqueue a publish without waiting. `ack` fires on broker acknowledgment.
    fn try_publish(&self, message: &Message, ack: Option<AckSender>) -> Result<()>;

    /// Enqueue a subscription without waiting.
    fn try_subscribe(&self, topic: &str) -> Result<()>;

    /// Close the network connection.
    async fn disconnect(&self) -> Result<()>;
}

/// Event half of a transport.
#[async_trait]
pub trait BrokerEvents: Send {
    /// Wait for the next event, reconnecting first after a previous error.
    async fn next(&mut self) -> Result<LinkEvent>;
}

/// Opens transports for broker links.
pub trait Connector: Send + Sync {
    /// Open a transport. No network traffic happens until events are polled.
    fn open(&self, options: &LinkOptions) -> Result<(Arc<dyn BrokerClient>, Box<dyn BrokerEvents>)>;
}
