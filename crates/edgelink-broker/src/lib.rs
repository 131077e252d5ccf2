//! # Edgelink Broker
//!
//! Durable outbound link to an MQTT broker for gateway-generated events.
//!
//! ## Features
//!
//! - **Connect-or-reuse**: one link per client identity, cached in a
//!   [`BrokerRegistry`] owned by the application root
//! - **Automatic reconnection**: capped exponential backoff, re-subscribing
//!   every configured topic on each successful handshake
//! - **Best-effort publishing**: publishes never block; while the link is down
//!   messages are dropped and logged (at-most-once delivery)
//! - **Connection observers**: exactly one callback per transition into or
//!   out of the connected state
//!
//! ## Example
//!
//! ```rust,no_run
//! use edgelink_broker::{BrokerRegistry, LinkOptions, Message};
//!
//! # async fn demo() -> Result<(), edgelink_broker::BrokerError> {
//! let registry = BrokerRegistry::mqtt();
//! let options = LinkOptions::new("edgelink-gateway", "127.0.0.1", 1883)
//!     .subscribe("edgelink/inbound")
//!     .with_publish_prefix("edgelink/events");
//!
//! let link = registry.connect(options, vec![]).await?;
//! link.publish(Message::new(link.topic("device/status"), "{}").confirmed());
//! # Ok(())
//! # }
//! ```
//!
//! ## State Machine
//!
//! ```text
//! Disconnected ──► Connecting ──► Connected ◄──────────┐
//!                      │              │                 │
//!                 (timeout/refused)   ▼ (error)         │
//!                      │         Reconnecting ──────────┘
//!                      ▼              │
//!                 Disconnected        ▼ (close)
//!                                   Closed
//! ```

pub mod backoff;
pub mod error;
pub mod link;
pub mod memory;
pub mod message;
pub mod mqtt;
pub mod options;
pub mod registry;
pub mod transport;

pub use backoff::{Backoff, ReconnectPolicy};
pub use error::{BrokerError, Result};
pub use link::{BrokerLink, LinkObserver, LinkState, LinkStats};
pub use memory::{MemoryBroker, MemoryConnector};
pub use message::{DeliveryMode, DropReason, Message, PublishOutcome};
pub use mqtt::MqttConnector;
pub use options::{Credentials, LinkOptions};
pub use registry::BrokerRegistry;
pub use transport::{AckSender, BrokerClient, BrokerEvents, Connector, LinkEvent};
