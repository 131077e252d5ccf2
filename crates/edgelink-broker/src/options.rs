//! Connection options for a broker link.

use std::time::Duration;

use crate::backoff::ReconnectPolicy;

/// Default capacity of the outbound request queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 200;

/// Default bound on the initial handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Default wait for a broker acknowledgment of a confirmed publish.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Username and password presented to the broker.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything needed to open one broker link.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Logical client identity; also the registry key.
    pub identity: String,
    /// Broker host name.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Optional credentials.
    pub credentials: Option<Credentials>,
    /// Topics re-subscribed every time the link comes up.
    pub subscriptions: Vec<String>,
    /// Prefix for topics of gateway-generated events.
    pub publish_topic_prefix: String,
    /// Capacity of the outbound request queue.
    pub queue_capacity: usize,
    /// Bound on the initial handshake.
    pub connect_timeout: Duration,
    /// Wait for acknowledgment of confirmed publishes.
    pub ack_timeout: Duration,
    /// MQTT keep-alive interval.
    pub keep_alive: Duration,
    /// Backoff between reconnection attempts.
    pub reconnect: ReconnectPolicy,
}

impl LinkOptions {
    /// Create options with defaults for everything but the endpoint.
    pub fn new(identity: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            identity: identity.into(),
            host: host.into(),
            port,
            credentials: None,
            subscriptions: Vec::new(),
            publish_topic_prefix: String::new(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            keep_alive: Duration::from_secs(30),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Set credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.credentials = Some(Credentials {
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Add a subscription.
    pub fn subscribe(mut self, topic: impl Into<String>) -> Self {
        self.subscriptions.push(topic.into());
        self
    }

    /// Set the outbound topic prefix.
    pub fn with_publish_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.publish_topic_prefix = prefix.into();
        self
    }

    /// Set the handshake timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the acknowledgment timeout.
    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the outbound queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the reconnection policy.
    pub fn with_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_are_redacted() {
        let opts = LinkOptions::new("gw", "localhost", 1883).with_credentials("admin", "s3cret");
        let debug = format!("{:?}", opts);
        assert!(debug.contains("admin"));
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn test_defaults() {
        let opts = LinkOptions::new("gw", "localhost", 1883);
        assert_eq!(opts.queue_capacity, 200);
        assert_eq!(opts.connect_timeout, Duration::from_secs(10));
    }
}
