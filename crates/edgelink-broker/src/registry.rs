//! Connect-or-reuse registry of broker links keyed by identity.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info};

use crate::error::{BrokerError, Result};
use crate::link::{BrokerLink, LinkObserver};
use crate::mqtt::MqttConnector;
use crate::options::LinkOptions;
use crate::transport::Connector;

type Slot = Arc<OnceCell<Arc<BrokerLink>>>;

/// Owns every open broker link of the process.
///
/// The registry is created by the application root and handed to whoever
/// needs a link. Each identity has its own slot: two concurrent first
/// connects for one identity share a single handshake, while other
/// identities stay reachable during it.
pub struct BrokerRegistry {
    connector: Arc<dyn Connector>,
    links: Mutex<HashMap<String, Slot>>,
}

impl BrokerRegistry {
    /// Create a registry that opens transports through `connector`.
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            links: Mutex::new(HashMap::new()),
        }
    }

    /// Create a registry backed by MQTT.
    pub fn mqtt() -> Self {
        Self::new(Arc::new(MqttConnector))
    }

    /// Return the link for `options.identity`, connecting it first if needed.
    ///
    /// A cached link is returned as is; `observers` only apply to a newly
    /// opened link. Use [`BrokerLink::add_observer`] on a cached one.
    pub async fn connect(
        &self,
        options: LinkOptions,
        observers: Vec<Arc<dyn LinkObserver>>,
    ) -> Result<Arc<BrokerLink>> {
        let identity = options.identity.clone();
        let slot = self
            .links
            .lock()
            .await
            .entry(identity.clone())
            .or_default()
            .clone();

        if let Some(link) = slot.get() {
            debug!(identity = %identity, "Reusing broker link");
            return Ok(link.clone());
        }

        let result = slot
            .get_or_try_init(|| async {
                info!(
                    identity = %options.identity,
                    host = %options.host,
                    port = options.port,
                    "Connecting to broker"
                );
                BrokerLink::establish(options, self.connector.as_ref(), observers).await
            })
            .await
            .cloned();

        let mut links = self.links.lock().await;
        let still_registered = links
            .get(&identity)
            .is_some_and(|current| Arc::ptr_eq(current, &slot));
        match result {
            Ok(link) if still_registered => Ok(link),
            Ok(link) => {
                // Closed while the handshake was running.
                drop(links);
                link.shutdown().await;
                Err(BrokerError::Closed)
            }
            Err(err) => {
                if still_registered && !slot.initialized() {
                    links.remove(&identity);
                }
                Err(err)
            }
        }
    }

    /// Get an open link by identity.
    pub async fn get(&self, identity: &str) -> Option<Arc<BrokerLink>> {
        let links = self.links.lock().await;
        links.get(identity).and_then(|slot| slot.get().cloned())
    }

    /// Close a link and forget it. Returns false if no such link was open.
    pub async fn close(&self, identity: &str) -> bool {
        let slot = self.links.lock().await.remove(identity);
        match slot.and_then(|slot| slot.get().cloned()) {
            Some(link) => {
                link.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Close every link.
    pub async fn close_all(&self) {
        let links: Vec<_> = self
            .links
            .lock()
            .await
            .drain()
            .filter_map(|(_, slot)| slot.get().cloned())
            .collect();
        for link in links {
            link.shutdown().await;
        }
    }

    /// Number of open links.
    pub async fn len(&self) -> usize {
        let links = self.links.lock().await;
        links.values().filter(|slot| slot.initialized()).count()
    }

    /// Whether no link is open.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl std::fmt::Debug for BrokerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerRegistry").finish_non_exhaustive()
    }
}
