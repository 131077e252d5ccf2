//! Prometheus metrics.
//!
//! The hub and the broker link keep their own atomic counters. A scrape
//! copies those totals into the registry under its write lock, so two
//! concurrent scrapes never count the same delta twice.

use edgelink_broker::{LinkState, LinkStats};
use edgelink_realtime::HubStats;
use parking_lot::RwLock;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tracing::warn;

/// Content type of the text exposition format.
pub const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Why an outbound broker message was lost.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DropLabels {
    pub reason: String,
}

/// Outcome of a confirmed publish.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct AckLabels {
    pub outcome: String,
}

/// Kind of an ingested gateway event.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EventLabels {
    pub kind: String,
}

/// Metrics state container.
#[derive(Clone)]
pub struct MetricsState {
    registry: Arc<RwLock<Registry>>,
    /// Sessions currently registered with the hub.
    pub sessions_active: Gauge,
    pub sessions_opened: Counter,
    pub broadcasts: Counter,
    /// Pushes handed to session buffers.
    pub pushes_delivered: Counter,
    /// Pushes lost on full or closing sessions.
    pub pushes_dropped: Counter,
    /// 1 while the broker link is connected.
    pub broker_connected: Gauge,
    pub broker_sent: Counter,
    pub broker_dropped: Family<DropLabels, Counter>,
    pub broker_acks: Family<AckLabels, Counter>,
    pub events_ingested: Family<EventLabels, Counter>,
}

impl Default for MetricsState {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsState {
    /// Create a new metrics state with all metrics registered.
    pub fn new() -> Self {
        let mut registry = Registry::default();

        // Realtime hub
        let sessions_active = Gauge::default();
        registry.register(
            "edgelink_sessions_active",
            "WebSocket sessions currently registered",
            sessions_active.clone(),
        );

        let sessions_opened = Counter::default();
        registry.register(
            "edgelink_sessions_opened",
            "WebSocket sessions registered since start",
            sessions_opened.clone(),
        );

        let broadcasts = Counter::default();
        registry.register(
            "edgelink_broadcasts",
            "Broadcast requests processed by the hub",
            broadcasts.clone(),
        );

        let pushes_delivered = Counter::default();
        registry.register(
            "edgelink_pushes_delivered",
            "Messages handed to session send buffers",
            pushes_delivered.clone(),
        );

        let pushes_dropped = Counter::default();
        registry.register(
            "edgelink_pushes_dropped",
            "Messages dropped on full or closing sessions",
            pushes_dropped.clone(),
        );

        // Broker link
        let broker_connected = Gauge::default();
        registry.register(
            "edgelink_broker_connected",
            "Whether the broker link is connected",
            broker_connected.clone(),
        );

        let broker_sent = Counter::default();
        registry.register(
            "edgelink_broker_sent",
            "Messages handed to the broker transport",
            broker_sent.clone(),
        );

        let broker_dropped = Family::<DropLabels, Counter>::default();
        registry.register(
            "edgelink_broker_dropped",
            "Outbound broker messages dropped, by reason",
            broker_dropped.clone(),
        );

        let broker_acks = Family::<AckLabels, Counter>::default();
        registry.register(
            "edgelink_broker_acks",
            "Confirmed publishes by acknowledgment outcome",
            broker_acks.clone(),
        );

        let events_ingested = Family::<EventLabels, Counter>::default();
        registry.register(
            "edgelink_events_ingested",
            "Gateway events accepted over HTTP, by kind",
            events_ingested.clone(),
        );

        Self {
            registry: Arc::new(RwLock::new(registry)),
            sessions_active,
            sessions_opened,
            broadcasts,
            pushes_delivered,
            pushes_dropped,
            broker_connected,
            broker_sent,
            broker_dropped,
            broker_acks,
            events_ingested,
        }
    }

    /// Record an event accepted by the ingest endpoint.
    pub fn record_ingested(&self, kind: &str) {
        self.events_ingested
            .get_or_create(&EventLabels {
                kind: kind.to_string(),
            })
            .inc();
    }

    /// Bring the registry up to date with the given totals and encode it.
    pub fn scrape(&self, hub: &HubStats, broker: Option<(LinkState, LinkStats)>) -> String {
        let registry = self.registry.write();

        self.sessions_active.set(hub.active_sessions as i64);
        advance(&self.sessions_opened, hub.total_sessions);
        advance(&self.broadcasts, hub.broadcasts);
        advance(&self.pushes_delivered, hub.delivered);
        advance(&self.pushes_dropped, hub.dropped);

        if let Some((state, stats)) = broker {
            self.broker_connected
                .set(i64::from(state == LinkState::Connected));
            advance(&self.broker_sent, stats.sent);
            for (reason, total) in [
                ("disconnected", stats.dropped_disconnected),
                ("queue_full", stats.dropped_queue_full),
                ("closed", stats.dropped_closed),
            ] {
                let labels = DropLabels {
                    reason: reason.to_string(),
                };
                advance(&self.broker_dropped.get_or_create(&labels), total);
            }
            for (outcome, total) in [
                ("acknowledged", stats.acknowledged),
                ("unacknowledged", stats.unacknowledged),
            ] {
                let labels = AckLabels {
                    outcome: outcome.to_string(),
                };
                advance(&self.broker_acks.get_or_create(&labels), total);
            }
        }

        encode_registry(&registry)
    }

    /// Encode metrics for Prometheus scraping.
    pub fn encode(&self) -> String {
        encode_registry(&self.registry.read())
    }
}

fn encode_registry(registry: &Registry) -> String {
    let mut buffer = String::new();
    if let Err(e) = prometheus_client::encoding::text::encode(&mut buffer, registry) {
        warn!(error = %e, "Failed to encode metrics");
    }
    buffer
}

/// Move a counter forward to `total`. Totals never go backwards.
fn advance(counter: &Counter, total: u64) {
    let seen = counter.get();
    if total > seen {
        counter.inc_by(total - seen);
    }
}
