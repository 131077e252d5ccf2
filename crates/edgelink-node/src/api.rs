//! HTTP surface of the gateway.

use axum::{extract::State, http::header, response::IntoResponse, routing::get, Json, Router};
use edgelink_broker::BrokerLink;
use edgelink_realtime::{
    ConnectionDeps, Dispatcher, EventEmitter, HubStats, RealtimeHub, SessionConfig, Translator,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::TokenVerifier;
use crate::events_api::event_routes;
use crate::health::{health_routes, HealthState};
use crate::observability::{request_id_layer, MetricsState, METRICS_CONTENT_TYPE};
use crate::realtime_api::realtime_routes;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: RealtimeHub,
    pub dispatcher: Arc<Dispatcher>,
    pub translator: Arc<dyn Translator>,
    pub events: EventEmitter,
    /// Outbound link; `None` when the broker is disabled.
    pub broker: Option<Arc<BrokerLink>>,
    pub metrics: MetricsState,
    /// Set when a token secret is configured.
    pub verifier: Option<Arc<TokenVerifier>>,
    /// Reject upgrades without a valid token.
    pub auth_required: bool,
    pub session: SessionConfig,
    pub default_language: String,
    pub health: HealthState,
}

impl AppState {
    /// Dependencies handed to each connection.
    pub fn connection_deps(&self) -> ConnectionDeps {
        ConnectionDeps {
            hub: self.hub.clone(),
            dispatcher: self.dispatcher.clone(),
            translator: self.translator.clone(),
        }
    }
}

/// Build the gateway router.
pub fn create_router(state: AppState) -> Router {
    let health = state.health.clone();
    Router::new()
        .merge(realtime_routes())
        .merge(event_routes())
        .route("/api/realtime/stats", get(get_stats))
        .route("/metrics", get(get_metrics))
        .with_state(state)
        .merge(health_routes(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(request_id_layer())
}

#[derive(Serialize)]
struct StatsResponse {
    #[serde(flatten)]
    hub: HubStats,
    /// Broker link state; absent when no broker is configured.
    #[serde(skip_serializing_if = "Option::is_none")]
    broker: Option<String>,
}

async fn get_stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatsResponse {
        hub: state.hub.stats(),
        broker: state.health.broker_state().map(|s| s.to_string()),
    })
}

async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    let broker = state.broker.as_ref().map(|link| (link.state(), link.stats()));
    let body = state.metrics.scrape(&state.hub.stats(), broker);
    ([(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], body)
}
