//! # Health Checks
//!
//! - **Liveness**: is the process running?
//! - **Readiness**: has the gateway finished starting and is the hub alive?
//! - **Health**: readiness plus per-component detail. A lost broker link
//!   degrades the gateway without taking it out of service; WebSocket
//!   clients keep working and outbound publishes are dropped until the
//!   link recovers.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use edgelink_broker::{BrokerLink, LinkState};
use edgelink_realtime::RealtimeHub;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Health status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    /// Serving, with a dependency unavailable.
    Degraded,
    Down,
    /// Component not configured.
    Disabled,
}

/// Individual component health.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ComponentHealth {
    fn new(status: HealthStatus, details: serde_json::Value) -> Self {
        Self {
            status,
            details: Some(details),
        }
    }
}

/// Component checks.
#[derive(Debug, Clone, Serialize)]
pub struct HealthChecks {
    pub realtime: ComponentHealth,
    pub broker: ComponentHealth,
}

/// Liveness check response.
#[derive(Debug, Clone, Serialize)]
pub struct LivenessResponse {
    pub status: HealthStatus,
    pub uptime_seconds: u64,
}

/// Readiness check response.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub status: HealthStatus,
    pub checks: HealthChecks,
}

/// Overall health response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    pub checks: HealthChecks,
}

/// Health state shared by the health handlers.
#[derive(Clone)]
pub struct HealthState {
    start_time: Instant,
    ready: Arc<AtomicBool>,
    hub: RealtimeHub,
    broker: Option<Arc<BrokerLink>>,
}

impl HealthState {
    pub fn new(hub: RealtimeHub, broker: Option<Arc<BrokerLink>>) -> Self {
        Self {
            start_time: Instant::now(),
            ready: Arc::new(AtomicBool::new(false)),
            hub,
            broker,
        }
    }

    /// Uptime in seconds.
    pub fn uptime(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Broker link state, if a broker is configured.
    pub fn broker_state(&self) -> Option<LinkState> {
        self.broker.as_ref().map(|link| link.state())
    }

    fn realtime_health(&self) -> ComponentHealth {
        let stats = self.hub.stats();
        let status = if self.hub.is_running() {
            HealthStatus::Up
        } else {
            HealthStatus::Down
        };
        ComponentHealth::new(
            status,
            serde_json::json!({
                "sessions": stats.active_sessions,
                "dropped": stats.dropped,
            }),
        )
    }

    fn broker_health(&self) -> ComponentHealth {
        match &self.broker {
            None => ComponentHealth {
                status: HealthStatus::Disabled,
                details: None,
            },
            Some(link) => {
                let status = if link.is_connected() {
                    HealthStatus::Up
                } else {
                    HealthStatus::Down
                };
                ComponentHealth::new(
                    status,
                    serde_json::json!({
                        "identity": link.identity(),
                        "state": link.state().to_string(),
                    }),
                )
            }
        }
    }

    /// Component checks.
    pub fn checks(&self) -> HealthChecks {
        HealthChecks {
            realtime: self.realtime_health(),
            broker: self.broker_health(),
        }
    }

    /// Overall status for a set of checks.
    pub fn overall(&self, checks: &HealthChecks) -> HealthStatus {
        if !self.is_ready() || checks.realtime.status != HealthStatus::Up {
            HealthStatus::Down
        } else if checks.broker.status == HealthStatus::Down {
            HealthStatus::Degraded
        } else {
            HealthStatus::Up
        }
    }
}

fn status_code(status: HealthStatus) -> StatusCode {
    match status {
        HealthStatus::Down => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    }
}

/// Create health check routes.
pub fn health_routes<S>(state: HealthState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<HealthState>) -> Response {
    let checks = state.checks();
    let status = state.overall(&checks);
    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime(),
        checks,
    };
    (status_code(status), Json(response)).into_response()
}

async fn liveness_handler(State(state): State<HealthState>) -> Response {
    let response = LivenessResponse {
        status: HealthStatus::Up,
        uptime_seconds: state.uptime(),
    };
    (StatusCode::OK, Json(response)).into_response()
}

async fn readiness_handler(State(state): State<HealthState>) -> Response {
    let checks = state.checks();
    let status = state.overall(&checks);
    (status_code(status), Json(ReadinessResponse { status, checks })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use edgelink_broker::{BrokerRegistry, LinkOptions, MemoryBroker};
    use tower::ServiceExt;

    async fn get_json(state: HealthState, uri: &str) -> (StatusCode, serde_json::Value) {
        let app: Router = health_routes(state);
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_not_ready_until_marked() {
        let (hub, _loop) = RealtimeHub::spawn();
        let state = HealthState::new(hub, None);

        let (status, body) = get_json(state.clone(), "/health/ready").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "down");

        state.set_ready(true);
        let (status, body) = get_json(state.clone(), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "up");
        assert_eq!(body["checks"]["broker"]["status"], "disabled");

        let (status, _) = get_json(state, "/health/live").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_broker_loss_degrades() {
        let broker = MemoryBroker::new();
        let registry = BrokerRegistry::new(broker.connector());
        let link = registry
            .connect(LinkOptions::new("gw", "memory", 1883), Vec::new())
            .await
            .unwrap();

        let (hub, _loop) = RealtimeHub::spawn();
        let state = HealthState::new(hub, Some(link.clone()));
        state.set_ready(true);

        let (_, body) = get_json(state.clone(), "/health").await;
        assert_eq!(body["status"], "up");
        assert_eq!(body["checks"]["broker"]["details"]["identity"], "gw");

        broker.go_offline();
        let mut watch = link.watch_state();
        while *watch.borrow_and_update() == LinkState::Connected {
            watch.changed().await.unwrap();
        }

        let (status, body) = get_json(state, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["checks"]["broker"]["status"], "down");
    }
}
