//! Event ingest endpoint.
//!
//! `POST /api/events` accepts a [`GatewayEvent`] from local producers such
//! as device adapters. Device and driver status changes are pushed to every
//! WebSocket session; every event is published under the outbound topic
//! prefix, correlated by the HTTP request id.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Extension, Json, Router,
};
use edgelink_broker::{BrokerError, DeliveryMode, PublishOutcome};
use edgelink_realtime::EventKind;
use edgelink_types::GatewayEvent;
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

use crate::api::AppState;
use crate::auth::AuthError;
use crate::observability::RequestId;
use crate::realtime_api::authenticate;

/// Create the ingest routes.
pub fn event_routes() -> Router<AppState> {
    Router::new().route("/api/events", post(ingest_event))
}

/// Ingest failures.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("failed to publish event: {0}")]
    Publish(#[from] BrokerError),
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            IngestError::Auth(e) => e.into_response(),
            IngestError::Publish(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response(),
        }
    }
}

/// What happened to an ingested event.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResponse {
    pub request_id: String,
    /// Pushed to WebSocket sessions.
    pub pushed: bool,
    /// Handed to the broker transport.
    pub published: bool,
}

async fn ingest_event(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    headers: HeaderMap,
    Json(event): Json<GatewayEvent>,
) -> Result<(StatusCode, Json<IngestResponse>), IngestError> {
    authenticate(&state, &headers, None)?;
    state.metrics.record_ingested(event.kind());

    let pushed = match local_push(&event) {
        Some((kind, data)) => state.events.emit(kind, data),
        None => false,
    };

    let published = match &state.broker {
        Some(link) => {
            let outcome = link.publish_event(&event, DeliveryMode::Confirmed, request_id.clone())?;
            if let PublishOutcome::Dropped(reason) = outcome {
                debug!(request_id = %request_id, reason = %reason, "Ingested event not published");
            }
            outcome.is_sent()
        }
        None => false,
    };

    info!(request_id = %request_id, kind = event.kind(), pushed, published, "Event ingested");
    Ok((
        StatusCode::ACCEPTED,
        Json(IngestResponse {
            request_id,
            pushed,
            published,
        }),
    ))
}

/// The session push for an event. Thing-model telemetry only goes to the
/// broker.
fn local_push(event: &GatewayEvent) -> Option<(EventKind, Value)> {
    match event {
        GatewayEvent::DeviceStatus {
            device_id,
            online,
            timestamp,
        } => Some((
            EventKind::DeviceStatus,
            json!({ "deviceId": device_id, "online": online, "timestamp": timestamp }),
        )),
        GatewayEvent::DriverStatus {
            instance_id,
            run_status,
            timestamp,
        } => Some((
            EventKind::DriverStatus,
            json!({ "id": instance_id, "runStatus": run_status, "timestamp": timestamp }),
        )),
        GatewayEvent::ThingModel { .. } => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edgelink_types::RunStatus;

    #[test]
    fn test_local_push_mapping() {
        let (kind, data) = local_push(&GatewayEvent::DeviceStatus {
            device_id: "d1".to_string(),
            online: true,
            timestamp: 9,
        })
        .unwrap();
        assert_eq!(kind, EventKind::DeviceStatus);
        assert_eq!(data["deviceId"], "d1");
        assert_eq!(data["online"], true);

        let (kind, data) = local_push(&GatewayEvent::DriverStatus {
            instance_id: "modbus-1".to_string(),
            run_status: RunStatus::Stopped,
            timestamp: 9,
        })
        .unwrap();
        assert_eq!(kind, EventKind::DriverStatus);
        assert_eq!(data["runStatus"], "stopped");

        assert!(local_push(&GatewayEvent::ThingModel {
            device_id: "d1".to_string(),
            product_id: "p1".to_string(),
            properties: json!({ "temp": 21 }),
            timestamp: 9,
        })
        .is_none());
    }
}
