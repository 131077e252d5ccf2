//! Structured events the gateway publishes onto the message broker.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Run status of a driver instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// The instance is running.
    Running,
    /// The instance is stopped.
    Stopped,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// An event published under the gateway's outbound topic prefix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A device went online or offline.
    DeviceStatus {
        device_id: String,
        online: bool,
        timestamp: u64,
    },
    /// Thing-model telemetry reported by a device.
    ThingModel {
        device_id: String,
        product_id: String,
        properties: Value,
        timestamp: u64,
    },
    /// A driver instance changed its run status.
    DriverStatus {
        instance_id: String,
        run_status: RunStatus,
        timestamp: u64,
    },
}

impl GatewayEvent {
    /// The serialized `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayEvent::DeviceStatus { .. } => "device_status",
            GatewayEvent::ThingModel { .. } => "thing_model",
            GatewayEvent::DriverStatus { .. } => "driver_status",
        }
    }

    /// Topic suffix appended to the outbound prefix.
    pub fn topic_suffix(&self) -> &'static str {
        match self {
            GatewayEvent::DeviceStatus { .. } => "device/status",
            GatewayEvent::ThingModel { .. } => "thing/model",
            GatewayEvent::DriverStatus { .. } => "driver/status",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization() {
        let event = GatewayEvent::DriverStatus {
            instance_id: "modbus-1".to_string(),
            run_status: RunStatus::Running,
            timestamp: 1,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"driver_status\""));
        assert!(json.contains("\"run_status\":\"running\""));
        assert_eq!(event.topic_suffix(), "driver/status");
        assert_eq!(event.kind(), "driver_status");

        let parsed: GatewayEvent = serde_json::from_str(
            r#"{"type":"device_status","device_id":"d1","online":false,"timestamp":5}"#,
        )
        .unwrap();
        assert_eq!(parsed.kind(), "device_status");
        assert_eq!(parsed.topic_suffix(), "device/status");
    }
}
