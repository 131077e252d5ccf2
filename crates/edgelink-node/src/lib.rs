//! # Edgelink Node
//!
//! The gateway process: a WebSocket endpoint for browser clients, a
//! link to the MQTT broker and the configuration that ties them together.
//!
//! ```text
//!   browser ──ws──▶ realtime_api ──▶ serve_connection ──▶ Dispatcher ──▶ services
//!      ▲                                   │                   │
//!      └────────── RealtimeHub ◀── events ─┴───────────────────┤
//!                      ▲                                       ▼
//!                   bridge ◀── incoming ── BrokerLink ◀── publish_event
//! ```
//!
//! ## Modules
//!
//! - [`config`] - Layered configuration (file + environment)
//! - [`gateway`] - Composition root
//! - [`api`] / [`realtime_api`] - HTTP routes and the `/ws` endpoint
//! - [`events_api`] - `POST /api/events` ingest for local event producers
//! - [`auth`] - Bearer-token verification
//! - [`bridge`] - Inbound broker messages to WebSocket pushes
//! - [`services`] - In-memory driver services
//! - [`health`] - Liveness and readiness checks
//! - [`observability`] - Logging, request IDs and Prometheus metrics
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use edgelink_broker::BrokerRegistry;
//! use edgelink_node::{config::GatewayConfig, gateway::Gateway, services::MemoryServices};
//!
//! # async fn run() -> Result<(), edgelink_node::error::NodeError> {
//! let config = GatewayConfig::load(None)?;
//! let gateway = Gateway::build(
//!     &config,
//!     Arc::new(BrokerRegistry::mqtt()),
//!     Arc::new(MemoryServices::with_demo_data()),
//! )
//! .await?;
//! let listener = tokio::net::TcpListener::bind(config.server.listen_addr).await?;
//! gateway.serve(listener, async { let _ = tokio::signal::ctrl_c().await; }).await
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod bridge;
pub mod config;
pub mod error;
pub mod events_api;
pub mod gateway;
pub mod health;
pub mod observability;
pub mod realtime_api;
pub mod services;
