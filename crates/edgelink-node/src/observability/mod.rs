//! # Observability
//!
//! - **Structured logging**: pretty or JSON output through `tracing`
//! - **Request IDs**: every HTTP request gets an `x-request-id`, echoed on the
//!   response and recorded on its span
//! - **Prometheus metrics**: hub and broker totals, served on `/metrics`
//!
//! ```rust,ignore
//! use edgelink_node::observability::{init_logging, request_id_layer, LogFormat, MetricsState};
//!
//! init_logging("info", LogFormat::Json);
//! let metrics = MetricsState::new();
//! let app: axum::Router<()> = axum::Router::new().layer(request_id_layer());
//! ```

mod logging;
mod metrics;
pub mod middleware;

pub use logging::{init_logging, LogFormat};
pub use metrics::{MetricsState, METRICS_CONTENT_TYPE};
pub use middleware::{request_id_layer, RequestId, REQUEST_ID_HEADER};
