//! Common types used throughout `edgelink`.
//!
//! This crate provides the wire-level shapes exchanged with browser
//! clients, the numeric command and error code tables, and the structured
//! events the gateway publishes onto the message broker.

mod command;
mod envelope;
mod error;
pub mod error_code;
mod event;

pub use command::{CommandCode, PushCode};
pub use envelope::{CommandEnvelope, ResponseEnvelope, WsResult};
pub use error::{DomainError, Params};
pub use event::{GatewayEvent, RunStatus};

/// Language used when a client has not chosen one.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Returns the current Unix timestamp in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
