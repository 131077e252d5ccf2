//! Node-level errors.

use edgelink_broker::BrokerError;
use edgelink_realtime::RealtimeError;
use thiserror::Error;

/// Errors raised while configuring or running the gateway.
#[derive(Debug, Error)]
pub enum NodeError {
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] validator::ValidationErrors),

    #[error("default language {0} has no translations")]
    UnsupportedLanguage(String),

    #[error("broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("realtime error: {0}")]
    Realtime(#[from] RealtimeError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
