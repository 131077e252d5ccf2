//! Gateway configuration.
//!
//! Loaded from an optional YAML/TOML/JSON file, then overridden by
//! `EDGELINK__SECTION__KEY` environment variables, e.g.
//! `EDGELINK__BROKER__HOST=10.0.0.5`. Every field has a default.

use edgelink_broker::LinkOptions;
use edgelink_realtime::SessionConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use validator::{Validate, ValidationError};

use crate::error::NodeError;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "EDGELINK";

/// Configuration for the gateway node.
#[derive(Debug, Clone, Default, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    #[validate(nested)]
    pub realtime: RealtimeConfig,
    #[validate(nested)]
    pub broker: BrokerConfig,
    #[validate(nested)]
    pub auth: AuthConfig,
    #[validate(nested)]
    pub log: LogConfig,
    #[validate(nested)]
    pub i18n: I18nConfig,
}

impl GatewayConfig {
    /// Load from `path` (if given) and the environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, NodeError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: GatewayConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

/// WebSocket session settings.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_keepalive"))]
pub struct RealtimeConfig {
    #[validate(range(min = 1))]
    pub ping_period_secs: u64,
    #[validate(range(min = 1))]
    pub pong_wait_secs: u64,
    #[validate(range(min = 1))]
    pub write_wait_secs: u64,
    #[validate(range(min = 128))]
    pub max_frame_size: usize,
    #[validate(range(min = 1))]
    pub send_buffer: usize,
    #[validate(range(min = 1))]
    pub event_buffer: usize,
    pub max_decode_failures: Option<u32>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        let session = SessionConfig::default();
        Self {
            ping_period_secs: session.ping_period.as_secs(),
            pong_wait_secs: session.pong_wait.as_secs(),
            write_wait_secs: session.write_wait.as_secs(),
            max_frame_size: session.max_frame_size,
            send_buffer: session.send_buffer,
            event_buffer: edgelink_realtime::event::DEFAULT_EVENT_CAPACITY,
            max_decode_failures: session.max_decode_failures,
        }
    }
}

fn validate_keepalive(config: &RealtimeConfig) -> Result<(), ValidationError> {
    if config.ping_period_secs >= config.pong_wait_secs {
        let mut err = ValidationError::new("ping_period");
        err.message = Some("ping_period_secs must be shorter than pong_wait_secs".into());
        return Err(err);
    }
    Ok(())
}

impl RealtimeConfig {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            ping_period: Duration::from_secs(self.ping_period_secs),
            pong_wait: Duration::from_secs(self.pong_wait_secs),
            write_wait: Duration::from_secs(self.write_wait_secs),
            max_frame_size: self.max_frame_size,
            send_buffer: self.send_buffer,
            max_decode_failures: self.max_decode_failures,
        }
    }
}

/// MQTT broker settings.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct BrokerConfig {
    pub enabled: bool,
    #[validate(length(min = 1))]
    pub host: String,
    pub port: u16,
    #[validate(length(min = 1, max = 128))]
    pub client_id: String,
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    #[validate(length(min = 1))]
    pub inbound_topic: String,
    pub publish_prefix: String,
    #[validate(range(min = 1))]
    pub queue_capacity: usize,
    #[validate(range(min = 1))]
    pub connect_timeout_secs: u64,
    #[validate(range(min = 1))]
    pub ack_timeout_secs: u64,
    #[validate(range(min = 5))]
    pub keep_alive_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: "edgelink-gateway".to_string(),
            username: None,
            password: None,
            inbound_topic: "edgelink/inbound/#".to_string(),
            publish_prefix: "edgelink/events".to_string(),
            queue_capacity: edgelink_broker::options::DEFAULT_QUEUE_CAPACITY,
            connect_timeout_secs: 10,
            ack_timeout_secs: 5,
            keep_alive_secs: 30,
        }
    }
}

impl BrokerConfig {
    pub fn link_options(&self) -> LinkOptions {
        let mut options = LinkOptions::new(self.client_id.clone(), self.host.clone(), self.port)
            .subscribe(self.inbound_topic.clone())
            .with_publish_prefix(self.publish_prefix.clone())
            .with_connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .with_ack_timeout(Duration::from_secs(self.ack_timeout_secs));
        options.queue_capacity = self.queue_capacity;
        options.keep_alive = Duration::from_secs(self.keep_alive_secs);
        if let Some(username) = &self.username {
            options = options
                .with_credentials(username.clone(), self.password.clone().unwrap_or_default());
        }
        options
    }
}

/// Token verification settings.
#[derive(Clone, Default, Deserialize, Serialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_auth"))]
pub struct AuthConfig {
    /// HMAC secret for bearer tokens. Tokens are ignored when unset.
    #[serde(skip_serializing)]
    pub jwt_secret: Option<String>,
    /// Reject upgrades that carry no token.
    pub required: bool,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("required", &self.required)
            .finish()
    }
}

fn validate_auth(config: &AuthConfig) -> Result<(), ValidationError> {
    let has_secret = config.jwt_secret.as_deref().is_some_and(|s| !s.is_empty());
    if config.required && !has_secret {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("auth.required needs auth.jwt_secret".into());
        return Err(err);
    }
    Ok(())
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct LogConfig {
    #[validate(custom(function = "validate_level"))]
    pub level: String,
    /// `pretty` or `json`.
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

fn validate_level(level: &str) -> Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new("log_level")),
    }
}

/// Translation settings.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct I18nConfig {
    #[validate(length(min = 2))]
    pub default_language: String,
}

impl Default for I18nConfig {
    fn default() -> Self {
        Self {
            default_language: edgelink_types::DEFAULT_LANGUAGE.to_string(),
        }
    }
}
