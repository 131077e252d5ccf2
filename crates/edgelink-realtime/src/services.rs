//! Domain services the command handlers call into.
//!
//! The gateway does not own driver or log state; it reaches those through
//! the traits below, resolved per request from a [`ServiceRegistry`].

use crate::session::{Claims, SessionId};
use async_trait::async_trait;
use edgelink_types::{DomainError, RunStatus};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Per-request context passed to every service call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Unique id of this request.
    pub request_id: String,
    /// Session the request came from.
    pub session_id: SessionId,
    /// Serial of the connection the request came from. Unlike the session
    /// id, it is never shared by two connections.
    pub session_serial: u64,
    /// Caller identity.
    pub claims: Option<Claims>,
    /// Caller's display language.
    pub language: String,
}

/// A driver library and the image backing it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverLibrary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub image: String,
}

/// A configured driver instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverInstance {
    pub id: String,
    pub name: String,
    pub library_id: String,
    pub run_status: RunStatus,
}

/// Driver library operations.
#[async_trait]
pub trait DriverApp: Send + Sync {
    /// Upgrade a library's image, to `version` or the latest available.
    async fn upgrade_device_library(
        &self,
        ctx: &RequestContext,
        library_id: &str,
        version: Option<&str>,
    ) -> Result<DriverLibrary, DomainError>;
}

/// Driver instance operations.
#[async_trait]
pub trait DriverServiceApp: Send + Sync {
    async fn get(&self, ctx: &RequestContext, id: &str) -> Result<DriverInstance, DomainError>;

    async fn update_run_status(
        &self,
        ctx: &RequestContext,
        id: &str,
        status: RunStatus,
    ) -> Result<DriverInstance, DomainError>;

    async fn del(&self, ctx: &RequestContext, id: &str) -> Result<(), DomainError>;
}

/// Streams the log of a driver instance.
///
/// Tails belong to a connection: implementations key them by
/// [`RequestContext::session_serial`] and instance id.
#[async_trait]
pub trait LogTailApp: Send + Sync {
    /// Start tailing; lines arrive on the returned channel until stopped.
    /// Restarting replaces the connection's previous tail of the instance.
    async fn start(
        &self,
        ctx: &RequestContext,
        instance_id: &str,
    ) -> Result<mpsc::Receiver<String>, DomainError>;

    /// Stop tailing. Stopping an idle tail is not an error.
    async fn stop(&self, ctx: &RequestContext, instance_id: &str) -> Result<(), DomainError>;
}

/// Resolves domain services for a request.
pub trait ServiceRegistry: Send + Sync {
    fn driver_app(&self, ctx: &RequestContext) -> Arc<dyn DriverApp>;
    fn driver_service_app(&self, ctx: &RequestContext) -> Arc<dyn DriverServiceApp>;
    fn log_tail_app(&self, ctx: &RequestContext) -> Arc<dyn LogTailApp>;
}
