//! In-memory domain services.
//!
//! Lets the gateway run stand-alone: driver libraries and instances live in
//! process memory, and driver logs are plain line buffers that feed any
//! live tails.

use async_trait::async_trait;
use edgelink_realtime::{
    DriverApp, DriverInstance, DriverLibrary, DriverServiceApp, LogTailApp, RequestContext,
    ServiceRegistry,
};
use edgelink_types::{error_code, DomainError, RunStatus};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Lines replayed to a tail when it starts.
const TAIL_BACKLOG: usize = 100;

/// Capacity of each tail channel; lines beyond it are dropped.
const TAIL_CAPACITY: usize = 256;

/// Live tails allowed on one instance.
const MAX_TAILS_PER_INSTANCE: usize = 32;

/// Key of a live tail: connection serial and instance id.
type TailKey = (u64, String);

#[derive(Debug, Clone)]
struct LibraryRecord {
    library: DriverLibrary,
    repository: String,
    latest: String,
    /// Versions with a published image.
    available: Vec<String>,
}

#[derive(Default)]
struct Store {
    libraries: RwLock<HashMap<String, LibraryRecord>>,
    instances: RwLock<HashMap<String, DriverInstance>>,
    logs: RwLock<HashMap<String, Vec<String>>>,
    tails: RwLock<HashMap<TailKey, mpsc::Sender<String>>>,
}

/// Service registry backed by process memory.
#[derive(Clone, Default)]
pub struct MemoryServices {
    store: Arc<Store>,
}

impl MemoryServices {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with a couple of libraries and instances.
    pub fn with_demo_data() -> Self {
        let services = Self::new();
        services.add_library("modbus", "Modbus TCP", "edgelink/driver-modbus", "1.0.0", "1.1.0");
        services.add_library("opcua", "OPC UA", "edgelink/driver-opcua", "2.3.0", "2.3.0");
        services.add_instance("modbus-1", "Modbus 1", "modbus", RunStatus::Running);
        services.add_instance("opcua-1", "OPC UA 1", "opcua", RunStatus::Stopped);
        services
    }

    /// Add a driver library at `version`, upgradable to `latest`. Images
    /// exist for those two versions only.
    pub fn add_library(&self, id: &str, name: &str, repository: &str, version: &str, latest: &str) {
        let mut available = vec![version.to_string()];
        if latest != version {
            available.push(latest.to_string());
        }
        let record = LibraryRecord {
            library: DriverLibrary {
                id: id.to_string(),
                name: name.to_string(),
                version: version.to_string(),
                image: format!("{}:{}", repository, version),
            },
            repository: repository.to_string(),
            latest: latest.to_string(),
            available,
        };
        self.store.libraries.write().insert(id.to_string(), record);
    }

    /// Add a driver instance.
    pub fn add_instance(&self, id: &str, name: &str, library_id: &str, status: RunStatus) {
        let instance = DriverInstance {
            id: id.to_string(),
            name: name.to_string(),
            library_id: library_id.to_string(),
            run_status: status,
        };
        self.store.instances.write().insert(id.to_string(), instance);
    }

    /// Append a line to an instance's log and hand it to live tails.
    pub fn append_log(&self, instance_id: &str, line: impl Into<String>) {
        self.store.append_log(instance_id, line.into());
    }

    /// Number of live tails.
    pub fn tail_count(&self) -> usize {
        self.store.tails.read().len()
    }

    pub fn instance(&self, id: &str) -> Option<DriverInstance> {
        self.store.instances.read().get(id).cloned()
    }
}

impl Store {
    fn append_log(&self, instance_id: &str, line: String) {
        self.logs
            .write()
            .entry(instance_id.to_string())
            .or_default()
            .push(line.clone());

        let mut tails = self.tails.write();
        tails.retain(|(_, id), tx| {
            if id != instance_id {
                return true;
            }
            match tx.try_send(line.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    debug!(instance_id = %id, "Tail lagging, line dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    fn instance(&self, id: &str) -> Result<DriverInstance, DomainError> {
        self.instances
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| DomainError::not_found(id))
    }
}

#[async_trait]
impl DriverApp for Store {
    async fn upgrade_device_library(
        &self,
        _ctx: &RequestContext,
        library_id: &str,
        version: Option<&str>,
    ) -> Result<DriverLibrary, DomainError> {
        let mut libraries = self.libraries.write();
        let record = libraries.get_mut(library_id).ok_or_else(|| {
            DomainError::new(error_code::DRIVER_NOT_FOUND).with_param("name", library_id)
        })?;

        let target = match version {
            Some(v) if v.trim().is_empty() => {
                return Err(DomainError::invalid_params("version must not be empty"));
            }
            Some(v) => v.trim().to_string(),
            None => record.latest.clone(),
        };
        if !record.available.contains(&target) {
            return Err(DomainError::new(error_code::DRIVER_UPGRADE_FAILED)
                .with_param("name", record.library.name.clone())
                .with_param("version", target));
        }
        record.library.version = target.clone();
        record.library.image = format!("{}:{}", record.repository, target);
        Ok(record.library.clone())
    }
}

#[async_trait]
impl DriverServiceApp for Store {
    async fn get(&self, _ctx: &RequestContext, id: &str) -> Result<DriverInstance, DomainError> {
        self.instance(id)
    }

    async fn update_run_status(
        &self,
        _ctx: &RequestContext,
        id: &str,
        status: RunStatus,
    ) -> Result<DriverInstance, DomainError> {
        let instance = {
            let mut instances = self.instances.write();
            let instance = instances
                .get_mut(id)
                .ok_or_else(|| DomainError::not_found(id))?;
            instance.run_status = status;
            instance.clone()
        };
        self.append_log(id, format!("instance {} {}", instance.name, status));
        Ok(instance)
    }

    async fn del(&self, _ctx: &RequestContext, id: &str) -> Result<(), DomainError> {
        if self.instances.write().remove(id).is_none() {
            return Err(DomainError::not_found(id));
        }
        self.logs.write().remove(id);
        self.tails.write().retain(|(_, instance), _| instance != id);
        Ok(())
    }
}

#[async_trait]
impl LogTailApp for Store {
    async fn start(
        &self,
        ctx: &RequestContext,
        instance_id: &str,
    ) -> Result<mpsc::Receiver<String>, DomainError> {
        let instance = self.instance(instance_id)?;
        let key = (ctx.session_serial, instance_id.to_string());

        let others = self
            .tails
            .read()
            .keys()
            .filter(|k| k.1 == instance_id && **k != key)
            .count();
        if others >= MAX_TAILS_PER_INSTANCE {
            return Err(
                DomainError::new(error_code::LOG_TAIL_FAILED).with_param("name", instance.name)
            );
        }

        let (tx, rx) = mpsc::channel(TAIL_CAPACITY);
        if let Some(lines) = self.logs.read().get(instance_id) {
            let skip = lines.len().saturating_sub(TAIL_BACKLOG);
            for line in &lines[skip..] {
                let _ = tx.try_send(line.clone());
            }
        }
        self.tails.write().insert(key, tx);
        Ok(rx)
    }

    async fn stop(&self, ctx: &RequestContext, instance_id: &str) -> Result<(), DomainError> {
        self.tails
            .write()
            .remove(&(ctx.session_serial, instance_id.to_string()));
        Ok(())
    }
}

impl ServiceRegistry for MemoryServices {
    fn driver_app(&self, _ctx: &RequestContext) -> Arc<dyn DriverApp> {
        self.store.clone()
    }

    fn driver_service_app(&self, _ctx: &RequestContext) -> Arc<dyn DriverServiceApp> {
        self.store.clone()
    }

    fn log_tail_app(&self, _ctx: &RequestContext) -> Arc<dyn LogTailApp> {
        self.store.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(session: &str) -> RequestContext {
        conn(session, 0)
    }

    fn conn(session: &str, serial: u64) -> RequestContext {
        RequestContext {
            request_id: "r".to_string(),
            session_id: session.to_string(),
            session_serial: serial,
            claims: None,
            language: "en".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upgrade_to_latest_or_pinned() {
        let services = MemoryServices::with_demo_data();
        let app = services.driver_app(&ctx("s"));

        let lib = app.upgrade_device_library(&ctx("s"), "modbus", None).await.unwrap();
        assert_eq!(lib.version, "1.1.0");
        assert_eq!(lib.image, "edgelink/driver-modbus:1.1.0");

        let lib = app
            .upgrade_device_library(&ctx("s"), "modbus", Some("1.0.0"))
            .await
            .unwrap();
        assert_eq!(lib.version, "1.0.0");

        let err = app
            .upgrade_device_library(&ctx("s"), "modbus", Some("9.9.9"))
            .await
            .unwrap_err();
        assert_eq!(err.code, error_code::DRIVER_UPGRADE_FAILED);
        assert_eq!(err.params["name"], "Modbus TCP");
        assert_eq!(services.store.libraries.read()["modbus"].library.version, "1.0.0");

        let err = app.upgrade_device_library(&ctx("s"), "bacnet", None).await.unwrap_err();
        assert_eq!(err.code, error_code::DRIVER_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_run_status_and_delete() {
        let services = MemoryServices::with_demo_data();
        let app = services.driver_service_app(&ctx("s"));

        let instance = app
            .update_run_status(&ctx("s"), "modbus-1", RunStatus::Stopped)
            .await
            .unwrap();
        assert_eq!(instance.run_status, RunStatus::Stopped);

        app.del(&ctx("s"), "modbus-1").await.unwrap();
        assert!(services.instance("modbus-1").is_none());
        assert_eq!(
            app.del(&ctx("s"), "modbus-1").await.unwrap_err().code,
            error_code::RECORD_NOT_FOUND
        );
    }

    #[tokio::test]
    async fn test_tail_replays_backlog_and_follows() {
        let services = MemoryServices::with_demo_data();
        services.append_log("modbus-1", "old line");

        let tails = services.log_tail_app(&ctx("s1"));
        let mut rx = tails.start(&ctx("s1"), "modbus-1").await.unwrap();
        assert_eq!(rx.recv().await.unwrap(), "old line");

        services.append_log("modbus-1", "new line");
        services.append_log("opcua-1", "other instance");
        assert_eq!(rx.recv().await.unwrap(), "new line");
        assert!(rx.try_recv().is_err());

        tails.stop(&ctx("s1"), "modbus-1").await.unwrap();
        assert_eq!(services.tail_count(), 0);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_tails_are_per_connection() {
        let services = MemoryServices::with_demo_data();
        let tails = services.log_tail_app(&ctx("s1"));
        let mut a = tails.start(&conn("s1", 1), "opcua-1").await.unwrap();
        let mut b = tails.start(&conn("s2", 2), "opcua-1").await.unwrap();

        tails.stop(&conn("s1", 1), "opcua-1").await.unwrap();
        services.append_log("opcua-1", "hello");

        assert!(a.recv().await.is_none());
        assert_eq!(b.recv().await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn test_connections_sharing_a_session_id_keep_their_tails() {
        let services = MemoryServices::with_demo_data();
        let tails = services.log_tail_app(&ctx("127.0.0.1"));
        let tab_a = conn("127.0.0.1", 7);
        let tab_b = conn("127.0.0.1", 8);

        let mut a = tails.start(&tab_a, "opcua-1").await.unwrap();
        let mut b = tails.start(&tab_b, "opcua-1").await.unwrap();
        assert_eq!(services.tail_count(), 2);

        services.append_log("opcua-1", "line-1");
        assert_eq!(a.recv().await.unwrap(), "line-1");
        assert_eq!(b.recv().await.unwrap(), "line-1");

        tails.stop(&tab_a, "opcua-1").await.unwrap();
        services.append_log("opcua-1", "line-2");
        assert_eq!(b.recv().await.unwrap(), "line-2");
        assert!(a.recv().await.is_none());
        assert_eq!(services.tail_count(), 1);
    }

    #[tokio::test]
    async fn test_tail_limit_per_instance() {
        let services = MemoryServices::with_demo_data();
        let tails = services.log_tail_app(&ctx("s"));
        let mut open = Vec::new();
        for serial in 0..MAX_TAILS_PER_INSTANCE as u64 {
            open.push(tails.start(&conn("s", serial), "opcua-1").await.unwrap());
        }

        let err = tails.start(&conn("s", 999), "opcua-1").await.unwrap_err();
        assert_eq!(err.code, error_code::LOG_TAIL_FAILED);
        assert_eq!(err.params["name"], "OPC UA 1");

        // Restarting an existing tail is not a new one.
        assert!(tails.start(&conn("s", 0), "opcua-1").await.is_ok());
        assert!(tails.start(&conn("s", 999), "modbus-1").await.is_ok());
    }
}
