//! Built-in command handlers.

use crate::dispatch::{AfterReply, CommandHandler, HandlerDeps};
use crate::event::EventKind;
use crate::services::{DriverInstance, RequestContext};
use crate::session::Session;
use async_trait::async_trait;
use edgelink_broker::DeliveryMode;
use edgelink_types::{
    error_code, CommandCode, DomainError, GatewayEvent, Params, PushCode, ResponseEnvelope,
    RunStatus, WsResult,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

fn decode<T: DeserializeOwned>(payload: Value) -> Result<T, DomainError> {
    serde_json::from_value(payload).map_err(|e| DomainError::invalid_params(e.to_string()))
}

fn require(value: &str, field: &str) -> Result<(), DomainError> {
    if value.trim().is_empty() {
        return Err(DomainError::invalid_params(format!("{} is required", field)));
    }
    Ok(())
}

fn params<const N: usize>(pairs: [(&str, &str); N]) -> Params {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[derive(Debug, Deserialize)]
struct UpgradeRequest {
    id: String,
    #[serde(default)]
    version: Option<String>,
}

/// Upgrades the image of a driver library. Progress is pushed to the
/// requesting session only.
pub struct UpgradeDriverImage {
    deps: HandlerDeps,
}

impl UpgradeDriverImage {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }

    async fn run(&self, session: &Session, payload: Value) -> Result<WsResult, DomainError> {
        let req: UpgradeRequest = decode(payload)?;
        require(&req.id, "id")?;

        let ctx = session.request_context();
        let library = self
            .deps
            .services
            .driver_app(&ctx)
            .upgrade_device_library(&ctx, &req.id, req.version.as_deref())
            .await?;
        info!(library_id = %library.id, version = %library.version, "Driver image upgraded");

        if let Some(events) = &self.deps.events {
            events.emit_to(
                ctx.session_id.clone(),
                EventKind::ImageProgress,
                json!({"id": library.id, "progress": 100}),
            );
        }

        let message = self.deps.translator.translate(
            &ctx.language,
            "driver.upgrade.success",
            &params([("name", library.name.as_str()), ("version", library.version.as_str())]),
        );
        Ok(WsResult::ok_with_message(message, json!(library)))
    }
}

#[async_trait]
impl CommandHandler for UpgradeDriverImage {
    fn code(&self) -> CommandCode {
        CommandCode::UpgradeDriverImage
    }

    async fn handle(&self, session: &Arc<Session>, payload: Value) -> WsResult {
        self.run(session, payload)
            .await
            .unwrap_or_else(WsResult::from_error)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RunStatusRequest {
    id: String,
    run_status: RunStatus,
}

/// Starts or stops a driver instance.
///
/// The new status is pushed to every session and published on the broker
/// link, if one is configured.
pub struct DriverRunStatus {
    deps: HandlerDeps,
}

impl DriverRunStatus {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }

    async fn run(&self, session: &Session, payload: Value) -> Result<WsResult, DomainError> {
        let req: RunStatusRequest = decode(payload)?;
        require(&req.id, "id")?;

        let ctx = session.request_context();
        let instance = self
            .deps
            .services
            .driver_service_app(&ctx)
            .update_run_status(&ctx, &req.id, req.run_status)
            .await?;
        info!(instance_id = %instance.id, status = %instance.run_status, "Driver run status changed");
        self.announce(&ctx, &instance);

        let status = instance.run_status.to_string();
        let message = self.deps.translator.translate(
            &ctx.language,
            "driver.status.success",
            &params([("name", instance.name.as_str()), ("status", status.as_str())]),
        );
        Ok(WsResult::ok_with_message(message, json!(instance)))
    }

    fn announce(&self, ctx: &RequestContext, instance: &DriverInstance) {
        if let Some(events) = &self.deps.events {
            events.emit(EventKind::DriverStatus, json!(instance));
        }

        let Some(link) = &self.deps.broker else {
            return;
        };
        let event = GatewayEvent::DriverStatus {
            instance_id: instance.id.clone(),
            run_status: instance.run_status,
            timestamp: edgelink_types::now_millis(),
        };
        match link.publish_event(&event, DeliveryMode::FireAndForget, ctx.request_id.clone()) {
            Ok(outcome) if !outcome.is_sent() => {
                debug!(request_id = %ctx.request_id, ?outcome, "Driver status not published");
            }
            Ok(_) => {}
            Err(e) => warn!(request_id = %ctx.request_id, error = %e, "Failed to encode driver status"),
        }
    }
}

#[async_trait]
impl CommandHandler for DriverRunStatus {
    fn code(&self) -> CommandCode {
        CommandCode::DriverRunStatus
    }

    async fn handle(&self, session: &Arc<Session>, payload: Value) -> WsResult {
        self.run(session, payload)
            .await
            .unwrap_or_else(WsResult::from_error)
    }
}

#[derive(Debug, Deserialize)]
struct LanguageRequest {
    lang: String,
}

/// Switches the session's display language.
pub struct ChangeLanguage {
    deps: HandlerDeps,
}

impl ChangeLanguage {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }

    fn run(&self, session: &Session, payload: Value) -> Result<WsResult, DomainError> {
        let req: LanguageRequest = decode(payload)?;
        let lang = req.lang.trim().to_string();
        require(&lang, "lang")?;
        if !self.deps.translator.supports(&lang) {
            return Err(DomainError::new(error_code::LANGUAGE_NOT_SUPPORTED).with_param("lang", lang));
        }

        session.set_language(lang.clone());
        debug!(session_id = %session.id, lang = %lang, "Session language changed");

        let message = self.deps.translator.translate(
            &lang,
            "session.language.success",
            &params([("lang", lang.as_str())]),
        );
        Ok(WsResult::ok_with_message(message, json!({ "lang": lang })))
    }
}

#[async_trait]
impl CommandHandler for ChangeLanguage {
    fn code(&self) -> CommandCode {
        CommandCode::ChangeLanguage
    }

    async fn handle(&self, session: &Arc<Session>, payload: Value) -> WsResult {
        self.run(session, payload)
            .unwrap_or_else(WsResult::from_error)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum TailOp {
    Start,
    Stop,
}

#[derive(Debug, Deserialize)]
struct LogTailRequest {
    id: String,
    op: TailOp,
}

/// Starts or stops streaming a driver instance's log to the session.
///
/// Lines are pushed as [`PushCode::LogLine`] messages until the tail is
/// stopped or the session closes.
pub struct DriverLogTail {
    deps: HandlerDeps,
}

impl DriverLogTail {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }

    async fn run(
        &self,
        session: &Arc<Session>,
        payload: Value,
    ) -> Result<(WsResult, Option<AfterReply>), DomainError> {
        let req: LogTailRequest = decode(payload)?;
        require(&req.id, "id")?;

        let ctx = session.request_context();
        let app = self.deps.services.log_tail_app(&ctx);
        let instance = self
            .deps
            .services
            .driver_service_app(&ctx)
            .get(&ctx, &req.id)
            .await?;

        let (key, forward) = match req.op {
            TailOp::Start => {
                let mut lines = app.start(&ctx, &req.id).await?;
                let session = session.clone();
                let tail_ctx = ctx.clone();
                let id = req.id.clone();
                let forward: AfterReply = Box::pin(async move {
                    loop {
                        tokio::select! {
                            _ = session.closed() => {
                                if let Err(e) = app.stop(&tail_ctx, &id).await {
                                    debug!(instance_id = %id, error = %e, "Stopping log tail failed");
                                }
                                break;
                            }
                            line = lines.recv() => {
                                let Some(line) = line else { break };
                                let push = ResponseEnvelope::ok(
                                    PushCode::LogLine,
                                    json!({ "id": id, "line": line }),
                                );
                                if session.send(push).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    debug!(session_id = %session.id, instance_id = %id, "Log tail ended");
                });
                ("driver.log.started", Some(forward))
            }
            TailOp::Stop => {
                app.stop(&ctx, &req.id).await?;
                ("driver.log.stopped", None)
            }
        };

        let message = self
            .deps
            .translator
            .translate(&ctx.language, key, &params([("name", instance.name.as_str())]));
        Ok((WsResult::ok_with_message(message, json!({ "id": req.id })), forward))
    }
}

#[async_trait]
impl CommandHandler for DriverLogTail {
    fn code(&self) -> CommandCode {
        CommandCode::DriverLogTail
    }

    async fn handle(&self, session: &Arc<Session>, payload: Value) -> WsResult {
        let (result, forward) = self.handle_deferred(session, payload).await;
        if let Some(forward) = forward {
            tokio::spawn(forward);
        }
        result
    }

    async fn handle_deferred(
        &self,
        session: &Arc<Session>,
        payload: Value,
    ) -> (WsResult, Option<AfterReply>) {
        match self.run(session, payload).await {
            Ok(handled) => handled,
            Err(e) => (WsResult::from_error(e), None),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeleteRequest {
    id: String,
}

/// Deletes a stopped driver instance.
pub struct DeleteDriverInstance {
    deps: HandlerDeps,
}

impl DeleteDriverInstance {
    pub fn new(deps: HandlerDeps) -> Self {
        Self { deps }
    }

    async fn run(&self, session: &Session, payload: Value) -> Result<WsResult, DomainError> {
        let req: DeleteRequest = decode(payload)?;
        require(&req.id, "id")?;

        let ctx = session.request_context();
        let app = self.deps.services.driver_service_app(&ctx);
        let instance = app.get(&ctx, &req.id).await?;
        if instance.run_status == RunStatus::Running {
            return Err(DomainError::new(error_code::DRIVER_INSTANCE_RUNNING)
                .with_param("name", instance.name));
        }
        app.del(&ctx, &req.id).await?;
        info!(instance_id = %instance.id, "Driver instance deleted");

        let message = self.deps.translator.translate(
            &ctx.language,
            "driver.delete.success",
            &params([("name", instance.name.as_str())]),
        );
        Ok(WsResult::ok_with_message(message, json!({ "id": instance.id })))
    }
}

#[async_trait]
impl CommandHandler for DeleteDriverInstance {
    fn code(&self) -> CommandCode {
        CommandCode::DeleteDriverInstance
    }

    async fn handle(&self, session: &Arc<Session>, payload: Value) -> WsResult {
        self.run(session, payload)
            .await
            .unwrap_or_else(WsResult::from_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::event_channel;
    use crate::i18n::Catalog;
    use crate::services::{
        DriverApp, DriverLibrary, DriverServiceApp, LogTailApp, ServiceRegistry,
    };
    use crate::session::{SessionContext, SessionReceiver};
    use edgelink_broker::{BrokerRegistry, LinkOptions, MemoryBroker};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Fake {
        instances: Mutex<HashMap<String, DriverInstance>>,
        tails: Mutex<HashMap<String, mpsc::Sender<String>>>,
        stops: Mutex<Vec<String>>,
        /// Lines replayed to every new tail.
        history: Mutex<Vec<String>>,
        request_ids: Mutex<Vec<String>>,
    }

    impl Fake {
        fn with_instance(id: &str, status: RunStatus) -> Arc<Self> {
            let fake = Fake::default();
            fake.instances.lock().insert(
                id.to_string(),
                DriverInstance {
                    id: id.to_string(),
                    name: format!("Instance {}", id),
                    library_id: "modbus".to_string(),
                    run_status: status,
                },
            );
            Arc::new(fake)
        }
    }

    #[async_trait]
    impl DriverApp for Fake {
        async fn upgrade_device_library(
            &self,
            _ctx: &RequestContext,
            library_id: &str,
            version: Option<&str>,
        ) -> Result<DriverLibrary, DomainError> {
            if library_id != "modbus" {
                return Err(DomainError::new(error_code::DRIVER_NOT_FOUND).with_param("name", library_id));
            }
            Ok(DriverLibrary {
                id: library_id.to_string(),
                name: "Modbus".to_string(),
                version: version.unwrap_or("2.0.0").to_string(),
                image: "edgelink/modbus".to_string(),
            })
        }
    }

    #[async_trait]
    impl DriverServiceApp for Fake {
        async fn get(&self, _ctx: &RequestContext, id: &str) -> Result<DriverInstance, DomainError> {
            self.instances
                .lock()
                .get(id)
                .cloned()
                .ok_or_else(|| DomainError::not_found(format!("Instance {}", id)))
        }

        async fn update_run_status(
            &self,
            ctx: &RequestContext,
            id: &str,
            status: RunStatus,
        ) -> Result<DriverInstance, DomainError> {
            self.request_ids.lock().push(ctx.request_id.clone());
            self.get(ctx, id).await?;
            let mut instances = self.instances.lock();
            let instance = instances.get_mut(id).ok_or_else(DomainError::system)?;
            instance.run_status = status;
            Ok(instance.clone())
        }

        async fn del(&self, _ctx: &RequestContext, id: &str) -> Result<(), DomainError> {
            self.instances.lock().remove(id);
            Ok(())
        }
    }

    #[async_trait]
    impl LogTailApp for Fake {
        async fn start(
            &self,
            _ctx: &RequestContext,
            instance_id: &str,
        ) -> Result<mpsc::Receiver<String>, DomainError> {
            let (tx, rx) = mpsc::channel(8);
            for line in self.history.lock().iter() {
                let _ = tx.try_send(line.clone());
            }
            self.tails.lock().insert(instance_id.to_string(), tx);
            Ok(rx)
        }

        async fn stop(&self, _ctx: &RequestContext, instance_id: &str) -> Result<(), DomainError> {
            self.tails.lock().remove(instance_id);
            self.stops.lock().push(instance_id.to_string());
            Ok(())
        }
    }

    struct Registry(Arc<Fake>);

    impl ServiceRegistry for Registry {
        fn driver_app(&self, _ctx: &RequestContext) -> Arc<dyn DriverApp> {
            self.0.clone()
        }
        fn driver_service_app(&self, _ctx: &RequestContext) -> Arc<dyn DriverServiceApp> {
            self.0.clone()
        }
        fn log_tail_app(&self, _ctx: &RequestContext) -> Arc<dyn LogTailApp> {
            self.0.clone()
        }
    }

    fn deps(fake: &Arc<Fake>) -> HandlerDeps {
        HandlerDeps::new(Arc::new(Registry(fake.clone())), Arc::new(Catalog::builtin()))
    }

    fn session() -> (Arc<Session>, SessionReceiver) {
        Session::new("s", SessionContext::default(), 16)
    }

    #[tokio::test]
    async fn test_upgrade_driver_image() {
        let fake = Fake::with_instance("i1", RunStatus::Stopped);
        let handler = UpgradeDriverImage::new(deps(&fake));
        let (session, _rx) = session();

        let ok = handler
            .handle(&session, json!({"id": "modbus", "version": "2.1.0"}))
            .await;
        assert!(ok.success());
        assert_eq!(ok.success_msg(), "Driver Modbus upgraded to 2.1.0");
        assert_eq!(ok.result()["version"], "2.1.0");

        let missing = handler.handle(&session, json!({"id": "opcua"})).await;
        assert_eq!(missing.error_code(), error_code::DRIVER_NOT_FOUND);
        assert_eq!(missing.error_params()["name"], "opcua");
    }

    #[tokio::test]
    async fn test_invalid_payload_yields_invalid_params() {
        let fake = Fake::with_instance("i1", RunStatus::Stopped);
        let handler = DriverRunStatus::new(deps(&fake));
        let (session, _rx) = session();

        let res = handler.handle(&session, json!({"id": "i1"})).await;
        assert!(!res.success());
        assert_eq!(res.error_code(), error_code::INVALID_PARAMS);
        assert!(res.error_params().contains_key("reason"));

        let res = handler
            .handle(&session, json!({"id": " ", "runStatus": "running"}))
            .await;
        assert_eq!(res.error_code(), error_code::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_run_status_pushes_and_publishes() {
        let fake = Fake::with_instance("i1", RunStatus::Stopped);
        let broker = MemoryBroker::new();
        let registry = BrokerRegistry::new(broker.connector());
        let link = registry
            .connect(
                LinkOptions::new("gw", "memory", 0).with_publish_prefix("edgelink/events"),
                vec![],
            )
            .await
            .unwrap();
        let (emitter, mut stream) = event_channel(8);
        let handler = DriverRunStatus::new(deps(&fake).with_broker(link).with_events(emitter));
        let (session, _rx) = session();

        let res = handler
            .handle(&session, json!({"id": "i1", "runStatus": "running"}))
            .await;
        assert!(res.success(), "{:?}", res);
        assert_eq!(res.result()["runStatus"], "running");

        let event = stream.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::DriverStatus);

        let published = broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "edgelink/events/driver/status");
        let request_id = fake.request_ids.lock()[0].clone();
        assert_eq!(published[0].correlation_id, request_id);
        registry.close_all().await;
    }

    #[tokio::test]
    async fn test_upgrade_progress_targets_requesting_session() {
        let fake = Fake::with_instance("i1", RunStatus::Stopped);
        let (emitter, mut stream) = event_channel(8);
        let handler = UpgradeDriverImage::new(deps(&fake).with_events(emitter));
        let (session, _rx) = session();

        assert!(handler.handle(&session, json!({"id": "modbus"})).await.success());
        let event = stream.recv().await.unwrap();
        assert_eq!(event.kind, EventKind::ImageProgress);
        assert_eq!(event.target.as_deref(), Some("s"));
    }

    #[tokio::test]
    async fn test_change_language() {
        let fake = Fake::with_instance("i1", RunStatus::Stopped);
        let handler = ChangeLanguage::new(deps(&fake));
        let (session, _rx) = session();

        let res = handler.handle(&session, json!({"lang": "zh"})).await;
        assert!(res.success());
        assert_eq!(session.language(), "zh");
        assert_eq!(res.success_msg(), "显示语言已切换为 zh");

        let res = handler.handle(&session, json!({"lang": "fr"})).await;
        assert_eq!(res.error_code(), error_code::LANGUAGE_NOT_SUPPORTED);
        assert_eq!(session.language(), "zh");
    }

    #[tokio::test]
    async fn test_delete_rejects_running_instance() {
        let fake = Fake::with_instance("i1", RunStatus::Running);
        let handler = DeleteDriverInstance::new(deps(&fake));
        let (session, _rx) = session();

        let res = handler.handle(&session, json!({"id": "i1"})).await;
        assert_eq!(res.error_code(), error_code::DRIVER_INSTANCE_RUNNING);
        assert_eq!(res.error_params()["name"], "Instance i1");
        assert!(fake.instances.lock().contains_key("i1"));

        let res = handler.handle(&session, json!({"id": "nope"})).await;
        assert_eq!(res.error_code(), error_code::RECORD_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_delete_stopped_instance() {
        let fake = Fake::with_instance("i1", RunStatus::Stopped);
        let handler = DeleteDriverInstance::new(deps(&fake));
        let (session, _rx) = session();

        let res = handler.handle(&session, json!({"id": "i1"})).await;
        assert!(res.success());
        assert!(fake.instances.lock().is_empty());
    }

    #[tokio::test]
    async fn test_log_tail_streams_until_session_closes() {
        let fake = Fake::with_instance("i1", RunStatus::Running);
        let handler = DriverLogTail::new(deps(&fake));
        let (session, mut rx) = session();

        let res = handler
            .handle(&session, json!({"id": "i1", "op": "start"}))
            .await;
        assert!(res.success());

        let tx = fake.tails.lock().get("i1").cloned().unwrap();
        tx.send("booting".to_string()).await.unwrap();

        let push = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(push.code, PushCode::LogLine.as_u32());
        assert_eq!(push.data.result()["line"], "booting");

        session.close();
        tokio::time::timeout(Duration::from_secs(2), async {
            while fake.stops.lock().is_empty() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_log_tail_reply_comes_before_lines() {
        let fake = Fake::with_instance("i1", RunStatus::Running);
        fake.history.lock().push("backlog".to_string());
        let dispatcher = crate::dispatch::Dispatcher::standard(deps(&fake)).unwrap();
        let (session, mut rx) = session();

        dispatcher
            .dispatch(
                session.clone(),
                edgelink_types::CommandEnvelope::new(
                    CommandCode::DriverLogTail,
                    json!({"id": "i1", "op": "start"}),
                ),
            )
            .unwrap()
            .await
            .unwrap();

        let reply = rx.recv().await.unwrap();
        assert_eq!(reply.code, CommandCode::DriverLogTail.as_u32());
        let line = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.code, PushCode::LogLine.as_u32());
        assert_eq!(line.data.result()["line"], "backlog");
        session.close();
    }

    #[tokio::test]
    async fn test_log_tail_stop() {
        let fake = Fake::with_instance("i1", RunStatus::Running);
        let handler = DriverLogTail::new(deps(&fake));
        let (session, _rx) = session();

        let res = handler.handle(&session, json!({"id": "i1", "op": "stop"})).await;
        assert!(res.success());
        assert_eq!(res.success_msg(), "Stopped streaming the log of Instance i1");
        assert_eq!(fake.stops.lock().as_slice(), ["i1".to_string()]);
    }
}
