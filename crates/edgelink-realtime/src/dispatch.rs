//! Command dispatch table.

use crate::error::RealtimeError;
use crate::event::EventEmitter;
use crate::handlers;
use crate::i18n::Translator;
use crate::services::ServiceRegistry;
use crate::session::Session;
use async_trait::async_trait;
use edgelink_broker::BrokerLink;
use edgelink_types::{CommandCode, CommandEnvelope, ResponseEnvelope, WsResult};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Work a handler starts once its reply has been queued.
pub type AfterReply = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Handles one command code.
///
/// The returned result is sent back to the session under the command's code,
/// so every dispatched command gets exactly one reply.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// The code this handler answers.
    fn code(&self) -> CommandCode;

    /// Handle a command payload.
    async fn handle(&self, session: &Arc<Session>, payload: Value) -> WsResult;

    /// Handle a command payload, deferring follow-up pushes until the reply
    /// is on its way. The dispatcher calls this one.
    async fn handle_deferred(
        &self,
        session: &Arc<Session>,
        payload: Value,
    ) -> (WsResult, Option<AfterReply>) {
        (self.handle(session, payload).await, None)
    }
}

/// Dependencies shared by the built-in handlers.
#[derive(Clone)]
pub struct HandlerDeps {
    pub services: Arc<dyn ServiceRegistry>,
    pub translator: Arc<dyn Translator>,
    /// Outbound broker link for gateway events, if one is configured.
    pub broker: Option<Arc<BrokerLink>>,
    /// Event stream for pushes to every session.
    pub events: Option<EventEmitter>,
}

impl HandlerDeps {
    /// Dependencies without a broker link or event stream.
    pub fn new(services: Arc<dyn ServiceRegistry>, translator: Arc<dyn Translator>) -> Self {
        Self {
            services,
            translator,
            broker: None,
            events: None,
        }
    }

    pub fn with_broker(mut self, broker: Arc<BrokerLink>) -> Self {
        self.broker = Some(broker);
        self
    }

    pub fn with_events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }
}

/// Builds a [`Dispatcher`], checking that every command code is bound.
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<CommandCode, Arc<dyn CommandHandler>>,
}

impl DispatcherBuilder {
    /// Bind a handler to its code. A later binding replaces an earlier one.
    pub fn handler(mut self, handler: impl CommandHandler + 'static) -> Self {
        let code = handler.code();
        if self.handlers.insert(code, Arc::new(handler)).is_some() {
            warn!(command = %code, "Replacing command handler");
        }
        self
    }

    /// Finish the table. Fails if any command code is left unbound.
    pub fn build(self) -> Result<Dispatcher, RealtimeError> {
        if let Some(code) = CommandCode::ALL
            .into_iter()
            .find(|code| !self.handlers.contains_key(code))
        {
            return Err(RealtimeError::MissingHandler(code));
        }
        Ok(Dispatcher {
            handlers: self.handlers,
        })
    }
}

/// Immutable map from command code to handler.
pub struct Dispatcher {
    handlers: HashMap<CommandCode, Arc<dyn CommandHandler>>,
}

impl Dispatcher {
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// The table with every built-in handler bound.
    pub fn standard(deps: HandlerDeps) -> Result<Self, RealtimeError> {
        Self::builder()
            .handler(handlers::UpgradeDriverImage::new(deps.clone()))
            .handler(handlers::DriverRunStatus::new(deps.clone()))
            .handler(handlers::ChangeLanguage::new(deps.clone()))
            .handler(handlers::DriverLogTail::new(deps.clone()))
            .handler(handlers::DeleteDriverInstance::new(deps))
            .build()
    }

    /// Look up the handler for a raw code.
    pub fn handler(&self, code: u32) -> Option<Arc<dyn CommandHandler>> {
        CommandCode::from_u32(code).and_then(|code| self.handlers.get(&code).cloned())
    }

    /// Run the handler for `envelope` on its own task.
    ///
    /// Unknown codes are ignored and yield `None`; the session stays open.
    pub fn dispatch(&self, session: Arc<Session>, envelope: CommandEnvelope) -> Option<JoinHandle<()>> {
        let Some(handler) = self.handler(envelope.code) else {
            debug!(session_id = %session.id, code = envelope.code, "Ignoring unknown command");
            return None;
        };
        let code = handler.code();
        debug!(session_id = %session.id, command = %code, "Dispatching command");

        Some(tokio::spawn(async move {
            let (result, after_reply) = handler.handle_deferred(&session, envelope.data).await;
            if !result.success() {
                debug!(
                    session_id = %session.id,
                    command = %code,
                    error_code = result.error_code(),
                    "Command failed"
                );
            }
            if session.send(ResponseEnvelope::new(code, result)).await.is_err() {
                debug!(session_id = %session.id, command = %code, "Session closed before reply");
            }
            // Runs even without a reply so it can release what it holds.
            if let Some(work) = after_reply {
                tokio::spawn(work);
            }
        }))
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
