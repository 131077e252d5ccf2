//! Composition root: wires configuration, hub, broker and HTTP routes.

use axum::Router;
use edgelink_broker::BrokerRegistry;
use edgelink_realtime::{
    event_channel, spawn_event_pump, Catalog, Dispatcher, HandlerDeps, RealtimeHub, ServiceRegistry,
    Translator,
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::info;

use crate::api::{create_router, AppState};
use crate::auth::TokenVerifier;
use crate::bridge::{spawn_inbound_bridge, LinkLogger};
use crate::config::GatewayConfig;
use crate::error::NodeError;
use crate::health::HealthState;
use crate::observability::MetricsState;

/// A fully wired gateway, ready to serve.
pub struct Gateway {
    router: Router,
    registry: Arc<BrokerRegistry>,
    health: HealthState,
    tasks: Vec<JoinHandle<()>>,
}

impl Gateway {
    /// Build every component.
    ///
    /// With the broker enabled, the initial connection must succeed; later
    /// outages are retried in the background.
    pub async fn build(
        config: &GatewayConfig,
        registry: Arc<BrokerRegistry>,
        services: Arc<dyn ServiceRegistry>,
    ) -> Result<Self, NodeError> {
        let default_language = config.i18n.default_language.clone();
        let catalog = Catalog::builtin().with_default_language(default_language.clone());
        if !catalog.supports(&default_language) {
            return Err(NodeError::UnsupportedLanguage(default_language));
        }
        let translator: Arc<dyn Translator> = Arc::new(catalog);

        let (hub, hub_task) = RealtimeHub::spawn();
        let (events, stream) = event_channel(config.realtime.event_buffer);
        let mut tasks = vec![hub_task, spawn_event_pump(stream, hub.clone())];

        let broker = if config.broker.enabled {
            let link = registry
                .connect(config.broker.link_options(), vec![Arc::new(LinkLogger)])
                .await?;
            tasks.push(spawn_inbound_bridge(&link, events.clone()));
            Some(link)
        } else {
            info!("Broker disabled, events stay local");
            None
        };

        let mut deps = HandlerDeps::new(services, translator.clone()).with_events(events.clone());
        if let Some(link) = &broker {
            deps = deps.with_broker(link.clone());
        }
        let dispatcher = Arc::new(Dispatcher::standard(deps)?);

        let verifier = config
            .auth
            .jwt_secret
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|secret| Arc::new(TokenVerifier::new(secret)));

        let health = HealthState::new(hub.clone(), broker.clone());
        let state = AppState {
            hub,
            dispatcher,
            translator,
            events,
            broker,
            metrics: MetricsState::new(),
            verifier,
            auth_required: config.auth.required,
            session: config.realtime.session_config(),
            default_language,
            health: health.clone(),
        };
        let router = create_router(state);
        health.set_ready(true);

        Ok(Self {
            router,
            registry,
            health,
            tasks,
        })
    }

    /// The HTTP router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` resolves, then close broker links.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<(), NodeError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr()?;
        info!(addr = %addr, "Gateway listening");

        axum::serve(
            listener,
            self.router
                .clone()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        self.health.set_ready(false);
        self.registry.close_all().await;
        for task in self.tasks {
            task.abort();
        }
        info!("Gateway stopped");
        Ok(())
    }
}
