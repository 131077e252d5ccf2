//! Edgelink gateway node.

use clap::Parser;
use edgelink_broker::BrokerRegistry;
use edgelink_node::{
    config::GatewayConfig,
    gateway::Gateway,
    observability::{init_logging, LogFormat},
    services::MemoryServices,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

/// Edgelink gateway: WebSocket clients on one side, MQTT on the other.
#[derive(Parser, Debug)]
#[command(name = "edgelink-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[arg(long)]
    listen_addr: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty or json)
    #[arg(long)]
    log_format: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = GatewayConfig::load(args.config.as_deref())?;
    if let Some(addr) = args.listen_addr {
        config.server.listen_addr = addr;
    }
    if let Some(level) = args.log_level {
        config.log.level = level;
    }
    if let Some(format) = args.log_format {
        config.log.format = format;
    }

    init_logging(&config.log.level, LogFormat::parse(&config.log.format));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting edgelink gateway");
    tracing::info!(
        listen_addr = %config.server.listen_addr,
        broker_enabled = config.broker.enabled,
        broker_host = %config.broker.host,
        auth_required = config.auth.required,
        "Gateway configuration"
    );

    let gateway = Gateway::build(
        &config,
        Arc::new(BrokerRegistry::mqtt()),
        Arc::new(MemoryServices::with_demo_data()),
    )
    .await?;

    let listener = tokio::net::TcpListener::bind(config.server.listen_addr).await?;
    gateway
        .serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested");
        })
        .await?;

    Ok(())
}
