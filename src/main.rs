//! STOMP over WebSocket gateway.
//!
//! Loads configuration, builds the relay core on a dedicated heartbeat
//! scheduler, then serves the STOMP endpoint (plain or TLS) and the optional
//! admin API until a shutdown signal arrives.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use stomp_gateway::admin::setup_admin_router;
use stomp_gateway::config::{load_config, ConfigWatcher, GatewayConfig};
use stomp_gateway::lifecycle::{signals, startup, Shutdown};
use stomp_gateway::observability::{logging, metrics};
use stomp_gateway::session::Scheduler;
use stomp_gateway::GatewayServer;

/// How long shutdown waits for WebSocket sessions to drain.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "stomp-gateway", version, about = "STOMP over WebSocket gateway")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "STOMP_GATEWAY_CONFIG")]
    config: Option<PathBuf>,

    /// Override listener.bind_address
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    logging::init(&config.observability.log_level);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "stomp-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        websocket_path = %config.listener.websocket_path,
        max_connections = config.listener.max_connections,
        tls = config.listener.tls.is_some(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        metrics::install_recorder(addr)?;
    }

    let scheduler = Arc::new(Scheduler::dedicated()?);
    let gateway = startup::build(&config, scheduler)?;

    // Hot reload of security settings. The watcher stops when dropped.
    let _watcher = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            startup::spawn_reload_task(gateway.clone(), updates);
            match watcher.run() {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
                    None
                }
            }
        }
        None => None,
    };

    let shutdown = Shutdown::new();
    signals::spawn_signal_handler(shutdown.clone());

    let server = GatewayServer::new(&config, &gateway);
    let state = server.state().clone();

    {
        let shutdown = shutdown.clone();
        let relay = gateway.relay.clone();
        tokio::spawn(async move {
            shutdown.wait().await;
            relay.shutdown().await;
        });
    }

    if config.admin.enabled {
        let admin = setup_admin_router(state.clone());
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        tracing::info!(address = %listener.local_addr()?, "Admin API listening");
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            let result = axum::serve(listener, admin)
                .with_graceful_shutdown(async move { shutdown.wait().await })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "Admin API failed");
            }
        });
    }

    match &config.listener.tls {
        Some(tls) => {
            let addr: SocketAddr = config.listener.bind_address.parse()?;
            server.run_tls(addr, tls, shutdown.clone()).await?;
        }
        None => {
            let listener = TcpListener::bind(&config.listener.bind_address).await?;
            server.run(listener, shutdown.clone()).await?;
        }
    }

    if !state.connections.wait_idle(DRAIN_TIMEOUT).await {
        tracing::warn!(
            active = state.connections.active_count(),
            "Sessions still open after drain timeout"
        );
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
