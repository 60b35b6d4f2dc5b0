//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router: the STOMP WebSocket endpoint and `/health`
//! - Wire up tracing middleware
//! - Bind to a plain TCP listener or serve TLS through axum-server
//! - Drain on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::schema::{GatewayConfig, TlsConfig};
use crate::http::auth::UserStore;
use crate::http::websocket;
use crate::lifecycle::startup::Gateway;
use crate::lifecycle::Shutdown;
use crate::net::tls::load_tls_config;
use crate::net::ConnectionTracker;
use crate::relay::Relay;
use crate::stomp::BinaryCodec;

/// How long a TLS listener lets open sessions finish after shutdown.
const TLS_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<Relay>,
    pub users: Arc<UserStore>,
    pub connections: ConnectionTracker,
    pub codec: BinaryCodec,
    pub outbound_queue: usize,
    pub admin_key: Arc<str>,
    pub started_at: Instant,
}

/// WebSocket server for the gateway.
pub struct GatewayServer {
    state: AppState,
    websocket_path: String,
}

impl GatewayServer {
    pub fn new(config: &GatewayConfig, gateway: &Gateway) -> Self {
        let state = AppState {
            relay: gateway.relay.clone(),
            users: gateway.users.clone(),
            connections: ConnectionTracker::new(config.listener.max_connections),
            codec: BinaryCodec::new(config.stomp.buffer_capacity),
            outbound_queue: config.stomp.outbound_queue,
            admin_key: Arc::from(config.admin.api_key.as_str()),
            started_at: Instant::now(),
        };
        Self {
            state,
            websocket_path: config.listener.websocket_path.clone(),
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Build the Axum router with all middleware layers.
    pub fn router(&self) -> Router {
        Router::new()
            .route(&self.websocket_path, get(websocket::upgrade))
            .route("/health", get(health))
            .with_state(self.state.clone())
            .layer(TraceLayer::new_for_http())
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            path = %self.websocket_path,
            "STOMP endpoint listening"
        );

        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve over TLS until `shutdown` fires.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: &TlsConfig,
        shutdown: Shutdown,
    ) -> Result<(), std::io::Error> {
        let rustls = load_tls_config(tls).await?;
        let handle = axum_server::Handle::new();

        let drain = handle.clone();
        tokio::spawn(async move {
            shutdown.wait().await;
            drain.graceful_shutdown(Some(TLS_GRACE_PERIOD));
        });

        tracing::info!(
            address = %addr,
            path = %self.websocket_path,
            "STOMP endpoint listening (TLS)"
        );
        let app = self.router().into_make_service_with_connect_info::<SocketAddr>();
        axum_server::bind_rustls(addr, rustls)
            .handle(handle)
            .serve(app)
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

#[derive(Serialize)]
struct Health {
    status: &'static str,
    sessions: usize,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(Health {
        status: "ok",
        sessions: state.relay.sessions().len(),
    })
}
