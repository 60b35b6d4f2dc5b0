//! HTTP and WebSocket surface.
//!
//! # Data Flow
//! ```text
//! TCP / TLS → axum Router
//!     → GET {websocket_path}: auth.rs (optional Basic) → websocket.rs upgrade
//!     → GET /health
//! ```

pub mod auth;
pub mod server;
pub mod websocket;

pub use auth::{AuthError, UserStore};
pub use server::{AppState, GatewayServer};
pub use websocket::{WsSession, SUBPROTOCOLS};
