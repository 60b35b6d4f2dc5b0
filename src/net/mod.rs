//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! WebSocket upgrade request
//!     → connection.rs (limit check, lifecycle tracking)
//!     → tls.rs (optional TLS, terminated by axum-server)
//!     → hand off to the WebSocket transport
//! ```
//!
//! # Design Decisions
//! - Upgrades beyond the session limit are refused before the handshake
//! - Each session is tracked by an RAII guard for graceful shutdown
//! - TLS is optional and handled transparently

pub mod connection;
pub mod tls;

pub use connection::{ConnectionGuard, ConnectionId, ConnectionTracker};
