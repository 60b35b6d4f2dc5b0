//! Transport sessions.
//!
//! # Data Flow
//! ```text
//! transport adapter (WebSocket)
//!     → transport.rs (Session: id, principal, send, close)
//!     → registry.rs (index by id and by principal)
//!
//! Relay / bridge outbound frame
//!     → registry.rs deliver_to_session
//!     → Session::send_frame (single writer per session)
//!
//! heartbeat.rs runs beside every connected bridge on a shared scheduler
//! ```
//!
//! # Design Decisions
//! - The core never sees sockets, only the `Session` trait
//! - Anonymous sessions are indexed under an explicit sentinel key
//! - Delivery to a vanished session is a logged, recoverable failure

use std::fmt;
use std::sync::Arc;

pub mod heartbeat;
pub mod registry;
pub mod transport;

pub use heartbeat::{HeartBeatHooks, HeartBeatMonitor, Scheduler};
pub use registry::{DeliveryError, PrincipalKey, RegistryError, SessionRegistry};
pub use transport::{CloseReason, Session, TransportError};

/// Identifier of a transport session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(Arc<str>);

impl SessionId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Fresh random id.
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for SessionId {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
