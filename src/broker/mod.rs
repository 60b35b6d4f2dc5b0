//! Broker boundary.
//!
//! # Data Flow
//! ```text
//! bridge
//!     → Broker::connect (credentials)
//!     → BrokerConnection::create_session (transacted, ack mode)
//!     → BrokerSession::{create_producer, create_consumer, acknowledge, commit}
//!     → Producer::send / Consumer::recv
//!
//! BrokerConnection error listener
//!     → bridge teardown on link failure
//! ```
//!
//! # Design Decisions
//! - The bridge only sees these traits; `memory.rs` is the embedded
//!   implementation and any broker with the same shape can be swapped in
//! - Consumers are pulled with `recv`, so each subscription pump preserves
//!   broker delivery order

use std::sync::Arc;

use async_trait::async_trait;

pub mod destination;
pub mod memory;
pub mod message;
pub mod selector;

pub use destination::{Destination, DestinationKind};
pub use memory::MemoryBroker;
pub use message::BrokerMessage;
pub use selector::{MessageSelector, SelectorError, SESSION_PROPERTY};

/// Acknowledgement mode of a broker session (and of a STOMP subscription).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AckMode {
    Auto,
    /// Cumulative acknowledgement.
    Client,
    ClientIndividual,
}

impl AckMode {
    pub fn parse(value: Option<&str>) -> Option<Self> {
        match value {
            None | Some("auto") => Some(AckMode::Auto),
            Some("client") => Some(AckMode::Client),
            Some("client-individual") => Some(AckMode::ClientIndividual),
            Some(_) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto",
            AckMode::Client => "client",
            AckMode::ClientIndividual => "client-individual",
        }
    }

    pub fn requires_ack(&self) -> bool {
        !matches!(self, AckMode::Auto)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub login: Option<String>,
    pub passcode: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerError {
    #[error("authentication failed for login '{0}'")]
    AuthenticationFailed(String),

    #[error("broker connection is closed")]
    ConnectionClosed,

    #[error("broker session is closed")]
    SessionClosed,

    #[error("unknown message '{0}'")]
    UnknownMessage(String),

    #[error("session is not transacted")]
    NotTransacted,

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error("broker link failure: {0}")]
    LinkFailure(String),
}

impl BrokerError {
    /// True when the broker link itself is gone and the bridge must be torn
    /// down.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, BrokerError::ConnectionClosed | BrokerError::LinkFailure(_))
    }
}

/// Invoked once per connection when the broker link breaks.
pub type ErrorListener = Arc<dyn Fn(BrokerError) + Send + Sync>;

#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn BrokerConnection>, BrokerError>;
}

#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn create_session(
        &self,
        transacted: bool,
        ack_mode: AckMode,
    ) -> Result<Arc<dyn BrokerSession>, BrokerError>;

    fn set_error_listener(&self, listener: ErrorListener);

    async fn close(&self) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait BrokerSession: Send + Sync {
    async fn create_producer(&self) -> Result<Box<dyn Producer>, BrokerError>;

    async fn create_consumer(
        &self,
        destination: &Destination,
        selector: MessageSelector,
    ) -> Result<Box<dyn Consumer>, BrokerError>;

    async fn create_temporary_queue(&self) -> Result<Destination, BrokerError>;

    /// Acknowledge one delivered message.
    async fn acknowledge(&self, message_id: &str) -> Result<(), BrokerError>;

    /// Hand an unacknowledged message back for redelivery.
    async fn release(&self, message_id: &str) -> Result<(), BrokerError>;

    async fn commit(&self) -> Result<(), BrokerError>;

    async fn rollback(&self) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Producer: Send + Sync {
    async fn send(&self, destination: &Destination, message: BrokerMessage) -> Result<(), BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Consumer: Send {
    /// Next message, `None` once the consumer or its connection is closed.
    async fn recv(&mut self) -> Option<BrokerMessage>;

    async fn close(&mut self) -> Result<(), BrokerError>;
}
