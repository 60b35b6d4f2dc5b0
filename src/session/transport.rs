//! Boundary between the protocol core and a byte-carrying transport.

use async_trait::async_trait;

use crate::security::Principal;
use crate::session::SessionId;
use crate::stomp::{codec, CodecError, Frame};

/// Why a session is being closed. Maps onto WebSocket close codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Normal,
    ProtocolError,
    PolicyViolation,
    BrokerFailure,
}

impl CloseReason {
    pub fn code(&self) -> u16 {
        match self {
            CloseReason::Normal => 1000,
            CloseReason::ProtocolError => 1002,
            CloseReason::PolicyViolation => 1008,
            CloseReason::BrokerFailure => 1011,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            CloseReason::Normal => "normal closure",
            CloseReason::ProtocolError => "protocol error",
            CloseReason::PolicyViolation => "policy violation",
            CloseReason::BrokerFailure => "broker failure",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("session {0} is closed")]
    Closed(SessionId),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// A duplex channel to one client.
///
/// Implementations serialize writes: concurrent `send_*` calls never
/// interleave bytes on the wire.
#[async_trait]
pub trait Session: Send + Sync {
    fn id(&self) -> &SessionId;

    /// Authenticated principal, `None` for anonymous sessions.
    fn principal(&self) -> Option<&Principal>;

    async fn send_text(&self, text: String) -> Result<(), TransportError>;

    async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        self.send_text(codec::encode_text(frame)).await
    }

    /// Close the transport. Calling it on a closed session is a no-op.
    async fn close(&self, reason: CloseReason);
}
