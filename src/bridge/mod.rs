//! Client connection ↔ broker bridge.
//!
//! # Data Flow
//! ```text
//! CONNECT
//!     → connection.rs (version + heart-beat negotiation, broker connect)
//!     → CONNECTED
//!
//! SEND / SUBSCRIBE / ACK / BEGIN ...
//!     → connection.rs (resolve broker session: transaction | auto | client)
//!     → broker call
//!     → RECEIPT (only after the broker call returned)
//!
//! broker consumer
//!     → subscription.rs (one pump task per subscription)
//!     → convert.rs (BrokerMessage → MESSAGE)
//!     → session registry → transport
//! ```
//!
//! # Design Decisions
//! - One `Connection` per transport session owns every broker resource it
//!   creates; teardown releases them in a fixed order and runs once
//! - Receipt-bearing frames hold the delivery gate exclusively, so no
//!   MESSAGE caused by the frame can overtake its RECEIPT
//! - Broker sessions and producers are created lazily on first use

use std::time::Duration;

pub mod connection;
pub mod convert;
pub mod subscription;

pub use connection::{Connection, ConnectionState};

use crate::broker::{BrokerError, SelectorError};
use crate::config::schema::StompConfig;
use crate::session::TransportError;
use crate::stomp::heartbeat::HeartBeatError;
use crate::stomp::version::UnknownVersion;
use crate::stomp::{Command, FrameError, HeartBeatPolicy, Version};

/// Protocol settings shared by every bridge.
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Offered versions, any order.
    pub versions: Vec<Version>,
    pub heartbeat: HeartBeatPolicy,
    /// Value of the CONNECTED `server` header.
    pub server: String,
}

impl BridgeSettings {
    pub fn from_config(config: &StompConfig) -> Result<Self, UnknownVersion> {
        let versions = config
            .versions
            .iter()
            .map(|v| v.parse())
            .collect::<Result<Vec<Version>, _>>()?;
        Ok(Self {
            versions,
            heartbeat: HeartBeatPolicy {
                min_read_ms: config.heartbeat_min_read_ms,
                min_write_ms: config.heartbeat_min_write_ms,
                max_ms: config.heartbeat_max_ms,
                tolerance: config.heartbeat_tolerance,
            },
            ..Self::default()
        })
    }

    pub fn read_deadline(&self, read: Duration) -> Duration {
        self.heartbeat.read_deadline(read)
    }
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            versions: vec![Version::V1_1, Version::V1_2],
            heartbeat: HeartBeatPolicy::default(),
            server: format!("stomp-gateway/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("connection is not established")]
    NotConnected,

    #[error("connection is already established")]
    AlreadyConnected,

    #[error("no common protocol version in '{offered}'")]
    UnsupportedVersion { offered: String },

    #[error("subscription '{0}' already exists")]
    DuplicateSubscription(String),

    #[error("unknown subscription '{0}'")]
    UnknownSubscription(String),

    #[error("unknown message '{0}'")]
    UnknownMessage(String),

    #[error("transaction '{0}' already begun")]
    DuplicateTransaction(String),

    #[error("unknown transaction '{0}'")]
    UnknownTransaction(String),

    #[error("invalid ack mode '{0}'")]
    InvalidAckMode(String),

    #[error("{0} frames are not accepted from clients")]
    UnexpectedCommand(Command),

    #[error(transparent)]
    HeartBeat(#[from] HeartBeatError),

    #[error(transparent)]
    Selector(#[from] SelectorError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// What the relay does with a failed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Log only; no receipt, no ERROR.
    Log,
    /// Send an ERROR frame and keep the connection.
    Error,
    /// Send an ERROR frame and close the connection.
    ErrorAndClose,
    /// Tear the bridge down and close with a broker failure.
    BrokerFailure,
}

impl BridgeError {
    pub fn disposition(&self) -> Disposition {
        match self {
            BridgeError::UnknownSubscription(_)
            | BridgeError::UnknownMessage(_)
            | BridgeError::UnknownTransaction(_)
            | BridgeError::Transport(_) => Disposition::Log,
            BridgeError::Broker(BrokerError::AuthenticationFailed(_)) => Disposition::ErrorAndClose,
            BridgeError::Broker(e) if e.is_link_failure() => Disposition::BrokerFailure,
            BridgeError::Broker(BrokerError::Selector(_)) => Disposition::Error,
            BridgeError::Broker(_) => Disposition::Log,
            BridgeError::NotConnected
            | BridgeError::AlreadyConnected
            | BridgeError::UnsupportedVersion { .. } => Disposition::ErrorAndClose,
            BridgeError::DuplicateSubscription(_)
            | BridgeError::DuplicateTransaction(_)
            | BridgeError::InvalidAckMode(_)
            | BridgeError::UnexpectedCommand(_)
            | BridgeError::HeartBeat(_)
            | BridgeError::Selector(_)
            | BridgeError::Frame(_) => Disposition::Error,
        }
    }

    /// Short text for the ERROR frame's `message` header.
    pub fn summary(&self) -> &'static str {
        match self {
            BridgeError::NotConnected => "not connected",
            BridgeError::AlreadyConnected => "already connected",
            BridgeError::UnsupportedVersion { .. } => "unsupported protocol version",
            BridgeError::DuplicateSubscription(_) => "duplicate subscription",
            BridgeError::UnknownSubscription(_) => "unknown subscription",
            BridgeError::UnknownMessage(_) => "unknown message",
            BridgeError::DuplicateTransaction(_) => "duplicate transaction",
            BridgeError::UnknownTransaction(_) => "unknown transaction",
            BridgeError::InvalidAckMode(_) => "invalid ack mode",
            BridgeError::UnexpectedCommand(_) => "unexpected command",
            BridgeError::HeartBeat(_) => "invalid heart-beat",
            BridgeError::Selector(_) | BridgeError::Broker(BrokerError::Selector(_)) => "invalid selector",
            BridgeError::Broker(BrokerError::AuthenticationFailed(_)) => "authentication failed",
            BridgeError::Broker(_) => "broker error",
            BridgeError::Transport(_) => "transport error",
            BridgeError::Frame(_) => "invalid frame",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_ids_are_only_logged() {
        assert_eq!(BridgeError::UnknownMessage("m".into()).disposition(), Disposition::Log);
        assert_eq!(BridgeError::UnknownTransaction("t".into()).disposition(), Disposition::Log);
        assert_eq!(BridgeError::UnknownSubscription("s".into()).disposition(), Disposition::Log);
    }

    #[test]
    fn link_failures_tear_down() {
        let err = BridgeError::Broker(BrokerError::LinkFailure("gone".into()));
        assert_eq!(err.disposition(), Disposition::BrokerFailure);
        let err = BridgeError::Broker(BrokerError::ConnectionClosed);
        assert_eq!(err.disposition(), Disposition::BrokerFailure);
    }

    #[test]
    fn settings_from_config() {
        let settings = BridgeSettings::from_config(&StompConfig::default()).unwrap();
        assert_eq!(settings.versions, vec![Version::V1_1, Version::V1_2]);
        assert_eq!(settings.heartbeat, HeartBeatPolicy::default());

        let bad = StompConfig {
            versions: vec!["3.0".into()],
            ..StompConfig::default()
        };
        assert!(BridgeSettings::from_config(&bad).is_err());
    }
}
