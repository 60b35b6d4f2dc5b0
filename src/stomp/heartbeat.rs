//! Heart-beat header parsing and interval negotiation.
//!
//! A `heart-beat: cx,cy` header reads "I can send every `cx` ms, I want to
//! receive every `cy` ms". Zero disables that direction.

use std::fmt;
use std::time::Duration;

/// Heart-beat pair as carried on the wire, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub outgoing: u64,
    pub incoming: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid heart-beat header '{0}'")]
pub struct HeartBeatError(pub String);

impl HeartBeat {
    pub const DISABLED: HeartBeat = HeartBeat {
        outgoing: 0,
        incoming: 0,
    };

    pub fn new(outgoing: u64, incoming: u64) -> Self {
        Self { outgoing, incoming }
    }

    pub fn parse(value: &str) -> Result<Self, HeartBeatError> {
        let invalid = || HeartBeatError(value.to_string());
        let (out, inc) = value.split_once(',').ok_or_else(invalid)?;
        Ok(Self {
            outgoing: out.trim().parse().map_err(|_| invalid())?,
            incoming: inc.trim().parse().map_err(|_| invalid())?,
        })
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.outgoing, self.incoming)
    }
}

/// Server-side heart-beat limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeartBeatPolicy {
    /// Smallest interval the server accepts for client traffic.
    pub min_read_ms: u64,
    /// Smallest interval at which the server sends heart-beats.
    pub min_write_ms: u64,
    pub max_ms: u64,
    /// Multiplier applied to the read interval before a peer is declared dead.
    pub tolerance: f64,
}

impl Default for HeartBeatPolicy {
    fn default() -> Self {
        Self {
            min_read_ms: 10_000,
            min_write_ms: 10_000,
            max_ms: 120_000,
            tolerance: 1.5,
        }
    }
}

/// Outcome of negotiation. `None` disables a direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Negotiated {
    pub read: Option<Duration>,
    pub write: Option<Duration>,
}

impl Negotiated {
    /// The server's `heart-beat` header for CONNECTED.
    pub fn header(&self) -> HeartBeat {
        let ms = |d: Option<Duration>| d.map(|d| d.as_millis() as u64).unwrap_or(0);
        HeartBeat::new(ms(self.write), ms(self.read))
    }
}

impl HeartBeatPolicy {
    pub fn negotiate(&self, client: HeartBeat) -> Negotiated {
        Negotiated {
            read: self.interval(client.outgoing, self.min_read_ms),
            write: self.interval(client.incoming, self.min_write_ms),
        }
    }

    /// Time without inbound traffic after which the connection is dead.
    pub fn read_deadline(&self, read: Duration) -> Duration {
        read.mul_f64(self.tolerance)
    }

    fn interval(&self, offered: u64, floor: u64) -> Option<Duration> {
        if offered == 0 {
            return None;
        }
        let ms = offered.max(floor).min(self.max_ms.max(floor));
        Some(Duration::from_millis(ms))
    }
}
