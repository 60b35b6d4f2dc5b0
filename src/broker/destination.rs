//! Destination classification.

use std::fmt;

/// A broker address. Every variant keeps the full address string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// `/topic/...`: every matching consumer receives a copy.
    Topic(String),
    /// `/queue/...`: one consumer receives each message.
    Queue(String),
    /// Anything else; behaves as a queue named by the raw string.
    Direct(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestinationKind {
    Topic,
    Queue,
    Direct,
}

impl Destination {
    pub const TOPIC_PREFIX: &'static str = "/topic/";
    pub const QUEUE_PREFIX: &'static str = "/queue/";

    pub fn parse(raw: &str) -> Self {
        if raw.starts_with(Self::TOPIC_PREFIX) {
            Destination::Topic(raw.to_string())
        } else if raw.starts_with(Self::QUEUE_PREFIX) {
            Destination::Queue(raw.to_string())
        } else {
            Destination::Direct(raw.to_string())
        }
    }

    pub fn kind(&self) -> DestinationKind {
        match self {
            Destination::Topic(_) => DestinationKind::Topic,
            Destination::Queue(_) => DestinationKind::Queue,
            Destination::Direct(_) => DestinationKind::Direct,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Destination::Topic(s) | Destination::Queue(s) | Destination::Direct(s) => s,
        }
    }

    /// Queues and direct destinations hand each message to one consumer.
    pub fn is_point_to_point(&self) -> bool {
        !matches!(self, Destination::Topic(_))
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
