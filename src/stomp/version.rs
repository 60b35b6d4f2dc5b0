//! Protocol version negotiation.

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Version {
    V1_0,
    V1_1,
    V1_2,
}

impl Version {
    pub const ALL: [Version; 3] = [Version::V1_0, Version::V1_1, Version::V1_2];

    pub fn as_str(&self) -> &'static str {
        match self {
            Version::V1_0 => "1.0",
            Version::V1_1 => "1.1",
            Version::V1_2 => "1.2",
        }
    }

    /// WebSocket subprotocol name advertised for this version.
    pub const fn subprotocol(&self) -> &'static str {
        match self {
            Version::V1_0 => "v10.stomp",
            Version::V1_1 => "v11.stomp",
            Version::V1_2 => "v12.stomp",
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported STOMP version '{0}'")]
pub struct UnknownVersion(pub String);

impl FromStr for Version {
    type Err = UnknownVersion;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == s.trim())
            .ok_or_else(|| UnknownVersion(s.to_string()))
    }
}

/// Highest version present both in the client's comma separated
/// `accept-version` list and in `supported`.
pub fn negotiate(accept_version: &str, supported: &[Version]) -> Option<Version> {
    accept_version
        .split(',')
        .filter_map(|v| v.parse::<Version>().ok())
        .filter(|v| supported.contains(v))
        .max()
}

/// `supported` rendered for an ERROR frame's `version` header.
pub fn list(supported: &[Version]) -> String {
    supported
        .iter()
        .map(Version::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn highest_common_version_wins() {
        let supported = [Version::V1_1, Version::V1_2];
        assert_eq!(negotiate("1.1,1.2", &supported), Some(Version::V1_2));
        assert_eq!(negotiate("1.0,1.1", &supported), Some(Version::V1_1));
        assert_eq!(negotiate("1.0", &supported), None);
        assert_eq!(negotiate("2.0,banana", &supported), None);
    }

    #[test]
    fn list_is_comma_separated() {
        assert_eq!(list(&[Version::V1_1, Version::V1_2]), "1.1,1.2");
    }
}
