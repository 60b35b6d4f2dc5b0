//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, WebSocket path, TLS).
    pub listener: ListenerConfig,

    /// STOMP protocol settings.
    pub stomp: StompConfig,

    /// Embedded broker settings.
    pub broker: BrokerConfig,

    /// Authorization rules and static users.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    pub admin: AdminConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Path the WebSocket upgrade is served on.
    pub websocket_path: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Maximum concurrent WebSocket sessions (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            websocket_path: "/stomp".to_string(),
            tls: None,
            max_connections: 10_000,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// STOMP protocol configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StompConfig {
    /// Versions offered during CONNECT negotiation.
    pub versions: Vec<String>,

    /// Capacity of the binary encode/decode buffer in bytes.
    pub buffer_capacity: usize,

    /// Smallest accepted interval for client heart-beats, in milliseconds.
    pub heartbeat_min_read_ms: u64,

    /// Smallest interval at which the server heart-beats, in milliseconds.
    pub heartbeat_min_write_ms: u64,

    /// Largest negotiated interval in either direction, in milliseconds.
    pub heartbeat_max_ms: u64,

    /// Read timeout multiplier applied to the negotiated read interval.
    pub heartbeat_tolerance: f64,

    /// Outbound frames queued per session before writes apply backpressure.
    pub outbound_queue: usize,
}

impl Default for StompConfig {
    fn default() -> Self {
        Self {
            versions: vec!["1.1".to_string(), "1.2".to_string()],
            buffer_capacity: 16 * 1024,
            heartbeat_min_read_ms: 10_000,
            heartbeat_min_write_ms: 10_000,
            heartbeat_max_ms: 120_000,
            heartbeat_tolerance: 1.5,
            outbound_queue: 256,
        }
    }
}

/// Embedded broker configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct BrokerConfig {
    /// Login required from broker clients. `None` accepts any credentials.
    pub login: Option<String>,

    pub passcode: Option<String>,
}

/// Authorization configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SecurityConfig {
    /// Reply to denied frames with an ERROR frame instead of dropping them.
    pub error_on_denied: bool,

    /// Users accepted through HTTP Basic authentication on upgrade.
    pub users: Vec<UserConfig>,

    /// Ordered limitation rules.
    pub rules: Vec<RuleConfig>,
}

/// A statically configured user.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserConfig {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// A limitation rule. Frame conditions are combined with AND, as are the
/// access conditions.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RuleConfig {
    /// Commands the rule applies to (empty = every command).
    pub commands: Vec<String>,

    /// Destination glob the rule applies to.
    pub destination: Option<String>,

    /// Apply only to frames without a destination header.
    pub null_destination: bool,

    pub access: Access,

    /// Roles of which the principal must hold at least one.
    pub roles: Vec<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    #[default]
    PermitAll,
    DenyAll,
    Authenticated,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_file_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.websocket_path, "/stomp");
        assert_eq!(config.stomp.buffer_capacity, 16 * 1024);
        assert_eq!(config.stomp.heartbeat_tolerance, 1.5);
        assert!(config.security.rules.is_empty());
    }

    #[test]
    fn parses_rules() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [security]
            error_on_denied = true

            [[security.rules]]
            null_destination = true

            [[security.rules]]
            commands = ["SEND"]
            destination = "/topic/secure/*"
            roles = ["trader"]

            [[security.rules]]
            destination = "/queue/admin"
            access = "deny_all"
            "#,
        )
        .unwrap();
        let rules = &config.security.rules;
        assert_eq!(rules.len(), 3);
        assert!(rules[0].null_destination);
        assert_eq!(rules[1].roles, vec!["trader"]);
        assert_eq!(rules[2].access, Access::DenyAll);
    }
}
