//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (tolerance >= 1, non-zero buffers, heart-beat
//!   ceiling above the floors)
//! - Check that security rules compile (command names, destination globs)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::GatewayConfig;
use crate::routing::GlobPattern;
use crate::stomp::{Command, Version};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let listener = &config.listener;
    if listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }
    if !listener.websocket_path.starts_with('/') {
        errors.push(ValidationError::new("listener.websocket_path", "must start with '/'"));
    }
    if listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be positive"));
    }

    let stomp = &config.stomp;
    if stomp.versions.is_empty() {
        errors.push(ValidationError::new("stomp.versions", "at least one version is required"));
    }
    for v in &stomp.versions {
        if v.parse::<Version>().is_err() {
            errors.push(ValidationError::new("stomp.versions", format!("unsupported version '{v}'")));
        }
    }
    if stomp.buffer_capacity == 0 {
        errors.push(ValidationError::new("stomp.buffer_capacity", "must be positive"));
    }
    if stomp.outbound_queue == 0 {
        errors.push(ValidationError::new("stomp.outbound_queue", "must be positive"));
    }
    if stomp.heartbeat_tolerance.is_nan() || stomp.heartbeat_tolerance < 1.0 {
        errors.push(ValidationError::new("stomp.heartbeat_tolerance", "must be at least 1.0"));
    }
    if stomp.heartbeat_max_ms < stomp.heartbeat_min_read_ms.max(stomp.heartbeat_min_write_ms) {
        errors.push(ValidationError::new(
            "stomp.heartbeat_max_ms",
            "must not be below the heart-beat minimums",
        ));
    }

    for (i, user) in config.security.users.iter().enumerate() {
        if user.username.is_empty() {
            errors.push(ValidationError::new(format!("security.users[{i}].username"), "must not be empty"));
        }
    }
    for (i, rule) in config.security.rules.iter().enumerate() {
        for command in &rule.commands {
            if command.parse::<Command>().is_err() {
                errors.push(ValidationError::new(
                    format!("security.rules[{i}].commands"),
                    format!("unknown command '{command}'"),
                ));
            }
        }
        if let Some(destination) = &rule.destination {
            if let Err(e) = GlobPattern::compile(destination) {
                errors.push(ValidationError::new(format!("security.rules[{i}].destination"), e.to_string()));
            }
        }
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new("observability.metrics_address", "not a socket address"));
    }
    if config.admin.enabled {
        if config.admin.bind_address.parse::<SocketAddr>().is_err() {
            errors.push(ValidationError::new("admin.bind_address", "not a socket address"));
        }
        if config.admin.api_key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "must not be empty"));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
