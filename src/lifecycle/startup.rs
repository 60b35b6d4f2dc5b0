//! Startup orchestration.
//!
//! # Responsibilities
//! - Turn a validated configuration into the running core (broker, relay,
//!   security rules, users)
//! - Apply reloaded security settings to a running core
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently
//! - Listeners start last (traffic only when ready)

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::bridge::BridgeSettings;
use crate::broker::{Credentials, MemoryBroker};
use crate::config::schema::{BrokerConfig, GatewayConfig, SecurityConfig};
use crate::http::auth::UserStore;
use crate::relay::Relay;
use crate::security::{Limitation, LimitationError};
use crate::session::Scheduler;
use crate::stomp::version::UnknownVersion;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Version(#[from] UnknownVersion),

    #[error("invalid security rule: {0}")]
    Security(#[from] LimitationError),
}

/// The running core, shared by every listener.
#[derive(Clone)]
pub struct Gateway {
    pub relay: Arc<Relay>,
    pub users: Arc<UserStore>,
    pub broker: MemoryBroker,
}

pub fn build(config: &GatewayConfig, scheduler: Arc<Scheduler>) -> Result<Gateway, StartupError> {
    let settings = BridgeSettings::from_config(&config.stomp)?;
    let broker = embedded_broker(&config.broker);
    let relay = Relay::new(settings, Arc::new(broker.clone()), scheduler)
        .with_system_credentials(Credentials {
            login: config.broker.login.clone(),
            passcode: config.broker.passcode.clone(),
        });
    let gateway = Gateway {
        relay: Arc::new(relay),
        users: Arc::new(UserStore::default()),
        broker,
    };
    apply_security(&gateway, &config.security)?;

    tracing::info!(
        versions = ?config.stomp.versions,
        rules = gateway.relay.security().len(),
        users = config.security.users.len(),
        "Gateway core initialized"
    );
    Ok(gateway)
}

fn embedded_broker(config: &BrokerConfig) -> MemoryBroker {
    match (&config.login, &config.passcode) {
        (Some(login), Some(passcode)) => MemoryBroker::with_credentials(login, passcode),
        _ => MemoryBroker::new(),
    }
}

/// Limitations in configuration order.
pub fn limitations(security: &SecurityConfig) -> Result<Vec<Limitation>, LimitationError> {
    security.rules.iter().map(Limitation::from_config).collect()
}

/// Swap in the rules, users and denial policy of `security`. Nothing
/// changes when a rule fails to build.
pub fn apply_security(gateway: &Gateway, security: &SecurityConfig) -> Result<(), LimitationError> {
    let rules = limitations(security)?;
    gateway.relay.security().replace_all(rules);
    gateway.relay.set_error_on_denied(security.error_on_denied);
    gateway.users.replace(&security.users);
    Ok(())
}

/// Apply every reloaded configuration until the watcher goes away.
pub fn spawn_reload_task(
    gateway: Gateway,
    mut updates: mpsc::UnboundedReceiver<GatewayConfig>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(config) = updates.recv().await {
            match apply_security(&gateway, &config.security) {
                Ok(()) => tracing::info!(
                    rules = gateway.relay.security().len(),
                    "Security configuration reloaded"
                ),
                Err(e) => tracing::error!(
                    error = %e,
                    "Reloaded security rules rejected. Keeping current configuration."
                ),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{Access, RuleConfig, UserConfig};

    #[tokio::test]
    async fn build_registers_configured_rules() {
        let mut config = GatewayConfig::default();
        config.security.rules.push(RuleConfig {
            null_destination: true,
            ..RuleConfig::default()
        });
        config.security.rules.push(RuleConfig {
            destination: Some("/queue/admin".into()),
            access: Access::DenyAll,
            ..RuleConfig::default()
        });
        config.security.users.push(UserConfig {
            username: "ann".into(),
            password: "pw".into(),
            roles: vec!["trader".into()],
        });

        let gateway = build(&config, Arc::new(Scheduler::current())).unwrap();
        assert_eq!(gateway.relay.security().len(), 2);
        assert_eq!(gateway.users.len(), 1);
    }

    #[tokio::test]
    async fn reload_replaces_rules() {
        let gateway = build(&GatewayConfig::default(), Arc::new(Scheduler::current())).unwrap();
        assert!(gateway.relay.security().is_empty());

        let (tx, rx) = mpsc::unbounded_channel();
        let task = spawn_reload_task(gateway.clone(), rx);
        let mut config = GatewayConfig::default();
        config.security.rules.push(RuleConfig::default());
        tx.send(config).unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(gateway.relay.security().len(), 1);
    }
}
