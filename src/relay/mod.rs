//! Relay: the single entry point between transports and bridges.
//!
//! # Data Flow
//! ```text
//! Transport frame (session id, frame)
//!     → heart-beat touch
//!     → SecurityRegistry::is_permitted (deny → drop, optional ERROR)
//!     → CONNECT/STOMP  → new Connection → connect
//!     → DISCONNECT     → receipt → teardown → close
//!     → anything else  → existing Connection::handle
//!     → FrameDispatcher (application handlers)
//!
//! Application publish
//!     → system broker link (reconnects once on link failure)
//!     → broker → subscription pumps
//!
//! Transport close
//!     → teardown + unregister, exactly once
//! ```
//!
//! # Design Decisions
//! - One failed connection never affects another or the registries
//! - Failures are logged with session id and command, then handled by the
//!   error's disposition
//! - Client bridges are never reconnected; only the system link is

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::bridge::connection::BridgeContext;
use crate::bridge::{BridgeError, BridgeSettings, Connection, Disposition};
use crate::broker::{
    AckMode, Broker, BrokerConnection, BrokerError, BrokerMessage, BrokerSession, Credentials,
    Producer, SESSION_PROPERTY,
};
use crate::observability::metrics::{
    ACTIVE_SESSIONS, DELIVERY_FAILURES_TOTAL, FRAMES_DENIED_TOTAL, FRAMES_RECEIVED_TOTAL,
};
use crate::routing::glob::DEFAULT_CACHE_CAPACITY;
use crate::routing::{DestinationEvents, FrameDispatcher, PatternCache};
use crate::security::SecurityRegistry;
use crate::session::{
    CloseReason, DeliveryError, RegistryError, Scheduler, Session, SessionId, SessionRegistry,
};
use crate::stomp::{version, Command, Frame};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("session {0} is not registered")]
    UnknownSession(SessionId),

    #[error("session {0} has no STOMP connection")]
    NotConnected(SessionId),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),
}

/// Broker link used for server-side publishing.
struct SystemLink {
    connection: Arc<dyn BrokerConnection>,
    session: Arc<dyn BrokerSession>,
    producer: Box<dyn Producer>,
}

impl SystemLink {
    async fn close(&self) {
        let _ = self.producer.close().await;
        let _ = self.session.close().await;
        let _ = self.connection.close().await;
    }
}

pub struct Relay {
    ctx: BridgeContext,
    security: Arc<SecurityRegistry>,
    dispatcher: Arc<FrameDispatcher>,
    patterns: Arc<PatternCache>,
    connections: DashMap<SessionId, Arc<Connection>>,
    system: tokio::sync::Mutex<Option<Arc<SystemLink>>>,
    system_credentials: Credentials,
    error_on_denied: AtomicBool,
}

impl Relay {
    pub fn new(settings: BridgeSettings, broker: Arc<dyn Broker>, scheduler: Arc<Scheduler>) -> Self {
        let patterns = Arc::new(PatternCache::new(DEFAULT_CACHE_CAPACITY));
        Self {
            ctx: BridgeContext {
                settings: Arc::new(settings),
                broker,
                scheduler,
                sessions: Arc::new(SessionRegistry::new()),
                events: Arc::new(DestinationEvents::new(patterns.clone())),
            },
            security: Arc::new(SecurityRegistry::new()),
            dispatcher: Arc::new(FrameDispatcher::new(patterns.clone())),
            patterns,
            connections: DashMap::new(),
            system: tokio::sync::Mutex::new(None),
            system_credentials: Credentials::default(),
            error_on_denied: AtomicBool::new(false),
        }
    }

    /// Credentials for the system broker link.
    pub fn with_system_credentials(mut self, credentials: Credentials) -> Self {
        self.system_credentials = credentials;
        self
    }

    pub fn with_security(mut self, security: Arc<SecurityRegistry>) -> Self {
        self.security = security;
        self
    }

    /// Answer denied frames with an ERROR instead of dropping them silently.
    pub fn set_error_on_denied(&self, enabled: bool) {
        self.error_on_denied.store(enabled, Ordering::Relaxed);
    }

    pub fn settings(&self) -> &BridgeSettings {
        &self.ctx.settings
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.ctx.sessions
    }

    pub fn security(&self) -> &Arc<SecurityRegistry> {
        &self.security
    }

    pub fn dispatcher(&self) -> &Arc<FrameDispatcher> {
        &self.dispatcher
    }

    pub fn events(&self) -> &Arc<DestinationEvents> {
        &self.ctx.events
    }

    pub fn patterns(&self) -> &Arc<PatternCache> {
        &self.patterns
    }

    pub fn connection(&self, session_id: &SessionId) -> Option<Arc<Connection>> {
        self.connections.get(session_id).map(|c| c.value().clone())
    }

    /// Sessions with an established (or establishing) STOMP connection.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// A transport session opened.
    pub fn on_open(&self, session: Arc<dyn Session>) -> Result<(), RelayError> {
        let id = session.id().clone();
        self.ctx.sessions.register(session)?;
        metrics::gauge!(ACTIVE_SESSIONS).set(self.ctx.sessions.len() as f64);
        tracing::debug!(session_id = %id, "Transport session opened");
        Ok(())
    }

    /// One decoded frame from a transport session.
    pub async fn on_frame(&self, session_id: &SessionId, frame: Frame) -> Result<(), RelayError> {
        let session = self
            .ctx
            .sessions
            .get(session_id)
            .ok_or_else(|| RelayError::UnknownSession(session_id.clone()))?;
        metrics::counter!(FRAMES_RECEIVED_TOTAL, "command" => frame.label()).increment(1);

        let connection = self.connection(session_id);
        if let Some(connection) = &connection {
            connection.touch();
        }
        let Some(command) = frame.command() else {
            return Ok(());
        };

        if !self.security.is_permitted(&frame, session.principal()) {
            self.deny(session.as_ref(), &frame).await;
            return Ok(());
        }

        match command {
            Command::Connect | Command::Stomp => {
                self.connect(session, connection, &frame).await;
                Ok(())
            }
            Command::Disconnect => {
                self.disconnect(session, connection, &frame).await;
                Ok(())
            }
            _ => {
                let Some(connection) = connection else {
                    tracing::warn!(
                        session_id = %session_id,
                        command = %command,
                        "Frame before CONNECT"
                    );
                    self.reject(session.as_ref(), None, &frame, BridgeError::NotConnected)
                        .await;
                    return Err(RelayError::NotConnected(session_id.clone()));
                };
                match connection.handle(&frame).await {
                    Ok(()) => self.dispatch(session.as_ref(), &frame),
                    Err(e) => {
                        self.reject(session.as_ref(), Some(&connection), &frame, e)
                            .await
                    }
                }
                Ok(())
            }
        }
    }

    async fn connect(
        &self,
        session: Arc<dyn Session>,
        existing: Option<Arc<Connection>>,
        frame: &Frame,
    ) {
        if let Some(existing) = existing {
            self.reject(session.as_ref(), Some(&existing), frame, BridgeError::AlreadyConnected)
                .await;
            return;
        }

        let connection = Connection::new(session.clone(), self.ctx.clone());
        self.connections
            .insert(session.id().clone(), connection.clone());
        match connection.connect(frame).await {
            Ok(()) => self.dispatch(session.as_ref(), frame),
            Err(e) => {
                self.connections.remove(session.id());
                connection.teardown().await;
                self.reject(session.as_ref(), None, frame, e).await;
            }
        }
    }

    async fn disconnect(
        &self,
        session: Arc<dyn Session>,
        connection: Option<Arc<Connection>>,
        frame: &Frame,
    ) {
        match &connection {
            Some(connection) => {
                if let Err(e) = connection.handle(frame).await {
                    tracing::debug!(
                        session_id = %session.id(),
                        command = "DISCONNECT",
                        error = %e,
                        "DISCONNECT on a failed connection"
                    );
                }
            }
            None => {
                if let Some(receipt) = frame.receipt() {
                    let _ = self.deliver(session.id(), &Frame::receipt_for(receipt)).await;
                }
            }
        }
        self.dispatch(session.as_ref(), frame);

        if let Some((_, connection)) = self.connections.remove(session.id()) {
            connection.teardown().await;
        }
        session.close(CloseReason::Normal).await;
    }

    async fn deny(&self, session: &dyn Session, frame: &Frame) {
        metrics::counter!(FRAMES_DENIED_TOTAL, "command" => frame.label()).increment(1);
        tracing::warn!(
            session_id = %session.id(),
            principal = session.principal().map(|p| p.name()).unwrap_or("anonymous"),
            command = frame.label(),
            destination = frame.destination().unwrap_or(""),
            "Frame denied"
        );
        if self.error_on_denied.load(Ordering::Relaxed) {
            let error = Frame::error(
                "access denied",
                Some(&format!("{} is not permitted", frame.label())),
                frame.receipt(),
            );
            let _ = self.deliver(session.id(), &error).await;
        }
    }

    /// Handle a failed frame according to the error's disposition.
    async fn reject(
        &self,
        session: &dyn Session,
        connection: Option<&Arc<Connection>>,
        frame: &Frame,
        error: BridgeError,
    ) {
        let session_id = session.id();
        let disposition = error.disposition();
        match disposition {
            Disposition::Log => {
                tracing::warn!(
                    session_id = %session_id,
                    command = frame.label(),
                    error = %error,
                    "Frame failed"
                );
            }
            Disposition::Error | Disposition::ErrorAndClose => {
                let close = disposition == Disposition::ErrorAndClose;
                tracing::warn!(
                    session_id = %session_id,
                    command = frame.label(),
                    error = %error,
                    close,
                    "Frame rejected"
                );
                let detail = error.to_string();
                let mut reply = Frame::error(error.summary(), Some(&detail), frame.receipt());
                if matches!(error, BridgeError::UnsupportedVersion { .. }) {
                    reply = reply.with_header("version", version::list(&self.ctx.settings.versions));
                }
                let _ = self.deliver(session_id, &reply).await;
                if close {
                    session.close(CloseReason::ProtocolError).await;
                }
            }
            Disposition::BrokerFailure => {
                let BridgeError::Broker(broker_error) = error else {
                    return;
                };
                match connection {
                    Some(connection) => connection.on_broker_failure(&broker_error).await,
                    None => {
                        tracing::warn!(
                            session_id = %session_id,
                            command = frame.label(),
                            error = %broker_error,
                            "Broker unavailable"
                        );
                        session.close(CloseReason::BrokerFailure).await;
                    }
                }
            }
        }
    }

    fn dispatch(&self, session: &dyn Session, frame: &Frame) {
        self.dispatcher
            .dispatch(session.id(), session.principal(), frame);
    }

    /// A transport session closed. Tears down its bridge and unregisters
    /// it; a second call for the same id fails with `NotFound`.
    pub async fn on_close(&self, session_id: &SessionId) -> Result<(), RelayError> {
        if let Some((_, connection)) = self.connections.remove(session_id) {
            connection.teardown().await;
        }
        self.ctx.sessions.unregister(session_id)?;
        metrics::gauge!(ACTIVE_SESSIONS).set(self.ctx.sessions.len() as f64);
        tracing::debug!(session_id = %session_id, "Transport session closed");
        Ok(())
    }

    /// Write a frame to one session. A vanished session is a logged,
    /// recoverable failure.
    pub async fn deliver(&self, session_id: &SessionId, frame: &Frame) -> Result<(), RelayError> {
        if let Err(e) = self.ctx.sessions.deliver_to_session(session_id, frame).await {
            metrics::counter!(DELIVERY_FAILURES_TOTAL).increment(1);
            tracing::warn!(
                session_id = %session_id,
                command = frame.label(),
                error = %e,
                "Delivery failed"
            );
            return Err(e.into());
        }
        Ok(())
    }

    /// Publish to the message's destination through the system link.
    pub async fn publish(&self, message: BrokerMessage) -> Result<(), RelayError> {
        let mut retried = false;
        loop {
            let link = self.system_link().await?;
            match link.producer.send(&message.destination, message.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_link_failure() && !retried => {
                    tracing::warn!(error = %e, "System broker link failed, reconnecting");
                    retried = true;
                    self.system.lock().await.take();
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Publish to subscriptions of one transport session only.
    pub async fn send_to_session(
        &self,
        session_id: &SessionId,
        mut message: BrokerMessage,
    ) -> Result<(), RelayError> {
        message.set_property(SESSION_PROPERTY, session_id.as_str());
        self.publish(message).await
    }

    async fn system_link(&self) -> Result<Arc<SystemLink>, BrokerError> {
        let mut slot = self.system.lock().await;
        if let Some(link) = slot.as_ref() {
            return Ok(link.clone());
        }
        let connection = self.ctx.broker.connect(&self.system_credentials).await?;
        let session = connection.create_session(false, AckMode::Auto).await?;
        let producer = session.create_producer().await?;
        let link = Arc::new(SystemLink {
            connection,
            session,
            producer,
        });
        *slot = Some(link.clone());
        Ok(link)
    }

    /// Tear every bridge down and close every session normally.
    pub async fn shutdown(&self) {
        let ids: Vec<SessionId> = self.connections.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, connection)) = self.connections.remove(&id) {
                connection.teardown().await;
            }
        }
        self.ctx.sessions.close_all(CloseReason::Normal).await;
        if let Some(link) = self.system.lock().await.take() {
            link.close().await;
        }
        tracing::info!("Relay shut down");
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("sessions", &self.ctx.sessions.len())
            .field("connections", &self.connections.len())
            .field("limitations", &self.security.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Destination, MemoryBroker};
    use crate::security::{Limitation, Principal};
    use crate::session::TransportError;
    use crate::stomp::codec;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    struct Recorder {
        id: SessionId,
        sent: Mutex<Vec<String>>,
        closed: Mutex<Option<CloseReason>>,
    }

    #[async_trait]
    impl Session for Recorder {
        fn id(&self) -> &SessionId {
            &self.id
        }

        fn principal(&self) -> Option<&Principal> {
            None
        }

        async fn send_text(&self, text: String) -> Result<(), TransportError> {
            self.sent.lock().push(text);
            Ok(())
        }

        async fn close(&self, reason: CloseReason) {
            self.closed.lock().get_or_insert(reason);
        }
    }

    fn recorder(id: &str) -> Arc<Recorder> {
        Arc::new(Recorder {
            id: SessionId::from(id),
            sent: Mutex::new(Vec::new()),
            closed: Mutex::new(None),
        })
    }

    fn relay() -> Relay {
        Relay::new(
            BridgeSettings::default(),
            Arc::new(MemoryBroker::new()),
            Arc::new(Scheduler::current()),
        )
    }

    fn connect() -> Frame {
        Frame::builder(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", "test")
            .build()
            .unwrap()
    }

    fn last(session: &Recorder) -> Frame {
        codec::decode_text(session.sent.lock().last().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn frame_before_connect_is_an_error() {
        let relay = relay();
        let session = recorder("a");
        relay.on_open(session.clone()).unwrap();

        let send = Frame::builder(Command::Send)
            .header("destination", "/queue/a")
            .build()
            .unwrap();
        let err = relay.on_frame(&session.id, send).await.unwrap_err();
        assert!(matches!(err, RelayError::NotConnected(_)));
        assert_eq!(last(&session).command(), Some(Command::Error));
        assert_eq!(*session.closed.lock(), Some(CloseReason::ProtocolError));
    }

    #[tokio::test]
    async fn denied_frame_is_dropped_or_answered() {
        let relay = relay();
        relay
            .security()
            .register(Limitation::builder().matches("/queue/secret").deny_all().build().unwrap());
        let session = recorder("a");
        relay.on_open(session.clone()).unwrap();
        relay.on_frame(&session.id, connect()).await.unwrap();

        let send = Frame::builder(Command::Send)
            .header("destination", "/queue/secret")
            .header("receipt", "r1")
            .build()
            .unwrap();
        relay.on_frame(&session.id, send.clone()).await.unwrap();
        assert_eq!(last(&session).command(), Some(Command::Connected));

        relay.set_error_on_denied(true);
        relay.on_frame(&session.id, send).await.unwrap();
        let error = last(&session);
        assert_eq!(error.command(), Some(Command::Error));
        assert_eq!(error.header("message"), Some("access denied"));
        assert_eq!(error.header("receipt-id"), Some("r1"));
        assert!(session.closed.lock().is_none());
    }

    #[tokio::test]
    async fn close_runs_once() {
        let relay = relay();
        let session = recorder("a");
        relay.on_open(session.clone()).unwrap();
        relay.on_frame(&session.id, connect()).await.unwrap();
        assert_eq!(relay.connection_count(), 1);

        relay.on_close(&session.id).await.unwrap();
        assert_eq!(relay.connection_count(), 0);
        assert!(relay.sessions().is_empty());
        assert!(matches!(
            relay.on_close(&session.id).await,
            Err(RelayError::Registry(RegistryError::NotFound(_)))
        ));
    }

    #[tokio::test]
    async fn send_to_session_reaches_only_that_session() {
        let relay = relay();
        let a = recorder("a");
        let b = recorder("b");
        for s in [&a, &b] {
            relay.on_open(s.clone()).unwrap();
            relay.on_frame(&s.id, connect()).await.unwrap();
            let sub = Frame::builder(Command::Subscribe)
                .header("id", "0")
                .header("destination", "/topic/news")
                .build()
                .unwrap();
            relay.on_frame(&s.id, sub).await.unwrap();
        }

        let message = BrokerMessage::new(Destination::parse("/topic/news"), "hi");
        relay.send_to_session(&a.id, message).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(last(&a).command(), Some(Command::Message));
        assert_eq!(last(&a).header("session"), None);
        assert_eq!(last(&b).command(), Some(Command::Connected));
    }
}
