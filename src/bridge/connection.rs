//! Per-connection bridge state machine.
//!
//! A `Connection` is created for one transport session on CONNECT and owns
//! every broker resource that session causes to exist: the broker
//! connection, lazily created auto/client sessions and producer, one
//! transacted session per open transaction, the subscriptions and the
//! heart-beat monitor.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::RwLock;

use crate::bridge::convert;
use crate::bridge::subscription::Subscription;
use crate::bridge::{BridgeError, BridgeSettings};
use crate::broker::{
    AckMode, Broker, BrokerConnection, BrokerError, BrokerMessage, BrokerSession, Credentials,
    Destination, MessageSelector, Producer,
};
use crate::observability::metrics::{
    BROKER_FAILURES_TOTAL, HEARTBEAT_TIMEOUTS_TOTAL, MESSAGES_DELIVERED_TOTAL,
};
use crate::routing::DestinationEvents;
use crate::security::Principal;
use crate::session::{
    CloseReason, DeliveryError, HeartBeatHooks, HeartBeatMonitor, Scheduler, Session, SessionId,
    SessionRegistry, TransportError,
};
use crate::stomp::{version, Command, Frame, FrameError, HeartBeat, Version};

/// Prefix of per-connection temporary queue names.
pub const TEMP_QUEUE_PREFIX: &str = "/temp-queue/";

/// Process-wide collaborators every connection needs.
#[derive(Clone)]
pub struct BridgeContext {
    pub settings: Arc<BridgeSettings>,
    pub broker: Arc<dyn Broker>,
    pub scheduler: Arc<Scheduler>,
    pub sessions: Arc<SessionRegistry>,
    pub events: Arc<DestinationEvents>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Default)]
struct Link {
    connection: Option<Arc<dyn BrokerConnection>>,
    auto: Option<Arc<dyn BrokerSession>>,
    client: Option<Arc<dyn BrokerSession>>,
    producer: Option<Arc<dyn Producer>>,
}

/// A delivered MESSAGE awaiting ACK/NACK.
#[derive(Debug, Clone)]
struct PendingAck {
    subscription: String,
    broker_id: String,
    seq: u64,
    mode: AckMode,
}

#[derive(Debug, Clone)]
struct DeferredAck {
    message_id: String,
    nack: bool,
}

struct Transaction {
    session: Arc<dyn BrokerSession>,
    producer: Box<dyn Producer>,
    deferred: Mutex<Vec<DeferredAck>>,
}

pub struct Connection {
    session_id: SessionId,
    transport: Arc<dyn Session>,
    ctx: BridgeContext,
    state: Mutex<ConnectionState>,
    version: Mutex<Option<Version>>,
    link: tokio::sync::Mutex<Link>,
    subscriptions: DashMap<String, Subscription>,
    pending_acks: DashMap<String, PendingAck>,
    transactions: DashMap<String, Arc<Transaction>>,
    temp_queues: DashMap<String, Destination>,
    heartbeat: Mutex<Option<HeartBeatMonitor>>,
    /// Held exclusively while a receipt-bearing frame is processed, shared
    /// by subscription pumps while they deliver.
    gate: RwLock<()>,
    seq: AtomicU64,
    torn_down: AtomicBool,
}

impl Connection {
    pub fn new(transport: Arc<dyn Session>, ctx: BridgeContext) -> Arc<Self> {
        Arc::new(Self {
            session_id: transport.id().clone(),
            transport,
            ctx,
            state: Mutex::new(ConnectionState::Disconnected),
            version: Mutex::new(None),
            link: tokio::sync::Mutex::new(Link::default()),
            subscriptions: DashMap::new(),
            pending_acks: DashMap::new(),
            transactions: DashMap::new(),
            temp_queues: DashMap::new(),
            heartbeat: Mutex::new(None),
            gate: RwLock::new(()),
            seq: AtomicU64::new(0),
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.transport.principal()
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    /// Negotiated protocol version once connected.
    pub fn version(&self) -> Option<Version> {
        *self.version.lock()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    pub fn pending_ack_count(&self) -> usize {
        self.pending_acks.len()
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }

    pub(crate) fn delivery_gate(&self) -> &RwLock<()> {
        &self.gate
    }

    /// Inbound traffic seen; pushes the read deadline out.
    pub fn touch(&self) {
        if let Some(monitor) = self.heartbeat.lock().as_ref() {
            monitor.reset_read();
        }
    }

    /// CONNECT / STOMP: negotiate, open the broker link, start heart-beats
    /// and answer with CONNECTED.
    pub async fn connect(self: &Arc<Self>, frame: &Frame) -> Result<(), BridgeError> {
        {
            let mut state = self.state.lock();
            if *state != ConnectionState::Disconnected || self.is_torn_down() {
                return Err(BridgeError::AlreadyConnected);
            }
            *state = ConnectionState::Connecting;
        }

        let result = self.establish(frame).await;
        if result.is_err() {
            *self.state.lock() = ConnectionState::Disconnected;
        }
        result
    }

    async fn establish(self: &Arc<Self>, frame: &Frame) -> Result<(), BridgeError> {
        let settings = &self.ctx.settings;
        let offered = frame.header("accept-version").unwrap_or(Version::V1_0.as_str());
        let version = version::negotiate(offered, &settings.versions).ok_or_else(|| {
            BridgeError::UnsupportedVersion {
                offered: offered.to_string(),
            }
        })?;
        let client_beat = match frame.header("heart-beat") {
            Some(value) => HeartBeat::parse(value)?,
            None => HeartBeat::DISABLED,
        };
        let negotiated = settings.heartbeat.negotiate(client_beat);

        let credentials = Credentials {
            login: frame.header("login").map(str::to_string),
            passcode: frame.header("passcode").map(str::to_string),
        };
        let connection = self.ctx.broker.connect(&credentials).await?;
        connection.set_error_listener(self.error_listener());
        self.link.lock().await.connection = Some(connection);
        *self.version.lock() = Some(version);

        let monitor = HeartBeatMonitor::new(
            &self.ctx.scheduler,
            Arc::new(TransportBeat {
                session_id: self.session_id.clone(),
                transport: self.transport.clone(),
            }),
        );
        monitor.start(
            negotiated.read.map(|read| settings.read_deadline(read)),
            negotiated.write,
        );
        *self.heartbeat.lock() = Some(monitor);

        let connected = Frame::builder(Command::Connected)
            .header("version", version.as_str())
            .header("heart-beat", negotiated.header().to_string())
            .header("server", settings.server.as_str())
            .header("session", self.session_id.as_str())
            .build()?;
        self.send(&connected).await?;
        *self.state.lock() = ConnectionState::Connected;

        tracing::debug!(
            session_id = %self.session_id,
            version = %version,
            heart_beat = %negotiated.header(),
            "STOMP session connected"
        );
        Ok(())
    }

    fn error_listener(self: &Arc<Self>) -> crate::broker::ErrorListener {
        let weak: Weak<Connection> = Arc::downgrade(self);
        let handle = Handle::current();
        Arc::new(move |error: BrokerError| {
            let weak = weak.clone();
            handle.spawn(async move {
                if let Some(connection) = weak.upgrade() {
                    connection.on_broker_failure(&error).await;
                }
            });
        })
    }

    /// Process one client frame on a connected session. A RECEIPT follows
    /// only once the frame's broker side effect has completed.
    pub async fn handle(self: &Arc<Self>, frame: &Frame) -> Result<(), BridgeError> {
        let Some(command) = frame.command() else {
            return Ok(());
        };
        if command.is_connect() {
            return Err(BridgeError::AlreadyConnected);
        }
        if self.state() != ConnectionState::Connected {
            return Err(BridgeError::NotConnected);
        }

        let _exclusive = match frame.receipt() {
            Some(_) => Some(self.gate.write().await),
            None => None,
        };

        match command {
            Command::Send => self.publish(frame).await?,
            Command::Subscribe => self.subscribe(frame).await?,
            Command::Unsubscribe => self.unsubscribe(frame).await?,
            Command::Ack => self.acknowledge(frame, false).await?,
            Command::Nack => self.acknowledge(frame, true).await?,
            Command::Begin => self.begin(frame).await?,
            Command::Commit => self.commit(frame).await?,
            Command::Abort => self.abort(frame).await?,
            Command::Disconnect => {}
            other => return Err(BridgeError::UnexpectedCommand(other)),
        }

        if let Some(receipt) = frame.receipt() {
            self.send(&Frame::receipt_for(receipt)).await?;
        }
        Ok(())
    }

    async fn publish(&self, frame: &Frame) -> Result<(), BridgeError> {
        let raw = required(frame, Command::Send, "destination")?;
        let destination = self.resolve(raw).await?;
        let mut message = convert::to_broker_message(frame, destination.clone());
        if let Some(reply_to) = message.property("reply-to").map(str::to_string) {
            if reply_to.starts_with(TEMP_QUEUE_PREFIX) {
                let resolved = self.resolve(&reply_to).await?;
                message.set_property("reply-to", resolved.as_str());
            }
        }

        match frame.transaction() {
            Some(id) => {
                let transaction = self.transaction(id)?;
                transaction.producer.send(&destination, message).await?;
            }
            None => {
                let producer = self.producer().await?;
                producer.send(&destination, message).await?;
            }
        }
        Ok(())
    }

    async fn subscribe(self: &Arc<Self>, frame: &Frame) -> Result<(), BridgeError> {
        let id = required(frame, Command::Subscribe, "id")?;
        let raw = required(frame, Command::Subscribe, "destination")?;
        if self.subscriptions.contains_key(id) {
            return Err(BridgeError::DuplicateSubscription(id.to_string()));
        }
        let ack = frame.header("ack");
        let ack_mode = AckMode::parse(ack)
            .ok_or_else(|| BridgeError::InvalidAckMode(ack.unwrap_or_default().to_string()))?;
        let selector = MessageSelector::new(Some(self.session_id.as_str()), frame.header("selector"))?;

        let destination = self.resolve(raw).await?;
        let session = self.session_for(ack_mode).await?;
        let consumer = session.create_consumer(&destination, selector).await?;
        let subscription = Subscription::spawn(
            Arc::downgrade(self),
            id.to_string(),
            raw.to_string(),
            ack_mode,
            consumer,
        );
        self.subscriptions.insert(id.to_string(), subscription);
        self.ctx.events.subscribed(&self.session_id, raw);

        tracing::debug!(
            session_id = %self.session_id,
            subscription = %id,
            destination = %raw,
            ack = ack_mode.as_str(),
            "Subscribed"
        );
        Ok(())
    }

    async fn unsubscribe(&self, frame: &Frame) -> Result<(), BridgeError> {
        let id = required(frame, Command::Unsubscribe, "id")?;
        let (_, subscription) = self
            .subscriptions
            .remove(id)
            .ok_or_else(|| BridgeError::UnknownSubscription(id.to_string()))?;
        let destination = subscription.destination().to_string();
        subscription.cancel().await;

        // Messages still awaiting ACK go back to the broker.
        let orphaned: Vec<PendingAck> = self
            .pending_acks
            .iter()
            .filter(|e| e.subscription == id)
            .map(|e| e.value().clone())
            .collect();
        self.pending_acks.retain(|_, p| p.subscription != id);
        let client = self.link.lock().await.client.clone();
        if let Some(client) = client {
            for pending in orphaned {
                if let Err(e) = client.release(&pending.broker_id).await {
                    tracing::debug!(
                        session_id = %self.session_id,
                        message_id = %pending.broker_id,
                        error = %e,
                        "Release on unsubscribe failed"
                    );
                }
            }
        }

        self.ctx.events.unsubscribed(&self.session_id, &destination);
        Ok(())
    }

    async fn acknowledge(&self, frame: &Frame, nack: bool) -> Result<(), BridgeError> {
        let command = if nack { Command::Nack } else { Command::Ack };
        let message_id = frame
            .header("id")
            .or_else(|| frame.header("message-id"))
            .ok_or(FrameError::MissingAnyHeader {
                command,
                headers: &["id", "message-id"],
            })?;
        if !self.pending_acks.contains_key(message_id) {
            return Err(BridgeError::UnknownMessage(message_id.to_string()));
        }

        match frame.transaction() {
            Some(id) => {
                self.transaction(id)?.deferred.lock().push(DeferredAck {
                    message_id: message_id.to_string(),
                    nack,
                });
                Ok(())
            }
            None => self.settle(message_id, nack).await,
        }
    }

    /// Acknowledge or release a delivered message. `client` subscriptions
    /// settle cumulatively: every earlier pending message of the same
    /// subscription goes with it.
    async fn settle(&self, message_id: &str, nack: bool) -> Result<(), BridgeError> {
        let target = self
            .pending_acks
            .get(message_id)
            .map(|p| p.value().clone())
            .ok_or_else(|| BridgeError::UnknownMessage(message_id.to_string()))?;

        let mut settled: Vec<(String, PendingAck)> = match target.mode {
            AckMode::Client => self
                .pending_acks
                .iter()
                .filter(|e| e.subscription == target.subscription && e.seq <= target.seq)
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            _ => vec![(message_id.to_string(), target)],
        };
        settled.sort_by_key(|(_, p)| p.seq);

        let client = self
            .link
            .lock()
            .await
            .client
            .clone()
            .ok_or_else(|| BridgeError::UnknownMessage(message_id.to_string()))?;
        // An entry stays pending until the broker has taken the outcome.
        for (id, pending) in settled {
            if nack {
                client.release(&pending.broker_id).await?;
            } else {
                client.acknowledge(&pending.broker_id).await?;
            }
            self.pending_acks.remove(&id);
        }
        Ok(())
    }

    async fn begin(&self, frame: &Frame) -> Result<(), BridgeError> {
        let id = required(frame, Command::Begin, "transaction")?;
        if self.transactions.contains_key(id) {
            return Err(BridgeError::DuplicateTransaction(id.to_string()));
        }
        let connection = self.broker_connection().await?;
        let session = connection.create_session(true, AckMode::Auto).await?;
        let producer = session.create_producer().await?;
        self.transactions.insert(
            id.to_string(),
            Arc::new(Transaction {
                session,
                producer,
                deferred: Mutex::new(Vec::new()),
            }),
        );
        Ok(())
    }

    async fn commit(&self, frame: &Frame) -> Result<(), BridgeError> {
        let id = required(frame, Command::Commit, "transaction")?;
        let (_, transaction) = self
            .transactions
            .remove(id)
            .ok_or_else(|| BridgeError::UnknownTransaction(id.to_string()))?;
        transaction.session.commit().await?;

        let deferred: Vec<DeferredAck> = transaction.deferred.lock().drain(..).collect();
        for ack in deferred {
            if let Err(e) = self.settle(&ack.message_id, ack.nack).await {
                if matches!(&e, BridgeError::Broker(b) if b.is_link_failure()) {
                    return Err(e);
                }
                tracing::warn!(
                    session_id = %self.session_id,
                    transaction = %id,
                    message_id = %ack.message_id,
                    error = %e,
                    "Deferred acknowledgement failed"
                );
            }
        }
        self.close_transaction(id, &transaction).await;
        Ok(())
    }

    async fn abort(&self, frame: &Frame) -> Result<(), BridgeError> {
        let id = required(frame, Command::Abort, "transaction")?;
        let (_, transaction) = self
            .transactions
            .remove(id)
            .ok_or_else(|| BridgeError::UnknownTransaction(id.to_string()))?;
        transaction.deferred.lock().clear();
        transaction.session.rollback().await?;
        self.close_transaction(id, &transaction).await;
        Ok(())
    }

    async fn close_transaction(&self, id: &str, transaction: &Transaction) {
        if let Err(e) = transaction.producer.close().await {
            tracing::debug!(session_id = %self.session_id, transaction = %id, error = %e, "Producer close failed");
        }
        if let Err(e) = transaction.session.close().await {
            tracing::debug!(session_id = %self.session_id, transaction = %id, error = %e, "Session close failed");
        }
    }

    fn transaction(&self, id: &str) -> Result<Arc<Transaction>, BridgeError> {
        self.transactions
            .get(id)
            .map(|t| t.value().clone())
            .ok_or_else(|| BridgeError::UnknownTransaction(id.to_string()))
    }

    async fn broker_connection(&self) -> Result<Arc<dyn BrokerConnection>, BridgeError> {
        self.link
            .lock()
            .await
            .connection
            .clone()
            .ok_or(BridgeError::NotConnected)
    }

    /// Non-transacted session for the given ack mode, created on first use.
    /// Every acknowledging subscription shares one client session.
    async fn session_for(&self, mode: AckMode) -> Result<Arc<dyn BrokerSession>, BridgeError> {
        let mut link = self.link.lock().await;
        let connection = link.connection.clone().ok_or(BridgeError::NotConnected)?;
        let slot = if mode.requires_ack() {
            &mut link.client
        } else {
            &mut link.auto
        };
        if let Some(session) = slot {
            return Ok(session.clone());
        }
        let broker_mode = if mode.requires_ack() {
            AckMode::ClientIndividual
        } else {
            AckMode::Auto
        };
        let session = connection.create_session(false, broker_mode).await?;
        *slot = Some(session.clone());
        Ok(session)
    }

    async fn producer(&self) -> Result<Arc<dyn Producer>, BridgeError> {
        if let Some(producer) = self.link.lock().await.producer.clone() {
            return Ok(producer);
        }
        let session = self.session_for(AckMode::Auto).await?;
        let producer: Arc<dyn Producer> = Arc::from(session.create_producer().await?);
        self.link.lock().await.producer = Some(producer.clone());
        Ok(producer)
    }

    /// Map a client destination to a broker destination. Temporary queue
    /// names are private to this connection.
    async fn resolve(&self, raw: &str) -> Result<Destination, BridgeError> {
        if !raw.starts_with(TEMP_QUEUE_PREFIX) {
            return Ok(Destination::parse(raw));
        }
        if let Some(existing) = self.temp_queues.get(raw) {
            return Ok(existing.value().clone());
        }
        let session = self.session_for(AckMode::Auto).await?;
        let queue = session.create_temporary_queue().await?;
        self.temp_queues.insert(raw.to_string(), queue.clone());
        Ok(queue)
    }

    /// Forward one broker message to the client as a MESSAGE frame.
    pub(crate) async fn deliver_message(
        &self,
        subscription: &str,
        destination: &str,
        ack_mode: AckMode,
        message: BrokerMessage,
    ) -> Result<(), BridgeError> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let message_id = format!("{}-{}", self.session_id, seq);
        if ack_mode.requires_ack() {
            self.pending_acks.insert(
                message_id.clone(),
                PendingAck {
                    subscription: subscription.to_string(),
                    broker_id: message.id.clone(),
                    seq,
                    mode: ack_mode,
                },
            );
        }
        let ack = ack_mode.requires_ack().then_some(message_id.as_str());
        let frame = convert::to_message_frame(&message, destination, subscription, &message_id, ack)?;
        self.send(&frame).await?;
        metrics::counter!(MESSAGES_DELIVERED_TOTAL).increment(1);
        Ok(())
    }

    /// Write a frame to this connection's transport session.
    pub async fn send(&self, frame: &Frame) -> Result<(), BridgeError> {
        self.ctx
            .sessions
            .deliver_to_session(&self.session_id, frame)
            .await
            .map_err(|e| match e {
                DeliveryError::NotFound(id) => TransportError::Closed(id),
                DeliveryError::Transport(e) => e,
            })?;
        if let Some(monitor) = self.heartbeat.lock().as_ref() {
            monitor.reset_send();
        }
        Ok(())
    }

    /// Broker link is gone: release everything and close the client.
    pub async fn on_broker_failure(&self, error: &BrokerError) {
        if self.is_torn_down() {
            return;
        }
        tracing::warn!(
            session_id = %self.session_id,
            error = %error,
            "Broker link failed, closing session"
        );
        metrics::counter!(BROKER_FAILURES_TOTAL).increment(1);
        self.teardown().await;
        self.transport.close(CloseReason::BrokerFailure).await;
    }

    /// Release every resource of this connection. Runs once; later calls
    /// return immediately.
    ///
    /// Order: heart-beat timers, subscriptions, producers, transactions,
    /// sessions, broker connection.
    pub async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.state.lock() = ConnectionState::Disconnected;

        if let Some(monitor) = self.heartbeat.lock().take() {
            monitor.close();
        }

        let ids: Vec<String> = self.subscriptions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some((_, subscription)) = self.subscriptions.remove(&id) {
                let destination = subscription.destination().to_string();
                subscription.cancel().await;
                self.ctx.events.unsubscribed(&self.session_id, &destination);
            }
        }
        self.pending_acks.clear();

        let link = std::mem::take(&mut *self.link.lock().await);
        if let Some(producer) = link.producer {
            log_close(&self.session_id, "producer", producer.close().await);
        }

        let transactions: Vec<(String, Arc<Transaction>)> = self
            .transactions
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        self.transactions.clear();
        for (id, transaction) in transactions {
            if let Err(e) = transaction.session.rollback().await {
                tracing::debug!(session_id = %self.session_id, transaction = %id, error = %e, "Rollback on teardown failed");
            }
            self.close_transaction(&id, &transaction).await;
        }

        for session in [link.auto, link.client].into_iter().flatten() {
            log_close(&self.session_id, "session", session.close().await);
        }
        if let Some(connection) = link.connection {
            log_close(&self.session_id, "connection", connection.close().await);
        }
        self.temp_queues.clear();

        tracing::debug!(session_id = %self.session_id, "Bridge torn down");
    }
}

fn required<'a>(frame: &'a Frame, command: Command, header: &'static str) -> Result<&'a str, FrameError> {
    frame
        .header(header)
        .ok_or(FrameError::MissingHeader { command, header })
}

fn log_close(session_id: &SessionId, resource: &'static str, result: Result<(), BrokerError>) {
    if let Err(e) = result {
        tracing::debug!(session_id = %session_id, resource, error = %e, "Broker resource close failed");
    }
}

/// Heart-beat hooks writing straight to the transport, so a heart-beat
/// never resets the write timer it was sent from.
struct TransportBeat {
    session_id: SessionId,
    transport: Arc<dyn Session>,
}

#[async_trait]
impl HeartBeatHooks for TransportBeat {
    async fn send_heartbeat(&self) -> Result<(), TransportError> {
        self.transport.send_frame(&Frame::heartbeat()).await
    }

    async fn on_read_timeout(&self) {
        tracing::warn!(session_id = %self.session_id, "Heart-beat read timeout, closing session");
        metrics::counter!(HEARTBEAT_TIMEOUTS_TOTAL).increment(1);
        self.transport.close(CloseReason::PolicyViolation).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::MemoryBroker;
    use crate::routing::PatternCache;
    use crate::stomp::codec;
    use std::time::Duration;

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

    impl Recorder {
        fn frames(&self) -> Vec<Frame> {
            self.sent
                .lock()
                .iter()
                .map(|t| codec::decode_text(t).unwrap())
                .filter(|f| !f.is_heartbeat())
                .collect()
        }
    }

    fn setup(broker: MemoryBroker) -> (Arc<Recorder>, Arc<Connection>) {
        let transport = Arc::new(Recorder {
            id: SessionId::from("s-1"),
            sent: Mutex::new(Vec::new()),
            closed: Mutex::new(None),
        });
        let sessions = Arc::new(SessionRegistry::new());
        sessions.register(transport.clone()).unwrap();
        let ctx = BridgeContext {
            settings: Arc::new(BridgeSettings::default()),
            broker: Arc::new(broker),
            scheduler: Arc::new(Scheduler::current()),
            sessions,
            events: Arc::new(DestinationEvents::new(Arc::new(PatternCache::default()))),
        };
        let connection = Connection::new(transport.clone(), ctx);
        (transport, connection)
    }

    fn connect_frame() -> Frame {
        Frame::builder(Command::Connect)
            .header("accept-version", "1.1,1.2")
            .header("host", "test")
            .build()
            .unwrap()
    }

    fn frame(command: Command, headers: &[(&str, &str)]) -> Frame {
        Frame::builder(command)
            .headers(headers.iter().copied())
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn connect_answers_connected() {
        let (transport, connection) = setup(MemoryBroker::new());
        connection.connect(&connect_frame()).await.unwrap();

        let frames = transport.frames();
        assert_eq!(frames[0].command(), Some(Command::Connected));
        assert_eq!(frames[0].header("version"), Some("1.2"));
        assert_eq!(frames[0].header("heart-beat"), Some("0,0"));
        assert_eq!(frames[0].header("session"), Some("s-1"));
        assert_eq!(connection.state(), ConnectionState::Connected);
        assert_eq!(connection.version(), Some(Version::V1_2));
    }

    #[tokio::test]
    async fn second_connect_is_rejected() {
        let (_, connection) = setup(MemoryBroker::new());
        connection.connect(&connect_frame()).await.unwrap();
        let err = connection.connect(&connect_frame()).await.unwrap_err();
        assert!(matches!(err, BridgeError::AlreadyConnected));
    }

    #[tokio::test]
    async fn bad_credentials_leave_connection_disconnected() {
        let (_, connection) = setup(MemoryBroker::with_credentials("guest", "guest"));
        let frame = Frame::builder(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", "test")
            .header("login", "guest")
            .header("passcode", "nope")
            .build()
            .unwrap();
        let err = connection.connect(&frame).await.unwrap_err();
        assert!(matches!(err, BridgeError::Broker(BrokerError::AuthenticationFailed(_))));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn duplicate_subscription_id_is_an_error() {
        let (_, connection) = setup(MemoryBroker::new());
        connection.connect(&connect_frame()).await.unwrap();
        let sub = frame(Command::Subscribe, &[("id", "0"), ("destination", "/topic/a")]);
        connection.handle(&sub).await.unwrap();
        let err = connection.handle(&sub).await.unwrap_err();
        assert!(matches!(err, BridgeError::DuplicateSubscription(id) if id == "0"));
    }

    #[tokio::test]
    async fn client_ack_is_cumulative() {
        let broker = MemoryBroker::new();
        let (transport, connection) = setup(broker.clone());
        connection.connect(&connect_frame()).await.unwrap();
        connection
            .handle(&frame(
                Command::Subscribe,
                &[("id", "0"), ("destination", "/queue/work"), ("ack", "client")],
            ))
            .await
            .unwrap();
        for _ in 0..3 {
            connection
                .handle(&frame(Command::Send, &[("destination", "/queue/work")]))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connection.pending_ack_count(), 3);

        let messages: Vec<Frame> = transport
            .frames()
            .into_iter()
            .filter(|f| f.command() == Some(Command::Message))
            .collect();
        let second = messages[1].header("ack").unwrap().to_string();
        connection
            .handle(&frame(Command::Ack, &[("id", second.as_str())]))
            .await
            .unwrap();
        assert_eq!(connection.pending_ack_count(), 1);
    }

    #[tokio::test]
    async fn failed_ack_keeps_messages_pending() {
        let broker = MemoryBroker::new();
        let (transport, connection) = setup(broker.clone());
        connection.connect(&connect_frame()).await.unwrap();
        connection
            .handle(&frame(
                Command::Subscribe,
                &[("id", "0"), ("destination", "/queue/work"), ("ack", "client")],
            ))
            .await
            .unwrap();
        for _ in 0..2 {
            connection
                .handle(&frame(Command::Send, &[("destination", "/queue/work")]))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(connection.pending_ack_count(), 2);

        let last = transport
            .frames()
            .into_iter()
            .filter(|f| f.command() == Some(Command::Message))
            .last()
            .and_then(|f| f.header("ack").map(str::to_string))
            .unwrap();
        // Broker failure handling runs on a spawned task, after this ACK.
        broker.sever();
        let err = connection
            .handle(&frame(Command::Ack, &[("id", last.as_str())]))
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::Broker(_)));
        assert_eq!(connection.pending_ack_count(), 2);
    }

    #[tokio::test]
    async fn teardown_is_idempotent_and_releases_broker() {
        let broker = MemoryBroker::new();
        let (_, connection) = setup(broker.clone());
        connection.connect(&connect_frame()).await.unwrap();
        connection
            .handle(&frame(Command::Subscribe, &[("id", "0"), ("destination", "/queue/a")]))
            .await
            .unwrap();
        connection
            .handle(&frame(Command::Begin, &[("transaction", "tx")]))
            .await
            .unwrap();
        assert_eq!(broker.consumer_count("/queue/a"), 1);

        connection.teardown().await;
        connection.teardown().await;
        assert_eq!(broker.consumer_count("/queue/a"), 0);
        assert_eq!(broker.connection_count(), 0);
        assert_eq!(connection.subscription_count(), 0);
        assert_eq!(connection.transaction_count(), 0);
        assert!(matches!(
            connection.handle(&frame(Command::Send, &[("destination", "/queue/a")])).await,
            Err(BridgeError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn temp_queue_is_private_and_stable() {
        let broker = MemoryBroker::new();
        let (transport, connection) = setup(broker.clone());
        connection.connect(&connect_frame()).await.unwrap();
        connection
            .handle(&frame(Command::Subscribe, &[("id", "r"), ("destination", "/temp-queue/replies")]))
            .await
            .unwrap();
        connection
            .handle(&frame(Command::Send, &[("destination", "/temp-queue/replies")]))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let message = transport
            .frames()
            .into_iter()
            .find(|f| f.command() == Some(Command::Message))
            .unwrap();
        assert_eq!(message.destination(), Some("/temp-queue/replies"));
        assert_eq!(message.header("subscription"), Some("r"));
    }

    #[tokio::test]
    async fn broker_failure_closes_transport() {
        let broker = MemoryBroker::new();
        let (transport, connection) = setup(broker.clone());
        connection.connect(&connect_frame()).await.unwrap();
        broker.sever();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(connection.is_torn_down());
        assert_eq!(*transport.closed.lock(), Some(CloseReason::BrokerFailure));
    }
}
