//! Embedded in-memory broker.
//!
//! # Responsibilities
//! - Topics fan out to every consumer whose selector matches
//! - Queues and direct destinations hand each message to one consumer,
//!   round-robin, and hold a backlog while no consumer matches
//! - Client-acknowledge sessions keep delivered messages until acked;
//!   released or orphaned queue messages are redelivered
//! - Transacted sessions buffer sends until commit
//!
//! # Design Decisions
//! - All routing state sits behind one mutex; nothing awaits while it is held
//! - Consumer channels are unbounded so `send` never waits on a slow reader
//! - Nothing is persisted

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::broker::{
    AckMode, Broker, BrokerConnection, BrokerError, BrokerMessage, BrokerSession, Consumer,
    Credentials, Destination, ErrorListener, MessageSelector, Producer,
};

struct ConsumerEntry {
    destination: Destination,
    selector: MessageSelector,
    tx: mpsc::UnboundedSender<BrokerMessage>,
    session: u64,
}

#[derive(Default)]
struct Core {
    /// Ordered by id, which fixes the round-robin order.
    consumers: BTreeMap<u64, ConsumerEntry>,
    backlog: HashMap<Destination, VecDeque<BrokerMessage>>,
    cursors: HashMap<Destination, usize>,
    connections: HashMap<u64, Arc<ConnectionCore>>,
}

impl Core {
    fn route(&mut self, message: BrokerMessage) {
        let targets: Vec<u64> = self
            .consumers
            .iter()
            .filter(|(_, c)| c.destination == message.destination && c.selector.matches(&message))
            .map(|(id, _)| *id)
            .collect();

        if !message.destination.is_point_to_point() {
            for id in targets {
                if let Some(consumer) = self.consumers.get(&id) {
                    let _ = consumer.tx.send(message.clone());
                }
            }
            return;
        }

        if targets.is_empty() {
            self.backlog
                .entry(message.destination.clone())
                .or_default()
                .push_back(message);
            return;
        }

        let cursor = self.cursors.entry(message.destination.clone()).or_insert(0);
        let target = targets[*cursor % targets.len()];
        *cursor = cursor.wrapping_add(1);

        let undelivered = match self.consumers.get(&target) {
            Some(consumer) => consumer.tx.send(message).err().map(|e| e.0),
            None => Some(message),
        };
        if let Some(message) = undelivered {
            self.backlog
                .entry(message.destination.clone())
                .or_default()
                .push_back(message);
        }
    }

    /// Feed backlog messages the new consumer accepts.
    fn drain_backlog(&mut self, consumer: u64) {
        let Some(entry) = self.consumers.get(&consumer) else {
            return;
        };
        let Some(backlog) = self.backlog.get_mut(&entry.destination) else {
            return;
        };
        let mut kept = VecDeque::with_capacity(backlog.len());
        while let Some(message) = backlog.pop_front() {
            if entry.selector.matches(&message) {
                if let Err(e) = entry.tx.send(message) {
                    kept.push_back(e.0);
                }
            } else {
                kept.push_back(message);
            }
        }
        *backlog = kept;
    }

    fn requeue(&mut self, mut message: BrokerMessage) {
        if message.destination.is_point_to_point() {
            message.redelivered = true;
            self.route(message);
        }
    }
}

struct State {
    required: Option<Credentials>,
    core: Mutex<Core>,
    ids: AtomicU64,
}

impl State {
    fn next_id(&self) -> u64 {
        self.ids.fetch_add(1, Ordering::Relaxed)
    }

    fn close_session(&self, session: &SessionCore) {
        if session.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let unacked: Vec<_> = session.unacked.lock().drain(..).collect();
        session.pending.lock().clear();

        let mut core = self.core.lock();
        core.consumers.retain(|_, c| c.session != session.id);
        for message in unacked {
            core.requeue(message);
        }
    }

    fn close_connection(&self, connection: &ConnectionCore) -> bool {
        if connection.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let sessions: Vec<_> = connection.sessions.lock().drain(..).collect();
        for session in sessions {
            self.close_session(&session);
        }
        self.core.lock().connections.remove(&connection.id);
        true
    }
}

/// In-process broker implementing the broker boundary.
#[derive(Clone)]
pub struct MemoryBroker {
    state: Arc<State>,
}

impl MemoryBroker {
    /// Broker accepting any credentials.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Broker accepting only the given login and passcode.
    pub fn with_credentials(login: impl Into<String>, passcode: impl Into<String>) -> Self {
        Self::build(Some(Credentials {
            login: Some(login.into()),
            passcode: Some(passcode.into()),
        }))
    }

    fn build(required: Option<Credentials>) -> Self {
        Self {
            state: Arc::new(State {
                required,
                core: Mutex::new(Core::default()),
                ids: AtomicU64::new(1),
            }),
        }
    }

    /// Break every open connection and notify its error listener.
    pub fn sever(&self) {
        let connections: Vec<_> = self.state.core.lock().connections.values().cloned().collect();
        for connection in connections {
            if self.state.close_connection(&connection) {
                let listener = connection.listener.lock().clone();
                if let Some(listener) = listener {
                    listener(BrokerError::LinkFailure("connection severed".to_string()));
                }
            }
        }
    }

    pub fn connection_count(&self) -> usize {
        self.state.core.lock().connections.len()
    }

    pub fn consumer_count(&self, destination: &str) -> usize {
        let destination = Destination::parse(destination);
        self.state
            .core
            .lock()
            .consumers
            .values()
            .filter(|c| c.destination == destination)
            .count()
    }

    /// Messages waiting for a consumer on a queue or direct destination.
    pub fn backlog_len(&self, destination: &str) -> usize {
        self.state
            .core
            .lock()
            .backlog
            .get(&Destination::parse(destination))
            .map(VecDeque::len)
            .unwrap_or(0)
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        if let Some(required) = &self.state.required {
            if required != credentials {
                return Err(BrokerError::AuthenticationFailed(
                    credentials.login.clone().unwrap_or_default(),
                ));
            }
        }
        let connection = Arc::new(ConnectionCore {
            id: self.state.next_id(),
            closed: AtomicBool::new(false),
            listener: Mutex::new(None),
            sessions: Mutex::new(Vec::new()),
        });
        self.state
            .core
            .lock()
            .connections
            .insert(connection.id, connection.clone());
        Ok(Arc::new(MemoryConnection {
            state: self.state.clone(),
            core: connection,
        }))
    }
}

struct ConnectionCore {
    id: u64,
    closed: AtomicBool,
    listener: Mutex<Option<ErrorListener>>,
    sessions: Mutex<Vec<Arc<SessionCore>>>,
}

struct MemoryConnection {
    state: Arc<State>,
    core: Arc<ConnectionCore>,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn create_session(
        &self,
        transacted: bool,
        ack_mode: AckMode,
    ) -> Result<Arc<dyn BrokerSession>, BrokerError> {
        if self.core.closed.load(Ordering::Acquire) {
            return Err(BrokerError::ConnectionClosed);
        }
        let session = Arc::new(SessionCore {
            id: self.state.next_id(),
            connection: self.core.clone(),
            transacted,
            ack_mode,
            closed: AtomicBool::new(false),
            unacked: Mutex::new(Vec::new()),
            pending: Mutex::new(Vec::new()),
        });
        self.core.sessions.lock().push(session.clone());
        Ok(Arc::new(MemorySession {
            state: self.state.clone(),
            core: session,
        }))
    }

    fn set_error_listener(&self, listener: ErrorListener) {
        *self.core.listener.lock() = Some(listener);
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.state.close_connection(&self.core);
        Ok(())
    }
}

struct SessionCore {
    id: u64,
    connection: Arc<ConnectionCore>,
    transacted: bool,
    ack_mode: AckMode,
    closed: AtomicBool,
    /// Delivered but unacknowledged, in delivery order.
    unacked: Mutex<Vec<BrokerMessage>>,
    /// Sends buffered by a transacted session.
    pending: Mutex<Vec<BrokerMessage>>,
}

impl SessionCore {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.connection.closed.load(Ordering::Acquire) {
            return Err(BrokerError::ConnectionClosed);
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(BrokerError::SessionClosed);
        }
        Ok(())
    }

    fn take_unacked(&self, message_id: &str) -> Result<BrokerMessage, BrokerError> {
        let mut unacked = self.unacked.lock();
        let pos = unacked
            .iter()
            .position(|m| m.id == message_id)
            .ok_or_else(|| BrokerError::UnknownMessage(message_id.to_string()))?;
        Ok(unacked.remove(pos))
    }
}

struct MemorySession {
    state: Arc<State>,
    core: Arc<SessionCore>,
}

#[async_trait]
impl BrokerSession for MemorySession {
    async fn create_producer(&self) -> Result<Box<dyn Producer>, BrokerError> {
        self.core.ensure_open()?;
        Ok(Box::new(MemoryProducer {
            state: self.state.clone(),
            session: self.core.clone(),
        }))
    }

    async fn create_consumer(
        &self,
        destination: &Destination,
        selector: MessageSelector,
    ) -> Result<Box<dyn Consumer>, BrokerError> {
        self.core.ensure_open()?;
        let id = self.state.next_id();
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut core = self.state.core.lock();
            core.consumers.insert(
                id,
                ConsumerEntry {
                    destination: destination.clone(),
                    selector,
                    tx,
                    session: self.core.id,
                },
            );
            if destination.is_point_to_point() {
                core.drain_backlog(id);
            }
        }
        Ok(Box::new(MemoryConsumer {
            id,
            rx,
            state: self.state.clone(),
            session: self.core.clone(),
            detached: false,
        }))
    }

    async fn create_temporary_queue(&self) -> Result<Destination, BrokerError> {
        self.core.ensure_open()?;
        Ok(Destination::Queue(format!(
            "{}temp.{}",
            Destination::QUEUE_PREFIX,
            uuid::Uuid::new_v4()
        )))
    }

    async fn acknowledge(&self, message_id: &str) -> Result<(), BrokerError> {
        self.core.ensure_open()?;
        self.core.take_unacked(message_id).map(|_| ())
    }

    async fn release(&self, message_id: &str) -> Result<(), BrokerError> {
        self.core.ensure_open()?;
        let message = self.core.take_unacked(message_id)?;
        self.state.core.lock().requeue(message);
        Ok(())
    }

    async fn commit(&self) -> Result<(), BrokerError> {
        self.core.ensure_open()?;
        if !self.core.transacted {
            return Err(BrokerError::NotTransacted);
        }
        let pending: Vec<_> = self.core.pending.lock().drain(..).collect();
        let mut core = self.state.core.lock();
        for message in pending {
            core.route(message);
        }
        Ok(())
    }

    async fn rollback(&self) -> Result<(), BrokerError> {
        self.core.ensure_open()?;
        if !self.core.transacted {
            return Err(BrokerError::NotTransacted);
        }
        self.core.pending.lock().clear();
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.state.close_session(&self.core);
        self.core
            .connection
            .sessions
            .lock()
            .retain(|s| s.id != self.core.id);
        Ok(())
    }
}

struct MemoryProducer {
    state: Arc<State>,
    session: Arc<SessionCore>,
}

#[async_trait]
impl Producer for MemoryProducer {
    async fn send(&self, destination: &Destination, mut message: BrokerMessage) -> Result<(), BrokerError> {
        self.session.ensure_open()?;
        message.id = format!("ID:memory-{}", self.state.next_id());
        message.destination = destination.clone();
        if self.session.transacted {
            self.session.pending.lock().push(message);
        } else {
            self.state.core.lock().route(message);
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), BrokerError> {
        Ok(())
    }
}

struct MemoryConsumer {
    id: u64,
    rx: mpsc::UnboundedReceiver<BrokerMessage>,
    state: Arc<State>,
    session: Arc<SessionCore>,
    detached: bool,
}

impl MemoryConsumer {
    /// Unregister and hand buffered queue messages to other consumers.
    fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        let mut core = self.state.core.lock();
        core.consumers.remove(&self.id);
        while let Ok(message) = self.rx.try_recv() {
            core.requeue(message);
        }
    }
}

#[async_trait]
impl Consumer for MemoryConsumer {
    async fn recv(&mut self) -> Option<BrokerMessage> {
        if self.detached || self.session.ensure_open().is_err() {
            return None;
        }
        let message = self.rx.recv().await?;
        if self.session.ensure_open().is_err() {
            return None;
        }
        if self.session.ack_mode.requires_ack() && !self.session.transacted {
            self.session.unacked.lock().push(message.clone());
        }
        Some(message)
    }

    async fn close(&mut self) -> Result<(), BrokerError> {
        self.detach();
        Ok(())
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        self.detach();
    }
}
