//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use stomp_gateway::bridge::BridgeSettings;
use stomp_gateway::broker::MemoryBroker;
use stomp_gateway::relay::Relay;
use stomp_gateway::security::Principal;
use stomp_gateway::session::{CloseReason, Scheduler, Session, SessionId, TransportError};
use stomp_gateway::stomp::{codec, Command, Frame};

/// What a client observed on its transport.
#[derive(Debug)]
pub enum Event {
    Frame(Frame),
    Heartbeat,
    Closed(CloseReason),
}

/// Transport double that forwards everything the gateway writes.
pub struct MockSession {
    id: SessionId,
    principal: Option<Principal>,
    events: mpsc::UnboundedSender<Event>,
    closed: Mutex<Option<CloseReason>>,
}

#[async_trait]
impl Session for MockSession {
    fn id(&self) -> &SessionId {
        &self.id
    }

    fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.closed.lock().is_some() {
            return Err(TransportError::Closed(self.id.clone()));
        }
        let frame = codec::decode_text(&text).expect("gateway wrote a malformed frame");
        let event = if frame.is_heartbeat() {
            Event::Heartbeat
        } else {
            Event::Frame(frame)
        };
        let _ = self.events.send(event);
        Ok(())
    }

    async fn close(&self, reason: CloseReason) {
        let mut closed = self.closed.lock();
        if closed.is_none() {
            *closed = Some(reason);
            let _ = self.events.send(Event::Closed(reason));
        }
    }
}

/// Client side of a mock session.
pub struct Peer {
    pub session: Arc<MockSession>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl Peer {
    pub fn new(id: &str) -> Self {
        Self::with_principal(id, None)
    }

    pub fn with_principal(id: &str, principal: Option<Principal>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            session: Arc::new(MockSession {
                id: SessionId::from(id),
                principal,
                events: tx,
                closed: Mutex::new(None),
            }),
            events: rx,
        }
    }

    pub fn id(&self) -> &SessionId {
        self.session.id()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.session.closed.lock()
    }

    /// Next event, heartbeats included.
    pub async fn next_event(&mut self) -> Event {
        tokio::time::timeout(Duration::from_secs(2), self.events.recv())
            .await
            .expect("timed out waiting for the gateway")
            .expect("event channel closed")
    }

    /// Next non-heartbeat frame.
    pub async fn next_frame(&mut self) -> Frame {
        loop {
            match self.next_event().await {
                Event::Frame(frame) => return frame,
                Event::Heartbeat => continue,
                Event::Closed(reason) => panic!("session closed ({reason:?}) while waiting for a frame"),
            }
        }
    }

    /// Next frame, asserting its command.
    pub async fn expect(&mut self, command: Command) -> Frame {
        let frame = self.next_frame().await;
        assert_eq!(frame.command(), Some(command), "unexpected frame {frame:?}");
        frame
    }

    /// Next close, skipping anything written before it.
    pub async fn expect_closed(&mut self) -> CloseReason {
        loop {
            if let Event::Closed(reason) = self.next_event().await {
                return reason;
            }
        }
    }

    /// Assert nothing but heartbeats arrives within `window`.
    pub async fn expect_quiet(&mut self, window: Duration) {
        let deadline = tokio::time::Instant::now() + window;
        loop {
            match tokio::time::timeout_at(deadline, self.events.recv()).await {
                Err(_) | Ok(None) => return,
                Ok(Some(Event::Heartbeat)) => continue,
                Ok(Some(event)) => panic!("expected silence, got {event:?}"),
            }
        }
    }
}

pub fn relay_with(broker: MemoryBroker, settings: BridgeSettings) -> Arc<Relay> {
    Arc::new(Relay::new(
        settings,
        Arc::new(broker),
        Arc::new(Scheduler::current()),
    ))
}

pub fn relay() -> Arc<Relay> {
    relay_with(MemoryBroker::new(), BridgeSettings::default())
}

pub fn frame(command: Command, headers: &[(&str, &str)]) -> Frame {
    Frame::builder(command)
        .headers(headers.iter().copied())
        .build()
        .expect("valid test frame")
}

pub fn send(destination: &str, body: &str) -> Frame {
    Frame::builder(Command::Send)
        .header("destination", destination)
        .body(body.to_string(), Some("text/plain"))
        .build()
        .expect("valid test frame")
}

pub fn connect(versions: &str) -> Frame {
    frame(Command::Connect, &[("accept-version", versions), ("host", "test")])
}

/// Open and connect a peer, consuming the CONNECTED frame.
pub async fn connected_peer(relay: &Relay, id: &str) -> (Peer, Frame) {
    let mut peer = Peer::new(id);
    relay.on_open(peer.session.clone()).expect("register session");
    relay
        .on_frame(peer.id(), connect("1.1,1.2"))
        .await
        .expect("connect");
    let connected = peer.expect(Command::Connected).await;
    (peer, connected)
}
