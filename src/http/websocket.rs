//! STOMP over WebSocket transport.
//!
//! # Responsibilities
//! - Complete the upgrade, advertising the STOMP subprotocols
//! - Decode inbound text/binary messages into frames for the relay
//! - Serialize outbound frames through one writer task per session
//!
//! # Data Flow
//! ```text
//! Client ──text/binary──→ reader loop → codec → Relay::on_frame
//! Relay / bridge → WsSession::send_* → bounded queue → writer task ──→ Client
//! ```
//!
//! # Design Decisions
//! - Replies mirror the type of the client's last message (text or binary)
//! - Malformed input never reaches the relay: ERROR, then close 1002
//! - A server-side close stops the reader at once; the relay sees exactly
//!   one close per session

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};

use crate::http::server::AppState;
use crate::net::ConnectionGuard;
use crate::security::Principal;
use crate::session::{CloseReason, Session, SessionId, TransportError};
use crate::stomp::{codec, BinaryCodec, CodecError, Frame, TextCodec, Version};

/// Offered subprotocols, most preferred first.
pub const SUBPROTOCOLS: [&str; 3] = [
    Version::V1_2.subprotocol(),
    Version::V1_1.subprotocol(),
    Version::V1_0.subprotocol(),
];

/// How long a closing session waits for its writer to flush.
const WRITER_GRACE: Duration = Duration::from_secs(5);

enum Outbound {
    Text(String),
    Binary(Bytes),
    Close(CloseReason),
}

/// `Session` backed by a WebSocket writer task.
pub struct WsSession {
    id: SessionId,
    principal: Option<Principal>,
    outbound: mpsc::Sender<Outbound>,
    codec: BinaryCodec,
    binary: AtomicBool,
    closed: AtomicBool,
    /// Set once, to the reason of the first close.
    closed_tx: watch::Sender<Option<CloseReason>>,
}

impl WsSession {
    fn new(
        principal: Option<Principal>,
        outbound: mpsc::Sender<Outbound>,
        codec: BinaryCodec,
    ) -> Self {
        Self {
            id: SessionId::generate(),
            principal,
            outbound,
            codec,
            binary: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            closed_tx: watch::channel(None).0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn push(&self, message: Outbound) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed(self.id.clone()));
        }
        let mut closed = self.closed_tx.subscribe();
        tokio::select! {
            sent = self.outbound.send(message) => {
                sent.map_err(|_| TransportError::Closed(self.id.clone()))
            }
            _ = closed.wait_for(Option::is_some) => Err(TransportError::Closed(self.id.clone())),
        }
    }
}

#[async_trait]
impl Session for WsSession {
    fn id(&self) -> &SessionId {
        &self.id
    }

    fn principal(&self) -> Option<&Principal> {
        self.principal.as_ref()
    }

    async fn send_text(&self, text: String) -> Result<(), TransportError> {
        if self.binary.load(Ordering::Relaxed) {
            self.push(Outbound::Binary(Bytes::from(text))).await
        } else {
            self.push(Outbound::Text(text)).await
        }
    }

    async fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        if self.binary.load(Ordering::Relaxed) {
            let bytes = self.codec.encode(frame)?;
            self.push(Outbound::Binary(bytes)).await
        } else {
            self.push(Outbound::Text(codec::encode_text(frame))).await
        }
    }

    async fn close(&self, reason: CloseReason) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.closed_tx.send_replace(Some(reason));
    }
}

/// Upgrade handler for the STOMP endpoint.
pub async fn upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    let principal = match state.users.authenticate(&headers) {
        Ok(principal) => principal,
        Err(e) => {
            tracing::warn!(error = %e, "WebSocket upgrade refused");
            return (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Basic realm=\"stomp\"")],
            )
                .into_response();
        }
    };
    let Some(guard) = state.connections.try_track() else {
        tracing::warn!(
            max_connections = state.connections.max(),
            "Session limit reached, refusing upgrade"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };

    ws.protocols(SUBPROTOCOLS)
        .on_upgrade(move |socket| serve_socket(socket, state, principal, guard))
}

async fn serve_socket(
    socket: WebSocket,
    state: AppState,
    principal: Option<Principal>,
    guard: ConnectionGuard,
) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Outbound>(state.outbound_queue);
    let session = Arc::new(WsSession::new(principal, tx, state.codec));
    let session_id = session.id().clone();
    let relay = state.relay.clone();

    if let Err(e) = relay.on_open(session.clone()) {
        tracing::error!(session_id = %session_id, error = %e, "Session registration failed");
        return;
    }
    tracing::info!(
        session_id = %session_id,
        connection_id = %guard.id(),
        principal = session.principal().map(|p| p.name()).unwrap_or("anonymous"),
        "WebSocket session opened"
    );

    let mut close_signal = session.closed_tx.subscribe();
    let mut writer = tokio::spawn(async move {
        loop {
            // Queued frames go out before the close frame.
            let message = tokio::select! {
                biased;
                message = rx.recv() => message,
                reason = close_signal.wait_for(Option::is_some) => {
                    reason.ok().and_then(|r| *r).map(Outbound::Close)
                }
            };
            let Some(message) = message else {
                break;
            };
            let result = match message {
                Outbound::Text(text) => sender.send(Message::Text(text.into())).await,
                Outbound::Binary(bytes) => sender.send(Message::Binary(bytes)).await,
                Outbound::Close(reason) => {
                    let frame = CloseFrame {
                        code: reason.code(),
                        reason: reason.description().into(),
                    };
                    let _ = sender.send(Message::Close(Some(frame))).await;
                    break;
                }
            };
            if result.is_err() {
                break;
            }
        }
    });

    let text_codec = TextCodec;
    let mut closed = session.closed_tx.subscribe();
    loop {
        let message = tokio::select! {
            _ = closed.wait_for(Option::is_some) => break,
            message = receiver.next() => message,
        };
        let decoded = match message {
            Some(Ok(Message::Text(text))) => {
                session.binary.store(false, Ordering::Relaxed);
                text_codec.decode(text.as_str())
            }
            Some(Ok(Message::Binary(data))) => {
                session.binary.store(true, Ordering::Relaxed);
                state.codec.decode(&data)
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(e)) => {
                tracing::debug!(session_id = %session_id, error = %e, "WebSocket error");
                break;
            }
        };

        let frames = match decoded {
            Ok(frames) => frames,
            Err(e) => {
                reject_input(session.as_ref(), &e).await;
                break;
            }
        };
        for frame in frames {
            if session.is_closed() {
                break;
            }
            if let Err(e) = relay.on_frame(&session_id, frame).await {
                tracing::debug!(session_id = %session_id, error = %e, "Frame not processed");
            }
        }
    }

    if let Err(e) = relay.on_close(&session_id).await {
        tracing::debug!(session_id = %session_id, error = %e, "Session already released");
    }
    session.close(CloseReason::Normal).await;
    drop(session);
    if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        tracing::debug!(session_id = %session_id, "Writer did not finish in time, aborting");
        writer.abort();
    }
    tracing::info!(session_id = %session_id, "WebSocket session closed");
    drop(guard);
}

async fn reject_input(session: &WsSession, error: &CodecError) {
    tracing::warn!(session_id = %session.id(), error = %error, "Malformed input, closing session");
    let summary = match error {
        CodecError::Malformed(_) => "malformed frame",
        CodecError::Capacity { .. } => "frame too large",
    };
    let detail = error.to_string();
    let _ = session
        .send_frame(&Frame::error(summary, Some(&detail), None))
        .await;
    session.close(CloseReason::ProtocolError).await;
}
