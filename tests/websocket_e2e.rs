//! STOMP over a real WebSocket connection.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use stomp_gateway::config::schema::UserConfig;
use stomp_gateway::lifecycle::{startup, Shutdown};
use stomp_gateway::session::Scheduler;
use stomp_gateway::stomp::{codec, Command, Frame};
use stomp_gateway::{GatewayConfig, GatewayServer};

async fn start(config: GatewayConfig) -> (SocketAddr, Shutdown) {
    let gateway = startup::build(&config, Arc::new(Scheduler::current())).unwrap();
    let server = GatewayServer::new(&config, &gateway);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let stop = shutdown.clone();
    tokio::spawn(async move { server.run(listener, stop).await });
    (addr, shutdown)
}

fn request(addr: SocketAddr, auth: Option<&str>) -> tokio_tungstenite::tungstenite::handshake::client::Request {
    let mut request = format!("ws://{addr}/stomp").into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static("v12.stomp, v11.stomp"));
    if let Some(auth) = auth {
        request
            .headers_mut()
            .insert("Authorization", HeaderValue::from_str(auth).unwrap());
    }
    request
}

async fn next_frame<S>(ws: &mut S) -> Frame
where
    S: StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        let message = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("timed out")
            .expect("stream ended")
            .expect("websocket error");
        let frame = match message {
            Message::Text(text) => codec::decode_text(text.as_str()).unwrap(),
            Message::Binary(data) => codec::decode(&data).unwrap(),
            other => panic!("unexpected message {other:?}"),
        };
        if !frame.is_heartbeat() {
            return frame;
        }
    }
}

const CONNECT: &str = "CONNECT\naccept-version:1.1,1.2\nhost:test\n\n\0";

#[tokio::test]
async fn text_session_round_trip() {
    let (addr, shutdown) = start(GatewayConfig::default()).await;
    let (mut ws, response) = tokio_tungstenite::connect_async(request(addr, None)).await.unwrap();
    assert_eq!(
        response.headers().get("sec-websocket-protocol").unwrap(),
        "v12.stomp"
    );

    ws.send(Message::text(CONNECT)).await.unwrap();
    let connected = next_frame(&mut ws).await;
    assert_eq!(connected.command(), Some(Command::Connected));
    assert_eq!(connected.header("version"), Some("1.2"));

    ws.send(Message::text("SUBSCRIBE\nid:sub-0\ndestination:/topic/x\n\n\0"))
        .await
        .unwrap();
    ws.send(Message::text("SEND\ndestination:/topic/x\nreceipt:7\n\nhello\0"))
        .await
        .unwrap();

    let receipt = next_frame(&mut ws).await;
    assert_eq!(receipt.command(), Some(Command::Receipt));
    assert_eq!(receipt.header("receipt-id"), Some("7"));

    let message = next_frame(&mut ws).await;
    assert_eq!(message.command(), Some(Command::Message));
    assert_eq!(message.header("subscription"), Some("sub-0"));
    assert_eq!(message.body_text().as_deref(), Some("hello"));

    shutdown.trigger();
}

#[tokio::test]
async fn binary_client_gets_binary_replies() {
    let (addr, shutdown) = start(GatewayConfig::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(request(addr, None)).await.unwrap();

    ws.send(Message::binary(CONNECT.as_bytes().to_vec())).await.unwrap();
    let reply = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(matches!(reply, Message::Binary(ref b) if b.starts_with(b"CONNECTED")));

    shutdown.trigger();
}

#[tokio::test]
async fn malformed_frame_is_answered_and_closed() {
    let (addr, shutdown) = start(GatewayConfig::default()).await;
    let (mut ws, _) = tokio_tungstenite::connect_async(request(addr, None)).await.unwrap();

    ws.send(Message::text("NOT-A-COMMAND\n\n\0")).await.unwrap();
    let error = next_frame(&mut ws).await;
    assert_eq!(error.command(), Some(Command::Error));
    assert_eq!(error.header("message"), Some("malformed frame"));

    let close = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    match close {
        Message::Close(Some(frame)) => assert_eq!(u16::from(frame.code), 1002),
        other => panic!("expected close, got {other:?}"),
    }

    shutdown.trigger();
}

#[tokio::test]
async fn basic_auth_principal_and_rejection() {
    let mut config = GatewayConfig::default();
    config.security.users.push(UserConfig {
        username: "ann".into(),
        password: "secret".into(),
        roles: vec![],
    });
    let (addr, shutdown) = start(config).await;

    // "ann:wrong"
    let err = tokio_tungstenite::connect_async(request(addr, Some("Basic YW5uOndyb25n")))
        .await
        .unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 401)
        }
        other => panic!("expected HTTP 401, got {other:?}"),
    }

    // "ann:secret"
    let (mut ws, _) = tokio_tungstenite::connect_async(request(addr, Some("Basic YW5uOnNlY3JldA==")))
        .await
        .unwrap();
    ws.send(Message::text(CONNECT)).await.unwrap();
    assert_eq!(next_frame(&mut ws).await.command(), Some(Command::Connected));

    shutdown.trigger();
}

#[tokio::test]
async fn connection_limit_refuses_upgrade() {
    let mut config = GatewayConfig::default();
    config.listener.max_connections = 1;
    let (addr, shutdown) = start(config).await;

    let (_first, _) = tokio_tungstenite::connect_async(request(addr, None)).await.unwrap();
    let err = tokio_tungstenite::connect_async(request(addr, None))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        tokio_tungstenite::tungstenite::Error::Http(ref response) if response.status() == 503
    ));

    shutdown.trigger();
}
