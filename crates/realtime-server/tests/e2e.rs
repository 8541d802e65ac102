//! End-to-end scenarios driven over a loopback WebSocket client against a
//! real in-process server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use realtime_auth::JwtTokenService;
use realtime_broker::InProcessBroker;
use realtime_core::config::AuthKeyConfig;
use realtime_core::{Server, ServerConfig, TokenSigner};
use realtime_server::{build_router, AppState};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

async fn spawn_server(config: ServerConfig) -> (SocketAddr, Arc<realtime_server::AppServer>) {
    let key_config = AuthKeyConfig::symmetric_or_generated(Some(b"e2e-test-signing-key".to_vec()));
    let token_service = Arc::new(JwtTokenService::new(key_config, config.auth_default_expiry_secs).unwrap());
    let broker = Arc::new(InProcessBroker::new());
    let server = Server::new(config, broker, token_service).await;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(AppState { server: server.clone() });
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, server)
}

async fn connect(addr: SocketAddr, path: &str, origin: Option<&str>) -> tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>> {
    let mut request = format!("ws://{addr}{path}").into_client_request().unwrap();
    if let Some(origin) = origin {
        request
            .headers_mut()
            .insert("origin", origin.parse().unwrap());
    }
    let (stream, _) = tokio_tungstenite::connect_async(request).await.unwrap();
    stream
}

#[tokio::test]
async fn happy_path_handshake_registers_the_client() {
    let mut config = ServerConfig::default();
    config.origins = "app.example:*".to_string();
    config.ping_timeout = Duration::from_millis(20_000);
    let (addr, server) = spawn_server(config).await;

    let mut socket = connect(addr, "/socketcluster/", Some("https://app.example:443")).await;
    socket
        .send(Message::Text(json!({"event": "#handshake", "data": {}, "cid": 1}).to_string()))
        .await
        .unwrap();

    let reply = next_json(&mut socket).await;
    assert_eq!(reply["rid"], 1);
    assert_eq!(reply["data"]["isAuthenticated"], false);
    assert_eq!(reply["data"]["pingTimeout"], 20_000);
    assert!(reply["data"]["id"].is_string());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.client_count(), 1);
}

#[tokio::test]
async fn expired_token_handshake_reports_auth_error_but_still_connects() {
    let config = ServerConfig::default();
    let key_config = AuthKeyConfig::symmetric_or_generated(Some(b"e2e-test-signing-key".to_vec()));
    let token_service = JwtTokenService::new(key_config, config.auth_default_expiry_secs).unwrap();
    let expired = token_service.sign_token(json!({ "sub": "agent" }), Some(-999_999)).await.unwrap();

    let (addr, _server) = spawn_server(config).await;
    let mut socket = connect(addr, "/socketcluster/", None).await;
    socket
        .send(Message::Text(
            json!({"event": "#handshake", "data": {"authToken": expired}, "cid": 1}).to_string(),
        ))
        .await
        .unwrap();

    let reply = next_json(&mut socket).await;
    assert_eq!(reply["data"]["authError"]["name"], "TokenExpired");
}

#[tokio::test]
async fn publish_disabled_rejects_without_touching_the_broker() {
    let mut config = ServerConfig::default();
    config.allow_client_publish = false;
    let (addr, _server) = spawn_server(config).await;

    let mut socket = connect(addr, "/socketcluster/", None).await;
    socket
        .send(Message::Text(json!({"event": "#handshake", "data": {}, "cid": 1}).to_string()))
        .await
        .unwrap();
    next_json(&mut socket).await;

    socket
        .send(Message::Text(
            json!({"event": "#publish", "data": {"channel": "x", "data": 1}, "cid": 9}).to_string(),
        ))
        .await
        .unwrap();

    let reply = next_json(&mut socket).await;
    assert_eq!(reply["rid"], 9);
    assert_eq!(reply["error"]["name"], "ClientPublishDisabled");
}

#[tokio::test]
async fn subscribe_then_publish_delivers_to_the_subscriber() {
    let config = ServerConfig::default();
    let (addr, _server) = spawn_server(config).await;

    let mut subscriber = connect(addr, "/socketcluster/", None).await;
    subscriber
        .send(Message::Text(json!({"event": "#handshake", "data": {}, "cid": 1}).to_string()))
        .await
        .unwrap();
    next_json(&mut subscriber).await;

    subscriber
        .send(Message::Text(json!({"event": "#subscribe", "data": "chat", "cid": 2}).to_string()))
        .await
        .unwrap();
    let reply = next_json(&mut subscriber).await;
    assert_eq!(reply["rid"], 2);
    assert!(reply.get("error").is_none());

    let mut publisher = connect(addr, "/socketcluster/", None).await;
    publisher
        .send(Message::Text(json!({"event": "#handshake", "data": {}, "cid": 1}).to_string()))
        .await
        .unwrap();
    next_json(&mut publisher).await;
    publisher
        .send(Message::Text(
            json!({"event": "#publish", "data": {"channel": "chat", "data": "hello"}, "cid": 3}).to_string(),
        ))
        .await
        .unwrap();
    next_json(&mut publisher).await;

    let delivered = next_json(&mut subscriber).await;
    assert_eq!(delivered["event"], "#publish");
    assert_eq!(delivered["data"]["channel"], "chat");
    assert_eq!(delivered["data"]["data"], "hello");
}

async fn next_json(
    socket: &mut tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
) -> Value {
    loop {
        match socket.next().await.expect("stream ended").unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}
