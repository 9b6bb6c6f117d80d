//! End-to-end tests: real server, real WebSocket clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parley_relay::{MessageStore, UserId};
use parley_server::config::ServerConfig;
use parley_server::db::{Database, MigrationRunner};
use parley_server::server::{self, AppState};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    handle: JoinHandle<anyhow::Result<()>>,
}

/// Start the server on a random port.
async fn start_test_server() -> TestServer {
    let db = Database::in_memory("e2e").await.unwrap();
    MigrationRunner::messages().run(&db).await.unwrap();

    let state = Arc::new(AppState::new(
        ServerConfig::default(),
        Arc::new(db),
        CancellationToken::new(),
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(server::serve(listener, Arc::clone(&state)));

    TestServer {
        addr,
        state,
        handle,
    }
}

async fn connect(addr: SocketAddr) -> Client {
    let (client, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
        .await
        .unwrap();
    client
}

async fn send_event(client: &mut Client, event: Value) {
    client.send(Message::Text(event.to_string())).await.unwrap();
}

/// Next text event, or None if nothing arrives in time.
async fn recv_event(client: &mut Client, wait: Duration) -> Option<Value> {
    loop {
        match tokio::time::timeout(wait, client.next()).await {
            Ok(Some(Ok(Message::Text(text)))) => return Some(serde_json::from_str(&text).unwrap()),
            Ok(Some(Ok(_))) => continue,
            _ => return None,
        }
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met in time");
}

fn user(id: &str) -> UserId {
    UserId::new(id).unwrap()
}

async fn bind(server: &TestServer, client: &mut Client, id: &str) {
    send_event(client, json!({ "event": "add-user", "data": id })).await;
    let id = user(id);
    let registry = Arc::clone(server.state.registry());
    wait_until(|| registry.is_bound(&id)).await;
}

#[tokio::test]
async fn test_message_reaches_only_the_recipient() {
    let server = start_test_server().await;
    let mut alice = connect(server.addr).await;
    let mut bob = connect(server.addr).await;
    let mut carol = connect(server.addr).await;

    bind(&server, &mut alice, "alice").await;
    bind(&server, &mut bob, "bob").await;
    bind(&server, &mut carol, "carol").await;

    send_event(
        &mut alice,
        json!({ "event": "send-msg", "data": { "to": "bob", "msg": "hi" } }),
    )
    .await;

    assert_eq!(
        recv_event(&mut bob, Duration::from_secs(2)).await,
        Some(json!({ "event": "msg-recieve", "data": "hi" }))
    );
    assert!(recv_event(&mut alice, Duration::from_millis(200)).await.is_none());
    assert!(recv_event(&mut carol, Duration::from_millis(200)).await.is_none());

    let history = server
        .state
        .store()
        .fetch_conversation(&user("alice"), &user("bob"))
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].delivered);
}

#[tokio::test]
async fn test_offline_recipient_is_kept_for_later() {
    let server = start_test_server().await;
    let mut alice = connect(server.addr).await;
    let mut bob = connect(server.addr).await;
    bind(&server, &mut alice, "alice").await;
    bind(&server, &mut bob, "bob").await;

    send_event(
        &mut alice,
        json!({ "event": "send-msg", "data": { "to": "carol", "msg": "yo" } }),
    )
    .await;

    // The connection keeps working after relaying to nobody
    send_event(
        &mut alice,
        json!({ "event": "send-msg", "data": { "to": "bob", "msg": "still here" } }),
    )
    .await;
    assert_eq!(
        recv_event(&mut bob, Duration::from_secs(2)).await,
        Some(json!({ "event": "msg-recieve", "data": "still here" }))
    );

    let pending = server
        .state
        .store()
        .fetch_undelivered(&user("carol"))
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].body, "yo");
    assert_eq!(pending[0].sender, Some(user("alice")));
}

#[tokio::test]
async fn test_disconnect_removes_binding() {
    let server = start_test_server().await;
    let mut alice = connect(server.addr).await;
    bind(&server, &mut alice, "alice").await;

    alice.close(None).await.unwrap();

    let registry = Arc::clone(server.state.registry());
    wait_until(|| !registry.is_bound(&user("alice"))).await;
}

#[tokio::test]
async fn test_reconnect_keeps_new_binding() {
    let server = start_test_server().await;
    let mut old = connect(server.addr).await;
    let mut new = connect(server.addr).await;
    let mut bob = connect(server.addr).await;

    bind(&server, &mut old, "alice").await;
    bind(&server, &mut bob, "bob").await;

    send_event(&mut new, json!({ "event": "add-user", "data": "alice" })).await;
    assert_eq!(
        recv_event(&mut old, Duration::from_secs(2)).await,
        Some(json!({ "event": "superseded", "data": "alice" }))
    );

    // The old connection's cleanup runs after the new bind
    old.close(None).await.unwrap();
    drop(old);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(server.state.registry().is_bound(&user("alice")));

    send_event(
        &mut bob,
        json!({ "event": "send-msg", "data": { "to": "alice", "msg": "welcome back" } }),
    )
    .await;
    assert_eq!(
        recv_event(&mut new, Duration::from_secs(2)).await,
        Some(json!({ "event": "msg-recieve", "data": "welcome back" }))
    );
}

#[tokio::test]
async fn test_malformed_frames_keep_connection_open() {
    let server = start_test_server().await;
    let mut alice = connect(server.addr).await;

    send_event(&mut alice, json!({ "event": "nope" })).await;
    alice
        .send(Message::Text("{not json".to_string()))
        .await
        .unwrap();

    bind(&server, &mut alice, "alice").await;
}

#[tokio::test]
async fn test_shutdown_stops_server() {
    let server = start_test_server().await;
    let mut alice = connect(server.addr).await;
    bind(&server, &mut alice, "alice").await;

    server.state.shutdown.cancel();

    let result = tokio::time::timeout(Duration::from_secs(5), server.handle)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());

    let registry = Arc::clone(server.state.registry());
    wait_until(|| registry.bound_count() == 0).await;
}
