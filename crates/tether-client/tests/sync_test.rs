// tests/sync_test.rs
// SessionSync worker end-to-end against a mock gateway (HTTP + websocket)

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::Path;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep, timeout};

use tether::{CadenceProfile, GatewayClient, SessionSync, SyncSettings, SyncUpdate};

/// Fast cadence so the debounce/backoff windows fit in test time.
fn test_profile() -> CadenceProfile {
    CadenceProfile {
        base_delay_ms: 100,
        max_delay_ms: 800,
        reconciliation_debounce_ms: 120,
    }
}

/// Mock gateway: records history fetches, pushes test-fed frames on /ws/events.
struct MockGateway {
    url: String,
    frames: broadcast::Sender<String>,
    fetches: Arc<Mutex<Vec<String>>>,
}

impl MockGateway {
    async fn start() -> Self {
        let (frames, _) = broadcast::channel::<String>(64);
        let fetches: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        let fetches_for_route = fetches.clone();
        let frames_for_route = frames.clone();
        let app = Router::new()
            .route(
                "/api/sessions/{session_key}/messages",
                get(move |Path(session_key): Path<String>| {
                    let fetches = fetches_for_route.clone();
                    async move {
                        fetches.lock().unwrap().push(session_key.clone());
                        Json(json!({"session_key": session_key.clone(), "messages": [
                            {"channel": "http", "session_key": session_key,
                             "content": "authoritative", "role": "assistant"}
                        ]}))
                    }
                }),
            )
            .route(
                "/ws/events",
                get(move |ws: WebSocketUpgrade| {
                    let frames = frames_for_route.clone();
                    async move { ws.on_upgrade(move |socket| pump(socket, frames.subscribe())) }
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{}", addr),
            frames,
            fetches,
        }
    }

    async fn push(&self, frame: serde_json::Value) {
        // The ws handler subscribes at upgrade time; wait for it.
        for _ in 0..200 {
            if self.frames.receiver_count() > 0 {
                break;
            }
            sleep(Duration::from_millis(5)).await;
        }
        self.frames.send(frame.to_string()).unwrap();
    }

    fn fetched_keys(&self) -> Vec<String> {
        self.fetches.lock().unwrap().clone()
    }
}

async fn pump(mut socket: WebSocket, mut frames: broadcast::Receiver<String>) {
    let ready = json!({"type": "connected", "message": "event stream ready"}).to_string();
    if socket.send(WsMessage::Text(ready.into())).await.is_err() {
        return;
    }
    while let Ok(frame) = frames.recv().await {
        if socket.send(WsMessage::Text(frame.into())).await.is_err() {
            return;
        }
    }
}

fn inbound(session_key: &str, content: &str) -> serde_json::Value {
    json!({"type": "inbound_message", "message": {
        "channel": "http", "session_key": session_key,
        "content": content, "role": "user"
    }})
}

async fn next_update(updates: &mut mpsc::UnboundedReceiver<SyncUpdate>) -> SyncUpdate {
    timeout(Duration::from_secs(2), updates.recv())
        .await
        .expect("timed out waiting for update")
        .expect("update channel closed")
}

async fn expect_quiet(updates: &mut mpsc::UnboundedReceiver<SyncUpdate>, window: Duration) {
    if let Ok(update) = timeout(window, updates.recv()).await {
        panic!("expected no update, got {:?}", update);
    }
}

#[tokio::test]
async fn events_for_other_sessions_are_ignored() {
    let gateway = MockGateway::start().await;
    let client = GatewayClient::new(&gateway.url, None);
    let (sync, mut updates) = SessionSync::spawn(client, SyncSettings::new(test_profile()));

    sync.select_session(Some("http:a".to_string()));
    sync.start_streaming();
    assert!(matches!(next_update(&mut updates).await, SyncUpdate::StreamLive));

    // A message for a different session: no forward, no reconciliation.
    gateway.push(inbound("http:b", "not for us")).await;
    expect_quiet(&mut updates, Duration::from_millis(400)).await;
    assert!(gateway.fetched_keys().is_empty());

    // A message for the selected session: forwarded, then reconciled.
    gateway.push(inbound("http:a", "for us")).await;
    match next_update(&mut updates).await {
        SyncUpdate::Message(message) => {
            assert_eq!(message.session_key, "http:a");
            assert_eq!(message.content, "for us");
        }
        other => panic!("expected message, got {:?}", other),
    }
    match next_update(&mut updates).await {
        SyncUpdate::Reconciled { session_key, messages } => {
            assert_eq!(session_key, "http:a");
            assert_eq!(messages.len(), 1);
        }
        other => panic!("expected reconciled, got {:?}", other),
    }
    assert_eq!(gateway.fetched_keys(), vec!["http:a".to_string()]);
}

#[tokio::test]
async fn reconciliation_is_debounced_and_coalesced() {
    let gateway = MockGateway::start().await;
    let client = GatewayClient::new(&gateway.url, None);
    let (sync, mut updates) = SessionSync::spawn(client, SyncSettings::new(test_profile()));

    sync.select_session(Some("http:a".to_string()));
    sync.start_streaming();
    assert!(matches!(next_update(&mut updates).await, SyncUpdate::StreamLive));

    gateway.push(inbound("http:a", "one")).await;
    sleep(Duration::from_millis(10)).await;
    gateway.push(inbound("http:a", "two")).await;

    assert!(matches!(next_update(&mut updates).await, SyncUpdate::Message(_)));
    assert!(matches!(next_update(&mut updates).await, SyncUpdate::Message(_)));

    // Two pushes inside the debounce window produce exactly one fetch.
    assert!(matches!(
        next_update(&mut updates).await,
        SyncUpdate::Reconciled { .. }
    ));
    expect_quiet(&mut updates, Duration::from_millis(400)).await;
    assert_eq!(gateway.fetched_keys().len(), 1);
}

#[tokio::test]
async fn switching_sessions_cancels_pending_reconcile() {
    let gateway = MockGateway::start().await;
    let client = GatewayClient::new(&gateway.url, None);
    let (sync, mut updates) = SessionSync::spawn(client, SyncSettings::new(test_profile()));

    sync.select_session(Some("http:a".to_string()));
    sync.start_streaming();
    assert!(matches!(next_update(&mut updates).await, SyncUpdate::StreamLive));

    gateway.push(inbound("http:a", "about to switch")).await;
    assert!(matches!(next_update(&mut updates).await, SyncUpdate::Message(_)));

    // Reselect before the debounce elapses: the fetch must never fire.
    sync.select_session(Some("http:b".to_string()));
    expect_quiet(&mut updates, Duration::from_millis(500)).await;
    assert!(gateway.fetched_keys().is_empty());
}

#[tokio::test]
async fn stop_streaming_is_idempotent() {
    let gateway = MockGateway::start().await;
    let client = GatewayClient::new(&gateway.url, None);
    let (sync, mut updates) = SessionSync::spawn(client, SyncSettings::new(test_profile()));

    sync.start_streaming();
    assert!(matches!(next_update(&mut updates).await, SyncUpdate::StreamLive));

    sync.stop_streaming("done");
    match next_update(&mut updates).await {
        SyncUpdate::StreamDown { reason, retry_in } => {
            assert_eq!(reason, "done");
            assert!(retry_in.is_none());
        }
        other => panic!("expected stream down, got {:?}", other),
    }

    // Second stop: no effect, no update.
    sync.stop_streaming("done again");
    expect_quiet(&mut updates, Duration::from_millis(300)).await;
}

#[tokio::test]
async fn reconnects_back_off_and_reset_after_success() {
    // Reserve a port with nothing behind it, so every attempt is refused.
    let parked = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = parked.local_addr().unwrap();
    drop(parked);

    let client = GatewayClient::new(&format!("http://{}", addr), None);
    let (sync, mut updates) = SessionSync::spawn(client, SyncSettings::new(test_profile()));
    sync.start_streaming();

    // Consecutive failures double the delay: 100ms, 200ms, 400ms.
    for expected_ms in [100u64, 200, 400] {
        match next_update(&mut updates).await {
            SyncUpdate::StreamDown { retry_in, .. } => {
                assert_eq!(retry_in, Some(Duration::from_millis(expected_ms)));
            }
            other => panic!("expected stream down, got {:?}", other),
        }
    }

    // Bring a gateway up on the reserved port before the 400ms retry fires.
    // Its ws handler holds the socket open until the test says otherwise.
    let hangup = Arc::new(tokio::sync::Notify::new());
    let hangup_route = hangup.clone();
    let app = Router::new().route(
        "/ws/events",
        get(move |ws: WebSocketUpgrade| {
            let hangup = hangup_route.clone();
            async move {
                ws.on_upgrade(move |_socket| async move {
                    hangup.notified().await;
                })
            }
        }),
    );
    let listener = TcpListener::bind(addr).await.unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    assert!(matches!(next_update(&mut updates).await, SyncUpdate::StreamLive));

    // Drop the connection: the next failure starts over at the base delay.
    hangup.notify_one();
    match next_update(&mut updates).await {
        SyncUpdate::StreamDown { retry_in, .. } => {
            assert_eq!(retry_in, Some(Duration::from_millis(100)));
        }
        other => panic!("expected stream down, got {:?}", other),
    }

    sync.stop_streaming("test over");
}
