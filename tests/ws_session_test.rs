//! Loopback end-to-end: a real server on a local port, driven over HTTP with
//! reqwest, observed through `SessionManager` riding the WebSocket endpoint.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use conversation_service::error::{AppError, AppResult};
use conversation_service::gateway::{LocalTransport, SyncGateway};
use conversation_service::middleware::identity::{PRINCIPAL_ID_HEADER, PRINCIPAL_ROLE_HEADER};
use conversation_service::models::{Conversation, Principal, Role};
use conversation_service::routes;
use conversation_service::services::unread_service::UnreadService;
use conversation_service::session::{SessionManager, SessionState, SnapshotSource, WsTransport};
use conversation_service::state::AppState;
use conversation_service::store::{MemoryStore, Store};

async fn spawn_server() -> (String, String) {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let state = AppState {
        store: store.clone(),
        gateway: SyncGateway::new(Arc::new(LocalTransport::new())),
        unread: Arc::new(UnreadService::new(store)),
    };
    let app = routes::build_router().with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), format!("ws://{addr}/api/v1/ws"))
}

fn identified(
    builder: reqwest::RequestBuilder,
    principal: &Principal,
) -> reqwest::RequestBuilder {
    builder
        .header(PRINCIPAL_ID_HEADER, principal.id.to_string())
        .header(PRINCIPAL_ROLE_HEADER, principal.role.as_str())
}

/// Snapshot source that reads through the service's own HTTP API, the way a
/// remote session would.
struct HttpSnapshot {
    base: String,
    http: reqwest::Client,
}

#[async_trait]
impl SnapshotSource for HttpSnapshot {
    async fn unread_total(&self, principal: &Principal) -> AppResult<u64> {
        let body: serde_json::Value =
            identified(self.http.get(format!("{}/api/v1/unread/total", self.base)), principal)
                .send()
                .await
                .map_err(|e| AppError::Store(e.to_string()))?
                .json()
                .await
                .map_err(|e| AppError::Store(e.to_string()))?;
        Ok(body["total"].as_u64().unwrap_or(0))
    }

    async fn inbox(&self, principal: &Principal) -> AppResult<Vec<Conversation>> {
        identified(self.http.get(format!("{}/api/v1/conversations", self.base)), principal)
            .send()
            .await
            .map_err(|e| AppError::Store(e.to_string()))?
            .json()
            .await
            .map_err(|e| AppError::Store(e.to_string()))
    }
}

fn session_for(base: &str, ws_url: &str, principal: Principal) -> SessionManager {
    SessionManager::new(
        Arc::new(WsTransport::for_principal(ws_url, principal)),
        Arc::new(HttpSnapshot {
            base: base.to_string(),
            http: reqwest::Client::new(),
        }),
    )
}

#[tokio::test]
async fn live_session_sees_events_and_reconciles_over_the_wire() {
    let (base, ws_url) = spawn_server().await;
    let http = reqwest::Client::new();

    let client = Principal {
        id: Uuid::new_v4(),
        role: Role::Client,
    };
    let provider = Principal {
        id: Uuid::new_v4(),
        role: Role::Provider,
    };

    // Provider attaches a live session before any traffic exists.
    let provider_session = session_for(&base, &ws_url, provider);
    let (hint_tx, mut hint_rx) = tokio::sync::mpsc::unbounded_channel();
    provider_session
        .subscribe("conversation.updated", move |frame| {
            let _ = hint_tx.send(frame.conversation_id);
        })
        .await;
    provider_session.connect(provider).await.unwrap();

    let initial = provider_session.reconciled().borrow().clone().unwrap();
    assert_eq!(initial.unread_total, 0);
    assert!(initial.inbox.is_empty());
    assert_eq!(*provider_session.state().borrow(), SessionState::Connected);

    // Client opens the conversation and sends over plain HTTP.
    let conversation: serde_json::Value = identified(
        http.post(format!("{base}/api/v1/conversations")),
        &client,
    )
    .json(&json!({ "counterpart_id": provider.id }))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    let conversation_id = conversation["id"].as_str().unwrap().to_string();

    let response = identified(
        http.post(format!("{base}/api/v1/conversations/{conversation_id}/messages")),
        &client,
    )
    .json(&json!({ "content": "hello over the wire", "content_type": "text" }))
    .send()
    .await
    .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::CREATED);

    // The push arrives through the real socket.
    let hinted = timeout(Duration::from_secs(5), hint_rx.recv())
        .await
        .expect("no event within timeout")
        .unwrap();
    assert_eq!(hinted.to_string(), conversation_id);

    // Hints carry no payload; the session re-reads through the API.
    let snapshot = HttpSnapshot {
        base: base.clone(),
        http: http.clone(),
    };
    assert_eq!(snapshot.unread_total(&provider).await.unwrap(), 1);
    let inbox = snapshot.inbox(&provider).await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(
        inbox[0].last_message_preview.as_deref(),
        Some("hello over the wire")
    );

    provider_session.disconnect().await;
}

#[tokio::test]
async fn read_receipts_reach_the_other_party_session() {
    let (base, ws_url) = spawn_server().await;
    let http = reqwest::Client::new();

    let client = Principal {
        id: Uuid::new_v4(),
        role: Role::Client,
    };
    let provider = Principal {
        id: Uuid::new_v4(),
        role: Role::Provider,
    };

    let client_session = session_for(&base, &ws_url, client);
    let (read_tx, mut read_rx) = tokio::sync::mpsc::unbounded_channel();
    client_session
        .subscribe("messages.read", move |frame| {
            let _ = read_tx.send((frame.conversation_id, frame.reader_id));
        })
        .await;
    client_session.connect(client).await.unwrap();

    let conversation: serde_json::Value = identified(
        http.post(format!("{base}/api/v1/conversations")),
        &client,
    )
    .json(&json!({ "counterpart_id": provider.id }))
    .send()
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    let conversation_id = conversation["id"].as_str().unwrap().to_string();

    identified(
        http.post(format!("{base}/api/v1/conversations/{conversation_id}/messages")),
        &client,
    )
    .json(&json!({ "content": "read me", "content_type": "text" }))
    .send()
    .await
    .unwrap();

    let response = identified(
        http.post(format!("{base}/api/v1/conversations/{conversation_id}/read")),
        &provider,
    )
    .json(&json!({}))
    .send()
    .await
    .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NO_CONTENT);

    let (hinted, reader) = timeout(Duration::from_secs(5), read_rx.recv())
        .await
        .expect("no read event within timeout")
        .unwrap();
    assert_eq!(hinted.to_string(), conversation_id);
    assert_eq!(reader, Some(provider.id));

    client_session.disconnect().await;
}
