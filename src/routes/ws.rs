use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::Extension;

use crate::error::{AppError, AppResult};
use crate::gateway::Subscription;
use crate::models::Principal;
use crate::state::AppState;

/// Upgrade to the authenticated principal's live event stream. Outbound
/// only: inbound traffic is ignored apart from close.
pub async fn ws_handler(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let subscription = state
        .gateway
        .transport()
        .subscribe(principal.id)
        .await
        .map_err(|e| AppError::Store(e.to_string()))?;

    tracing::info!(principal = %principal.id, role = principal.role.as_str(), "ws session opened");
    Ok(ws.on_upgrade(move |socket| pump_socket(socket, subscription)))
}

async fn pump_socket(mut socket: WebSocket, mut subscription: Subscription) {
    loop {
        tokio::select! {
            frame = subscription.next() => match frame {
                Some(text) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}
