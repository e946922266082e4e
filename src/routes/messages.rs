use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::metrics::MESSAGES_SENT_TOTAL;
use crate::models::{ContentType, Message, Principal};
use crate::services::conversation_service::ConversationService;
use crate::services::message_service::MessageService;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    pub content_type: ContentType,
    pub reply_to: Option<Uuid>,
}

/// Append the message, then project it into the ledger, then emit. The
/// append is the fact; the ledger update is its cached projection and must
/// come second.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<SendMessageRequest>,
) -> AppResult<(StatusCode, Json<Message>)> {
    let conversation =
        ConversationService::require_party(&*state.store, conversation_id, &principal).await?;

    let message = MessageService::append(
        &*state.store,
        &conversation,
        &principal,
        body.content,
        body.content_type,
        body.reply_to,
    )
    .await?;
    ConversationService::record_outgoing(&*state.store, &conversation, &principal, &message)
        .await?;

    MESSAGES_SENT_TOTAL.inc();
    state.gateway.conversation_updated(&conversation).await;

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn delete_message(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(message_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    MessageService::soft_delete(&*state.store, message_id, &principal).await?;
    Ok(StatusCode::NO_CONTENT)
}
