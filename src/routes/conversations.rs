use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{Conversation, HistoryPage, Principal};
use crate::services::conversation_service::ConversationService;
use crate::services::message_service::MessageService;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct CreateConversationRequest {
    pub counterpart_id: Uuid,
}

/// Lazily resolve the conversation between the caller and a counterpart; the
/// caller's role decides which side of the pair it occupies.
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(body): Json<CreateConversationRequest>,
) -> AppResult<(StatusCode, Json<Conversation>)> {
    let (conversation, created) =
        ConversationService::get_or_create(&*state.store, &principal, body.counterpart_id).await?;
    if created {
        state.gateway.conversation_updated(&conversation).await;
        return Ok((StatusCode::CREATED, Json(conversation)));
    }
    Ok((StatusCode::OK, Json(conversation)))
}

pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> AppResult<Json<Vec<Conversation>>> {
    let inbox = ConversationService::inbox(&*state.store, &principal).await?;
    Ok(Json(inbox))
}

pub async fn get_conversation(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<Json<Conversation>> {
    let conversation =
        ConversationService::require_party(&*state.store, conversation_id, &principal).await?;
    Ok(Json(conversation))
}

#[derive(Deserialize, Default)]
pub struct MarkReadRequest {
    #[serde(default)]
    pub message_ids: Option<Vec<Uuid>>,
}

/// Reset the caller's unread counter; when explicit message ids are given,
/// also union the caller into those messages' read receipts.
pub async fn mark_read(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<MarkReadRequest>,
) -> AppResult<StatusCode> {
    let conversation =
        ConversationService::require_party(&*state.store, conversation_id, &principal).await?;

    if let Some(ids) = &body.message_ids {
        MessageService::mark_as_read(&*state.store, &conversation, ids, principal.id).await?;
    }
    ConversationService::mark_read(&*state.store, &conversation, &principal).await?;
    // The counter reset is a ledger mutation, so it announces itself like
    // any other before the receipt event goes out.
    state.gateway.conversation_updated(&conversation).await;
    state.gateway.messages_read(&conversation, principal.id).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ArchiveRequest {
    pub archived: bool,
}

pub async fn set_archived(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(conversation_id): Path<Uuid>,
    Json(body): Json<ArchiveRequest>,
) -> AppResult<StatusCode> {
    let conversation =
        ConversationService::require_party(&*state.store, conversation_id, &principal).await?;
    ConversationService::set_archived(&*state.store, &conversation, &principal, body.archived)
        .await?;
    state.gateway.conversation_updated(&conversation).await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn deactivate(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(conversation_id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let conversation =
        ConversationService::require_party(&*state.store, conversation_id, &principal).await?;
    ConversationService::deactivate(&*state.store, &conversation).await?;
    state.gateway.conversation_updated(&conversation).await;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct HistoryParams {
    pub cursor: Option<String>,
    pub limit: Option<i64>,
}

pub async fn get_message_history(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(conversation_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> AppResult<Json<HistoryPage>> {
    let conversation =
        ConversationService::require_party(&*state.store, conversation_id, &principal).await?;
    let page = MessageService::fetch_history(
        &*state.store,
        &conversation,
        params.cursor.as_deref(),
        params.limit,
    )
    .await?;
    Ok(Json(page))
}
