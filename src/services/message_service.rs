use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    ContentType, Conversation, Cursor, HistoryPage, Message, NewMessage, Principal,
};
use crate::store::Store;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 100;

pub struct MessageService;

impl MessageService {
    /// Validate and persist a message. Callers update the conversation ledger
    /// afterwards; the stored message is the source of truth.
    pub async fn append(
        store: &dyn Store,
        conversation: &Conversation,
        sender: &Principal,
        content: String,
        content_type: ContentType,
        reply_to: Option<Uuid>,
    ) -> AppResult<Message> {
        validate_content(&content, content_type)?;

        if let Some(parent_id) = reply_to {
            let parent = store
                .get_message(parent_id)
                .await?
                .ok_or_else(|| AppError::Validation("reply_to references a missing message".into()))?;
            if parent.conversation_id != conversation.id {
                return Err(AppError::Validation(
                    "reply_to references a message in another conversation".into(),
                ));
            }
        }

        store
            .insert_message(NewMessage {
                conversation_id: conversation.id,
                sender: *sender,
                content,
                content_type,
                reply_to,
            })
            .await
    }

    /// Newest-first keyset page. The cursor names the oldest message already
    /// seen, so concurrent appends neither duplicate nor skip entries.
    pub async fn fetch_history(
        store: &dyn Store,
        conversation: &Conversation,
        cursor_token: Option<&str>,
        limit: Option<i64>,
    ) -> AppResult<HistoryPage> {
        let limit = limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let before = cursor_token.map(Cursor::decode).transpose()?;

        let messages = store.fetch_messages(conversation.id, before, limit).await?;
        let next_cursor = if messages.len() as i64 == limit {
            messages.last().map(|m| Cursor::for_message(m).encode())
        } else {
            None
        };

        Ok(HistoryPage {
            messages,
            next_cursor,
        })
    }

    /// Set-union read receipts; applying the same ids twice is a no-op.
    pub async fn mark_as_read(
        store: &dyn Store,
        conversation: &Conversation,
        message_ids: &[Uuid],
        reader_id: Uuid,
    ) -> AppResult<()> {
        store
            .add_read_receipts(conversation.id, message_ids, reader_id)
            .await
    }

    /// Only the sender may delete, and only softly: content is retained for
    /// audit, presentation replacement is the caller's concern.
    pub async fn soft_delete(
        store: &dyn Store,
        message_id: Uuid,
        requester: &Principal,
    ) -> AppResult<()> {
        let message = store
            .get_message(message_id)
            .await?
            .ok_or(AppError::NotFound("message"))?;
        if message.sender.id != requester.id {
            return Err(AppError::Forbidden);
        }
        store.soft_delete_message(message_id).await
    }
}

fn validate_content(content: &str, content_type: ContentType) -> AppResult<()> {
    match content_type {
        ContentType::Text => {
            if content.trim().is_empty() {
                return Err(AppError::Validation("text content must not be empty".into()));
            }
        }
        ContentType::Image | ContentType::Audio | ContentType::Document => {
            // Attachments arrive as durable URLs from the media storage
            // collaborator; raw bytes never reach this service.
            if !(content.starts_with("http://") || content.starts_with("https://")) {
                return Err(AppError::Validation(format!(
                    "{} content must be a durable URL",
                    content_type.as_str()
                )));
            }
        }
    }
    Ok(())
}
