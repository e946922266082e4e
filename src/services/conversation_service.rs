use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Conversation, Message, Principal, Role};
use crate::store::Store;

/// Inbox previews keep the first 120 characters of the message content,
/// measured in characters, not bytes.
pub const PREVIEW_MAX_CHARS: usize = 120;

pub struct ConversationService;

impl ConversationService {
    /// Resolve or lazily create the conversation between the caller and its
    /// counterpart. The caller's role decides which side of the pair it
    /// occupies. The boolean is true when this call created the record.
    pub async fn get_or_create(
        store: &dyn Store,
        principal: &Principal,
        counterpart_id: Uuid,
    ) -> AppResult<(Conversation, bool)> {
        if counterpart_id == principal.id {
            return Err(AppError::Validation(
                "counterpart must be a different principal".into(),
            ));
        }
        let (client_id, provider_id) = match principal.role {
            Role::Client => (principal.id, counterpart_id),
            Role::Provider => (counterpart_id, principal.id),
        };
        store
            .get_or_create_conversation(client_id, provider_id)
            .await
    }

    /// Load a conversation and check the principal is party to it.
    /// NotFound and Forbidden stay distinct: "doesn't exist" vs "not yours".
    pub async fn require_party(
        store: &dyn Store,
        conversation_id: Uuid,
        principal: &Principal,
    ) -> AppResult<Conversation> {
        let conversation = store
            .get_conversation(conversation_id)
            .await?
            .ok_or(AppError::NotFound("conversation"))?;
        if !conversation.is_party(principal) {
            return Err(AppError::Forbidden);
        }
        Ok(conversation)
    }

    pub async fn inbox(store: &dyn Store, principal: &Principal) -> AppResult<Vec<Conversation>> {
        store.list_conversations(principal).await
    }

    /// Project a freshly appended message into the ledger: preview, sender,
    /// timestamp, and the recipient's unread counter. The message is the
    /// fact; this is its cached projection, so it always runs after append.
    pub async fn record_outgoing(
        store: &dyn Store,
        conversation: &Conversation,
        sender: &Principal,
        message: &Message,
    ) -> AppResult<()> {
        let preview = truncate_preview(&message.content);
        store
            .record_outgoing_message(conversation.id, sender, &preview, message.created_at)
            .await
    }

    pub async fn mark_read(
        store: &dyn Store,
        conversation: &Conversation,
        reader: &Principal,
    ) -> AppResult<()> {
        store.mark_conversation_read(conversation.id, reader).await
    }

    /// Archiving is a client-side flag; providers may not toggle it.
    pub async fn set_archived(
        store: &dyn Store,
        conversation: &Conversation,
        principal: &Principal,
        archived: bool,
    ) -> AppResult<()> {
        if principal.role != Role::Client {
            return Err(AppError::Forbidden);
        }
        store.set_archived(conversation.id, archived).await
    }

    /// Conversations are never deleted, only deactivated.
    pub async fn deactivate(store: &dyn Store, conversation: &Conversation) -> AppResult<()> {
        store.deactivate_conversation(conversation.id).await
    }
}

fn truncate_preview(content: &str) -> String {
    content.chars().take(PREVIEW_MAX_CHARS).collect()
}
