use std::cmp::Reverse;
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Conversation, Cursor, Message, MessageStatus, NewMessage, Principal, Role};
use crate::store::Store;

#[derive(Default)]
struct MemInner {
    conversations: HashMap<Uuid, Conversation>,
    pair_index: HashMap<(Uuid, Uuid), Uuid>,
    messages: HashMap<Uuid, Message>,
}

/// In-process store used by tests and the dev/demo configuration.
///
/// Every mutation runs under one write lock, which gives the same per-row
/// atomicity the SQL implementation gets from single-statement updates.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_or_create_conversation(
        &self,
        client_id: Uuid,
        provider_id: Uuid,
    ) -> AppResult<(Conversation, bool)> {
        let mut inner = self.inner.write().await;
        if let Some(id) = inner.pair_index.get(&(client_id, provider_id)) {
            let existing = inner
                .conversations
                .get(id)
                .cloned()
                .ok_or_else(|| AppError::Store("pair index points at missing row".into()))?;
            return Ok((existing, false));
        }

        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            client_id,
            provider_id,
            last_message_preview: None,
            last_message_at: None,
            last_message_sender_id: None,
            last_message_status: MessageStatus::Sending,
            client_unread_count: 0,
            provider_unread_count: 0,
            is_active: true,
            is_archived_by_client: false,
            created_at: now,
            updated_at: now,
        };
        inner
            .pair_index
            .insert((client_id, provider_id), conversation.id);
        inner
            .conversations
            .insert(conversation.id, conversation.clone());
        Ok((conversation, true))
    }

    async fn get_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        Ok(self.inner.read().await.conversations.get(&id).cloned())
    }

    async fn list_conversations(&self, principal: &Principal) -> AppResult<Vec<Conversation>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Conversation> = inner
            .conversations
            .values()
            .filter(|c| c.is_party(principal))
            .cloned()
            .collect();
        rows.sort_by_key(|c| Reverse(c.last_message_at));
        Ok(rows)
    }

    async fn record_outgoing_message(
        &self,
        conversation_id: Uuid,
        sender: &Principal,
        preview: &str,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(AppError::NotFound("conversation"))?;

        conversation.last_message_preview = Some(preview.to_string());
        conversation.last_message_at =
            Some(conversation.last_message_at.map_or(at, |prev| prev.max(at)));
        conversation.last_message_sender_id = Some(sender.id);
        conversation.last_message_status = MessageStatus::Sent;
        match sender.role.other() {
            Role::Client => conversation.client_unread_count += 1,
            Role::Provider => conversation.provider_unread_count += 1,
        }
        conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        reader: &Principal,
    ) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(AppError::NotFound("conversation"))?;

        match reader.role {
            Role::Client => conversation.client_unread_count = 0,
            Role::Provider => conversation.provider_unread_count = 0,
        }
        if matches!(conversation.last_message_sender_id, Some(s) if s != reader.id) {
            conversation.last_message_status = MessageStatus::Read;
        }
        conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn set_archived(&self, conversation_id: Uuid, archived: bool) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(AppError::NotFound("conversation"))?;
        conversation.is_archived_by_client = archived;
        conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn deactivate_conversation(&self, conversation_id: Uuid) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let conversation = inner
            .conversations
            .get_mut(&conversation_id)
            .ok_or(AppError::NotFound("conversation"))?;
        conversation.is_active = false;
        conversation.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_message(&self, record: NewMessage) -> AppResult<Message> {
        let mut inner = self.inner.write().await;
        if !inner.conversations.contains_key(&record.conversation_id) {
            return Err(AppError::NotFound("conversation"));
        }
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id: record.conversation_id,
            sender: record.sender,
            content: record.content,
            content_type: record.content_type,
            reply_to: record.reply_to,
            read_by: Vec::new(),
            is_deleted: false,
            // Microsecond precision, same as the Postgres timestamptz column,
            // so cursor tokens round-trip exactly.
            created_at: Utc::now().trunc_subsecs(6),
        };
        inner.messages.insert(message.id, message.clone());
        Ok(message)
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        Ok(self.inner.read().await.messages.get(&id).cloned())
    }

    async fn fetch_messages(
        &self,
        conversation_id: Uuid,
        before: Option<Cursor>,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        let inner = self.inner.read().await;
        let mut rows: Vec<Message> = inner
            .messages
            .values()
            .filter(|m| m.conversation_id == conversation_id)
            .filter(|m| match before {
                Some(c) => (m.created_at, m.id) < (c.created_at, c.id),
                None => true,
            })
            .cloned()
            .collect();
        rows.sort_by_key(|m| Reverse((m.created_at, m.id)));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn add_read_receipts(
        &self,
        conversation_id: Uuid,
        message_ids: &[Uuid],
        reader_id: Uuid,
    ) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        for id in message_ids {
            if let Some(message) = inner.messages.get_mut(id) {
                if message.conversation_id == conversation_id
                    && !message.read_by.contains(&reader_id)
                {
                    message.read_by.push(reader_id);
                }
            }
        }
        Ok(())
    }

    async fn soft_delete_message(&self, message_id: Uuid) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        let message = inner
            .messages
            .get_mut(&message_id)
            .ok_or(AppError::NotFound("message"))?;
        message.is_deleted = true;
        Ok(())
    }

    async fn sum_unread(&self, principal: &Principal) -> AppResult<i64> {
        let inner = self.inner.read().await;
        Ok(inner
            .conversations
            .values()
            .filter(|c| c.is_party(principal))
            .map(|c| c.unread_for(principal.role))
            .sum())
    }
}
