pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::{Conversation, Cursor, Message, NewMessage, Principal};

/// Durable store collaborator.
///
/// Implementations must provide a uniqueness constraint on
/// (client_id, provider_id), atomic counter increment/reset on a single
/// conversation row, and ordered range queries on
/// (conversation_id, created_at, id). Counter updates are never
/// read-modify-write.
#[async_trait]
pub trait Store: Send + Sync {
    /// Upsert-style first-contact creation. The boolean is true when this
    /// call created the record; a concurrent loser re-reads the winner's row.
    async fn get_or_create_conversation(
        &self,
        client_id: Uuid,
        provider_id: Uuid,
    ) -> AppResult<(Conversation, bool)>;

    async fn get_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>>;

    /// Conversations where the principal participates in its role, newest
    /// activity first.
    async fn list_conversations(&self, principal: &Principal) -> AppResult<Vec<Conversation>>;

    /// Update the cached preview fields and atomically increment the
    /// recipient's unread counter by one.
    async fn record_outgoing_message(
        &self,
        conversation_id: Uuid,
        sender: &Principal,
        preview: &str,
        at: DateTime<Utc>,
    ) -> AppResult<()>;

    /// Atomically reset the reader's unread counter; when the reader is not
    /// the last sender, advance the last-message status to read.
    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        reader: &Principal,
    ) -> AppResult<()>;

    async fn set_archived(&self, conversation_id: Uuid, archived: bool) -> AppResult<()>;

    async fn deactivate_conversation(&self, conversation_id: Uuid) -> AppResult<()>;

    /// Persist a message, assigning `created_at` server-side.
    async fn insert_message(&self, record: NewMessage) -> AppResult<Message>;

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>>;

    /// Newest-first keyset page strictly before `before`, when given.
    async fn fetch_messages(
        &self,
        conversation_id: Uuid,
        before: Option<Cursor>,
        limit: i64,
    ) -> AppResult<Vec<Message>>;

    /// Set-union insert of read receipts; ids outside the conversation are
    /// ignored.
    async fn add_read_receipts(
        &self,
        conversation_id: Uuid,
        message_ids: &[Uuid],
        reader_id: Uuid,
    ) -> AppResult<()>;

    async fn soft_delete_message(&self, message_id: Uuid) -> AppResult<()>;

    /// Sum of the role-appropriate unread counters across the principal's
    /// conversations.
    async fn sum_unread(&self, principal: &Principal) -> AppResult<i64>;
}
