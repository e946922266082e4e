use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{
    ContentType, Conversation, Cursor, Message, MessageStatus, NewMessage, Principal, Role,
};
use crate::store::Store;

const CONVERSATION_COLS: &str = "id, client_id, provider_id, last_message_preview, \
     last_message_at, last_message_sender_id, last_message_status, \
     client_unread_count, provider_unread_count, is_active, is_archived_by_client, \
     created_at, updated_at";

const MESSAGE_COLS: &str = "m.id, m.conversation_id, m.sender_role, m.sender_id, m.content, \
     m.content_type, m.reply_to, m.is_deleted, m.created_at, \
     COALESCE((SELECT array_agg(r.reader_id) FROM message_reads r WHERE r.message_id = m.id), '{}') AS read_by";

pub struct PgStore {
    db: Pool<Postgres>,
}

impl PgStore {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }

    fn conversation_from_row(row: &PgRow) -> AppResult<Conversation> {
        let status: String = row.try_get("last_message_status")?;
        Ok(Conversation {
            id: row.try_get("id")?,
            client_id: row.try_get("client_id")?,
            provider_id: row.try_get("provider_id")?,
            last_message_preview: row.try_get("last_message_preview")?,
            last_message_at: row.try_get("last_message_at")?,
            last_message_sender_id: row.try_get("last_message_sender_id")?,
            last_message_status: MessageStatus::parse(&status)?,
            client_unread_count: row.try_get("client_unread_count")?,
            provider_unread_count: row.try_get("provider_unread_count")?,
            is_active: row.try_get("is_active")?,
            is_archived_by_client: row.try_get("is_archived_by_client")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn message_from_row(row: &PgRow) -> AppResult<Message> {
        let role: String = row.try_get("sender_role")?;
        let content_type: String = row.try_get("content_type")?;
        Ok(Message {
            id: row.try_get("id")?,
            conversation_id: row.try_get("conversation_id")?,
            sender: Principal {
                id: row.try_get("sender_id")?,
                role: role
                    .parse::<Role>()
                    .map_err(|_| AppError::Store(format!("unknown sender role: {role}")))?,
            },
            content: row.try_get("content")?,
            content_type: ContentType::parse(&content_type)?,
            reply_to: row.try_get("reply_to")?,
            read_by: row.try_get("read_by")?,
            is_deleted: row.try_get("is_deleted")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get_or_create_conversation(
        &self,
        client_id: Uuid,
        provider_id: Uuid,
    ) -> AppResult<(Conversation, bool)> {
        // First-contact upsert: the loser of a creation race falls through to
        // the committed winner's row instead of surfacing the conflict.
        let inserted = sqlx::query(&format!(
            "INSERT INTO conversations (id, client_id, provider_id) VALUES ($1, $2, $3) \
             ON CONFLICT (client_id, provider_id) DO NOTHING RETURNING {CONVERSATION_COLS}"
        ))
        .bind(Uuid::new_v4())
        .bind(client_id)
        .bind(provider_id)
        .fetch_optional(&self.db)
        .await?;

        if let Some(row) = inserted {
            return Ok((Self::conversation_from_row(&row)?, true));
        }

        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLS} FROM conversations WHERE client_id = $1 AND provider_id = $2"
        ))
        .bind(client_id)
        .bind(provider_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or(AppError::Conflict)?;

        Ok((Self::conversation_from_row(&row)?, false))
    }

    async fn get_conversation(&self, id: Uuid) -> AppResult<Option<Conversation>> {
        let row = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLS} FROM conversations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(|r| Self::conversation_from_row(&r)).transpose()
    }

    async fn list_conversations(&self, principal: &Principal) -> AppResult<Vec<Conversation>> {
        let column = match principal.role {
            Role::Client => "client_id",
            Role::Provider => "provider_id",
        };
        let rows = sqlx::query(&format!(
            "SELECT {CONVERSATION_COLS} FROM conversations WHERE {column} = $1 \
             ORDER BY last_message_at DESC NULLS LAST"
        ))
        .bind(principal.id)
        .fetch_all(&self.db)
        .await?;
        rows.iter().map(Self::conversation_from_row).collect()
    }

    async fn record_outgoing_message(
        &self,
        conversation_id: Uuid,
        sender: &Principal,
        preview: &str,
        at: DateTime<Utc>,
    ) -> AppResult<()> {
        // Single-statement update: the recipient counter increment is atomic
        // at the row level, never read-then-write.
        let counter = match sender.role.other() {
            Role::Client => "client_unread_count",
            Role::Provider => "provider_unread_count",
        };
        let result = sqlx::query(&format!(
            "UPDATE conversations SET \
               last_message_preview = $2, \
               last_message_at = GREATEST(last_message_at, $3), \
               last_message_sender_id = $4, \
               last_message_status = 'sent', \
               {counter} = {counter} + 1, \
               updated_at = now() \
             WHERE id = $1"
        ))
        .bind(conversation_id)
        .bind(preview)
        .bind(at)
        .bind(sender.id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("conversation"));
        }
        Ok(())
    }

    async fn mark_conversation_read(
        &self,
        conversation_id: Uuid,
        reader: &Principal,
    ) -> AppResult<()> {
        let counter = match reader.role {
            Role::Client => "client_unread_count",
            Role::Provider => "provider_unread_count",
        };
        let result = sqlx::query(&format!(
            "UPDATE conversations SET \
               {counter} = 0, \
               last_message_status = CASE \
                 WHEN last_message_sender_id IS NOT NULL AND last_message_sender_id <> $2 \
                 THEN 'read' ELSE last_message_status END, \
               updated_at = now() \
             WHERE id = $1"
        ))
        .bind(conversation_id)
        .bind(reader.id)
        .execute(&self.db)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("conversation"));
        }
        Ok(())
    }

    async fn set_archived(&self, conversation_id: Uuid, archived: bool) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE conversations SET is_archived_by_client = $2, updated_at = now() WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(archived)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("conversation"));
        }
        Ok(())
    }

    async fn deactivate_conversation(&self, conversation_id: Uuid) -> AppResult<()> {
        let result = sqlx::query(
            "UPDATE conversations SET is_active = FALSE, updated_at = now() WHERE id = $1",
        )
        .bind(conversation_id)
        .execute(&self.db)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("conversation"));
        }
        Ok(())
    }

    async fn insert_message(&self, record: NewMessage) -> AppResult<Message> {
        let id = Uuid::new_v4();
        let row = sqlx::query(
            "INSERT INTO messages (id, conversation_id, sender_role, sender_id, content, content_type, reply_to) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING created_at",
        )
        .bind(id)
        .bind(record.conversation_id)
        .bind(record.sender.role.as_str())
        .bind(record.sender.id)
        .bind(&record.content)
        .bind(record.content_type.as_str())
        .bind(record.reply_to)
        .fetch_one(&self.db)
        .await?;

        Ok(Message {
            id,
            conversation_id: record.conversation_id,
            sender: record.sender,
            content: record.content,
            content_type: record.content_type,
            reply_to: record.reply_to,
            read_by: Vec::new(),
            is_deleted: false,
            created_at: row.try_get("created_at")?,
        })
    }

    async fn get_message(&self, id: Uuid) -> AppResult<Option<Message>> {
        let row = sqlx::query(&format!(
            "SELECT {MESSAGE_COLS} FROM messages m WHERE m.id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.db)
        .await?;
        row.map(|r| Self::message_from_row(&r)).transpose()
    }

    async fn fetch_messages(
        &self,
        conversation_id: Uuid,
        before: Option<Cursor>,
        limit: i64,
    ) -> AppResult<Vec<Message>> {
        let rows = match before {
            Some(cursor) => {
                sqlx::query(&format!(
                    "SELECT {MESSAGE_COLS} FROM messages m \
                     WHERE m.conversation_id = $1 AND (m.created_at, m.id) < ($2, $3) \
                     ORDER BY m.created_at DESC, m.id DESC LIMIT $4"
                ))
                .bind(conversation_id)
                .bind(cursor.created_at)
                .bind(cursor.id)
                .bind(limit)
                .fetch_all(&self.db)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {MESSAGE_COLS} FROM messages m \
                     WHERE m.conversation_id = $1 \
                     ORDER BY m.created_at DESC, m.id DESC LIMIT $2"
                ))
                .bind(conversation_id)
                .bind(limit)
                .fetch_all(&self.db)
                .await?
            }
        };
        rows.iter().map(Self::message_from_row).collect()
    }

    async fn add_read_receipts(
        &self,
        conversation_id: Uuid,
        message_ids: &[Uuid],
        reader_id: Uuid,
    ) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO message_reads (message_id, reader_id) \
             SELECT m.id, $1 FROM messages m WHERE m.id = ANY($2) AND m.conversation_id = $3 \
             ON CONFLICT DO NOTHING",
        )
        .bind(reader_id)
        .bind(message_ids)
        .bind(conversation_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn soft_delete_message(&self, message_id: Uuid) -> AppResult<()> {
        let result = sqlx::query("UPDATE messages SET is_deleted = TRUE WHERE id = $1")
            .bind(message_id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound("message"));
        }
        Ok(())
    }

    async fn sum_unread(&self, principal: &Principal) -> AppResult<i64> {
        let (column, counter) = match principal.role {
            Role::Client => ("client_id", "client_unread_count"),
            Role::Provider => ("provider_id", "provider_unread_count"),
        };
        let total: i64 = sqlx::query_scalar(&format!(
            "SELECT COALESCE(SUM({counter}), 0)::bigint FROM conversations WHERE {column} = $1"
        ))
        .bind(principal.id)
        .fetch_one(&self.db)
        .await?;
        Ok(total)
    }
}
