use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AppError;

/// Which side of a conversation a principal occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Provider,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Provider => "provider",
        }
    }

    pub fn other(&self) -> Role {
        match self {
            Role::Client => Role::Provider,
            Role::Provider => Role::Client,
        }
    }
}

impl FromStr for Role {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "client" => Ok(Role::Client),
            "provider" => Ok(Role::Provider),
            other => Err(AppError::Validation(format!("unknown role: {other}"))),
        }
    }
}

/// Authenticated actor as supplied by the upstream identity collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: Uuid,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Sending,
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sending => "sending",
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "sending" => Ok(MessageStatus::Sending),
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            other => Err(AppError::Store(format!("unknown message status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    Audio,
    Document,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Image => "image",
            ContentType::Audio => "audio",
            ContentType::Document => "document",
        }
    }

    pub fn parse(s: &str) -> Result<Self, AppError> {
        match s {
            "text" => Ok(ContentType::Text),
            "image" => Ok(ContentType::Image),
            "audio" => Ok(ContentType::Audio),
            "document" => Ok(ContentType::Document),
            other => Err(AppError::Store(format!("unknown content type: {other}"))),
        }
    }
}

/// Durable record of one client/provider messaging relationship.
///
/// The preview fields are a cached projection of the newest message; the two
/// unread counters are only ever mutated through the store's atomic
/// increment/reset operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub client_id: Uuid,
    pub provider_id: Uuid,
    pub last_message_preview: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub last_message_sender_id: Option<Uuid>,
    pub last_message_status: MessageStatus,
    pub client_unread_count: i64,
    pub provider_unread_count: i64,
    pub is_active: bool,
    pub is_archived_by_client: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn is_party(&self, principal: &Principal) -> bool {
        match principal.role {
            Role::Client => self.client_id == principal.id,
            Role::Provider => self.provider_id == principal.id,
        }
    }

    pub fn unread_for(&self, role: Role) -> i64 {
        match role {
            Role::Client => self.client_unread_count,
            Role::Provider => self.provider_unread_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub sender: Principal,
    pub content: String,
    pub content_type: ContentType,
    pub reply_to: Option<Uuid>,
    pub read_by: Vec<Uuid>,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// Store input for a message append; `created_at` is assigned by the store.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: Uuid,
    pub sender: Principal,
    pub content: String,
    pub content_type: ContentType,
    pub reply_to: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryPage {
    pub messages: Vec<Message>,
    pub next_cursor: Option<String>,
}

/// Keyset pagination position: (created_at, id) of the oldest message the
/// caller has already seen, encoded as an opaque token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub created_at: DateTime<Utc>,
    pub id: Uuid,
}

impl Cursor {
    pub fn for_message(message: &Message) -> Self {
        Self {
            created_at: message.created_at,
            id: message.id,
        }
    }

    pub fn encode(&self) -> String {
        STANDARD.encode(format!(
            "{}:{}",
            self.created_at.timestamp_micros(),
            self.id
        ))
    }

    pub fn decode(token: &str) -> Result<Self, AppError> {
        let invalid = || AppError::Validation("malformed cursor".into());
        let raw = STANDARD.decode(token.trim()).map_err(|_| invalid())?;
        let text = String::from_utf8(raw).map_err(|_| invalid())?;
        let (micros, id) = text.split_once(':').ok_or_else(invalid)?;
        let micros: i64 = micros.parse().map_err(|_| invalid())?;
        let created_at = DateTime::from_timestamp_micros(micros).ok_or_else(invalid)?;
        let id = Uuid::parse_str(id).map_err(|_| invalid())?;
        Ok(Self { created_at, id })
    }
}
