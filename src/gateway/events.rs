use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Live events pushed through the sync gateway.
///
/// Payloads carry identifiers only: subscribers treat them as hints to
/// re-query the affected entity, never as the authoritative new state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayEvent {
    ConversationUpdated {
        conversation_id: Uuid,
    },
    MessagesRead {
        conversation_id: Uuid,
        reader_id: Uuid,
    },
}

impl GatewayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GatewayEvent::ConversationUpdated { .. } => "conversation.updated",
            GatewayEvent::MessagesRead { .. } => "messages.read",
        }
    }

    pub fn frame(&self) -> EventFrame {
        let (conversation_id, reader_id) = match *self {
            GatewayEvent::ConversationUpdated { conversation_id } => (conversation_id, None),
            GatewayEvent::MessagesRead {
                conversation_id,
                reader_id,
            } => (conversation_id, Some(reader_id)),
        };
        EventFrame {
            event: self.name().to_string(),
            timestamp: Utc::now(),
            conversation_id,
            reader_id,
        }
    }
}

/// Wire shape of one event: flat JSON with a `type` tag and RFC 3339
/// timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventFrame {
    #[serde(rename = "type")]
    pub event: String,
    pub timestamp: DateTime<Utc>,
    pub conversation_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reader_id: Option<Uuid>,
}

impl EventFrame {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
