pub mod events;
pub mod redis;
pub mod transport;

pub use events::{EventFrame, GatewayEvent};
pub use transport::{LocalTransport, Subscription, Transport, TransportError};

use std::sync::Arc;

use uuid::Uuid;

use crate::metrics::EVENTS_EMITTED_TOTAL;
use crate::models::Conversation;

/// Pub/sub fan-out of ledger and read-receipt mutations.
///
/// Emission happens only after the triggering mutation has committed, and
/// emissions for one conversation are issued in commit order, so the
/// per-conversation stream stays causally ordered. Delivery itself is
/// best-effort at-most-once: failures are logged and swallowed, nothing is
/// buffered for disconnected subscribers.
#[derive(Clone)]
pub struct SyncGateway {
    transport: Arc<dyn Transport>,
}

impl SyncGateway {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    pub async fn conversation_updated(&self, conversation: &Conversation) {
        self.publish(
            conversation,
            GatewayEvent::ConversationUpdated {
                conversation_id: conversation.id,
            },
        )
        .await;
    }

    pub async fn messages_read(&self, conversation: &Conversation, reader_id: Uuid) {
        self.publish(
            conversation,
            GatewayEvent::MessagesRead {
                conversation_id: conversation.id,
                reader_id,
            },
        )
        .await;
    }

    /// Both parties of the conversation receive the event on their own
    /// channel.
    async fn publish(&self, conversation: &Conversation, event: GatewayEvent) {
        let name = event.name();
        let payload = match serde_json::to_value(event.frame()) {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(event = name, error = %e, "failed to encode event frame");
                return;
            }
        };

        for principal_id in [conversation.client_id, conversation.provider_id] {
            match self.transport.emit(principal_id, name, &payload).await {
                Ok(()) => {
                    EVENTS_EMITTED_TOTAL.with_label_values(&[name]).inc();
                }
                Err(e) => {
                    tracing::warn!(
                        event = name,
                        principal = %principal_id,
                        error = %e,
                        "event emission dropped"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageStatus;
    use async_trait::async_trait;
    use chrono::Utc;

    fn conversation() -> Conversation {
        Conversation {
            id: Uuid::new_v4(),
            client_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            last_message_preview: None,
            last_message_at: None,
            last_message_sender_id: None,
            last_message_status: MessageStatus::Sending,
            client_unread_count: 0,
            provider_unread_count: 0,
            is_active: true,
            is_archived_by_client: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    struct RejectingTransport;

    #[async_trait]
    impl Transport for RejectingTransport {
        async fn subscribe(&self, _principal_id: Uuid) -> Result<Subscription, TransportError> {
            Err(TransportError::Connect("down".into()))
        }

        async fn emit(
            &self,
            _principal_id: Uuid,
            _event: &str,
            _payload: &serde_json::Value,
        ) -> Result<(), TransportError> {
            Err(TransportError::Emit("down".into()))
        }
    }

    #[tokio::test]
    async fn both_parties_receive_ledger_events() {
        let transport = LocalTransport::new();
        let gateway = SyncGateway::new(Arc::new(transport.clone()));
        let conversation = conversation();

        let mut client_sub = transport.subscribe(conversation.client_id).await.unwrap();
        let mut provider_sub = transport.subscribe(conversation.provider_id).await.unwrap();

        gateway.conversation_updated(&conversation).await;

        for sub in [&mut client_sub, &mut provider_sub] {
            let frame = EventFrame::parse(&sub.next().await.unwrap()).unwrap();
            assert_eq!(frame.event, "conversation.updated");
            assert_eq!(frame.conversation_id, conversation.id);
        }
    }

    #[tokio::test]
    async fn per_conversation_events_arrive_in_commit_order() {
        let transport = LocalTransport::new();
        let gateway = SyncGateway::new(Arc::new(transport.clone()));
        let conversation = conversation();
        let reader = conversation.provider_id;

        let mut sub = transport.subscribe(conversation.client_id).await.unwrap();

        gateway.conversation_updated(&conversation).await;
        gateway.messages_read(&conversation, reader).await;

        let first = EventFrame::parse(&sub.next().await.unwrap()).unwrap();
        let second = EventFrame::parse(&sub.next().await.unwrap()).unwrap();
        assert_eq!(first.event, "conversation.updated");
        assert_eq!(second.event, "messages.read");
        assert_eq!(second.reader_id, Some(reader));
    }

    #[tokio::test]
    async fn emit_failures_are_swallowed() {
        let gateway = SyncGateway::new(Arc::new(RejectingTransport));
        // Must not panic or propagate.
        gateway.conversation_updated(&conversation()).await;
    }
}
