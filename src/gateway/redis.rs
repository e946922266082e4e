use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::Client;
use uuid::Uuid;

use crate::gateway::transport::{LocalTransport, Subscription, Transport, TransportError};

fn channel_for_principal(id: Uuid) -> String {
    format!("principal:{id}")
}

/// Cross-node fan-out over Redis pub/sub.
///
/// Emits publish to the principal's channel; a background pattern-subscribe
/// listener bridges everything back into the local registry, so local
/// subscribers are reached through the same loop as remote ones. Plain
/// pub/sub, no streams: events missed while disconnected are gone and
/// sessions recover by reconciliation.
pub struct RedisTransport {
    client: Client,
    local: LocalTransport,
}

impl RedisTransport {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            local: LocalTransport::new(),
        }
    }

    pub fn spawn_listener(&self) {
        let client = self.client.clone();
        let local = self.local.clone();
        tokio::spawn(async move {
            if let Err(e) = run_psub_listener(client, local).await {
                tracing::error!(error = %e, "redis pub/sub listener failed");
            }
        });
    }

}

async fn run_psub_listener(client: Client, local: LocalTransport) -> redis::RedisResult<()> {
    // PubSub requires a dedicated connection, not multiplexed
    let conn = client.get_async_connection().await?;
    let mut pubsub = conn.into_pubsub();
    pubsub.psubscribe("principal:*").await?;
    let mut stream = pubsub.on_message();
    while let Some(msg) = stream.next().await {
        let channel: String = msg.get_channel_name().into();
        let payload: String = msg.get_payload()?;
        if let Some(id_part) = channel.strip_prefix("principal:") {
            if let Ok(principal_id) = Uuid::parse_str(id_part) {
                local.broadcast(principal_id, payload).await;
            }
        }
    }
    Ok(())
}

#[async_trait]
impl Transport for RedisTransport {
    async fn subscribe(&self, principal_id: Uuid) -> Result<Subscription, TransportError> {
        self.local.subscribe(principal_id).await
    }

    async fn emit(
        &self,
        principal_id: Uuid,
        _event: &str,
        payload: &serde_json::Value,
    ) -> Result<(), TransportError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        conn.publish::<_, _, ()>(channel_for_principal(principal_id), payload.to_string())
            .await
            .map_err(|e| TransportError::Emit(e.to_string()))
    }
}
