use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Transport failures are never fatal: the gateway logs and swallows them,
/// and a subscriber that loses its stream runs the session reconnect flow.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport connect failed: {0}")]
    Connect(String),

    #[error("emit failed: {0}")]
    Emit(String),

    #[error("transport is subscribe-only")]
    EmitUnsupported,
}

/// One principal's live event stream. Ends (returns `None`) when the
/// transport drops the subscriber; missed events are not replayed.
pub struct Subscription {
    rx: UnboundedReceiver<String>,
}

impl Subscription {
    pub fn new(rx: UnboundedReceiver<String>) -> Self {
        Self { rx }
    }

    pub async fn next(&mut self) -> Option<String> {
        self.rx.recv().await
    }
}

/// Bidirectional channel collaborator with per-principal scoping and
/// at-most-once, unordered-across-channel delivery.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(&self, principal_id: Uuid) -> Result<Subscription, TransportError>;

    async fn emit(
        &self,
        principal_id: Uuid,
        event: &str,
        payload: &serde_json::Value,
    ) -> Result<(), TransportError>;
}

/// In-process fan-out registry keyed by principal id.
#[derive(Default, Clone)]
pub struct LocalTransport {
    inner: Arc<RwLock<HashMap<Uuid, Vec<UnboundedSender<String>>>>>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn broadcast(&self, principal_id: Uuid, frame: String) {
        let mut guard = self.inner.write().await;
        if let Some(list) = guard.get_mut(&principal_id) {
            list.retain(|sender| sender.send(frame.clone()).is_ok());
        }
    }

    /// Force-drop every live subscription for a principal. Their streams end
    /// and the owning sessions go through reconnect.
    pub async fn evict(&self, principal_id: Uuid) {
        self.inner.write().await.remove(&principal_id);
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn subscribe(&self, principal_id: Uuid) -> Result<Subscription, TransportError> {
        let (tx, rx) = unbounded_channel();
        let mut guard = self.inner.write().await;
        guard.entry(principal_id).or_default().push(tx);
        Ok(Subscription::new(rx))
    }

    async fn emit(
        &self,
        principal_id: Uuid,
        _event: &str,
        payload: &serde_json::Value,
    ) -> Result<(), TransportError> {
        self.broadcast(principal_id, payload.to_string()).await;
        Ok(())
    }
}
