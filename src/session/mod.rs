pub mod ws;

pub use ws::WsTransport;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::error::{AppError, AppResult};
use crate::gateway::{EventFrame, Subscription, Transport};
use crate::models::{Conversation, Principal};
use crate::services::unread_service::UnreadService;
use crate::store::Store;

/// Authoritative reads used for full-state reconciliation. Push events are
/// hints; this is where sessions go for the truth.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn unread_total(&self, principal: &Principal) -> AppResult<u64>;

    async fn inbox(&self, principal: &Principal) -> AppResult<Vec<Conversation>>;
}

/// Snapshot source backed by the in-process services.
pub struct LocalSnapshot {
    store: Arc<dyn Store>,
    unread: Arc<UnreadService>,
}

impl LocalSnapshot {
    pub fn new(store: Arc<dyn Store>, unread: Arc<UnreadService>) -> Self {
        Self { store, unread }
    }
}

#[async_trait]
impl SnapshotSource for LocalSnapshot {
    async fn unread_total(&self, principal: &Principal) -> AppResult<u64> {
        Ok(self.unread.compute_total(principal).await)
    }

    async fn inbox(&self, principal: &Principal) -> AppResult<Vec<Conversation>> {
        self.store.list_conversations(principal).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    Reconnecting,
    /// Reconnect attempts exhausted; the owner should fall back to polling.
    Lapsed,
}

/// Result of one full-state reconciliation pass.
#[derive(Debug, Clone)]
pub struct Reconciliation {
    pub unread_total: u64,
    pub inbox: Vec<Conversation>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

type Handler = Arc<dyn Fn(EventFrame) + Send + Sync>;
type HandlerMap = Arc<RwLock<HashMap<String, Vec<Handler>>>>;

/// Owns one logical live connection for one principal.
///
/// On every successful (re)connect it re-reads aggregate state through the
/// snapshot source; that reconciliation is what compensates for the
/// gateway's at-most-once delivery. Constructed and torn down explicitly,
/// injected into consumers.
pub struct SessionManager {
    transport: Arc<dyn Transport>,
    snapshot: Arc<dyn SnapshotSource>,
    config: SessionConfig,
    handlers: HandlerMap,
    state_tx: watch::Sender<SessionState>,
    reconciled_tx: watch::Sender<Option<Reconciliation>>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(transport: Arc<dyn Transport>, snapshot: Arc<dyn SnapshotSource>) -> Self {
        Self::with_config(transport, snapshot, SessionConfig::default())
    }

    pub fn with_config(
        transport: Arc<dyn Transport>,
        snapshot: Arc<dyn SnapshotSource>,
        config: SessionConfig,
    ) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Disconnected);
        let (reconciled_tx, _) = watch::channel(None);
        Self {
            transport,
            snapshot,
            config,
            handlers: Arc::new(RwLock::new(HashMap::new())),
            state_tx,
            reconciled_tx,
            pump: Mutex::new(None),
        }
    }

    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    pub fn reconciled(&self) -> watch::Receiver<Option<Reconciliation>> {
        self.reconciled_tx.subscribe()
    }

    /// Register a handler for one event name. Handlers receive the decoded
    /// frame and are expected to re-query the named entity rather than trust
    /// the payload.
    pub async fn subscribe<F>(&self, event: &str, handler: F)
    where
        F: Fn(EventFrame) + Send + Sync + 'static,
    {
        self.handlers
            .write()
            .await
            .entry(event.to_string())
            .or_default()
            .push(Arc::new(handler));
    }

    /// Subscribe, run the initial reconciliation, and start pumping events.
    /// Connecting an already-connected session is an error.
    pub async fn connect(&self, principal: Principal) -> AppResult<()> {
        let mut pump = self.pump.lock().await;
        // A pump that already returned (the session lapsed) does not count
        // as connected; the owner may call connect again.
        if pump.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(AppError::Validation("session already connected".into()));
        }

        let subscription = self
            .transport
            .subscribe(principal.id)
            .await
            .map_err(|e| AppError::Store(e.to_string()))?;
        reconcile(&self.snapshot, &self.reconciled_tx, &principal).await;
        let _ = self.state_tx.send(SessionState::Connected);

        *pump = Some(tokio::spawn(run_pump(
            principal,
            subscription,
            self.transport.clone(),
            self.snapshot.clone(),
            self.config.clone(),
            self.handlers.clone(),
            self.state_tx.clone(),
            self.reconciled_tx.clone(),
        )));
        Ok(())
    }

    pub async fn disconnect(&self) {
        if let Some(handle) = self.pump.lock().await.take() {
            handle.abort();
        }
        let _ = self.state_tx.send(SessionState::Disconnected);
    }
}

async fn reconcile(
    snapshot: &Arc<dyn SnapshotSource>,
    reconciled_tx: &watch::Sender<Option<Reconciliation>>,
    principal: &Principal,
) {
    let unread_total = match snapshot.unread_total(principal).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "reconciliation unread fetch failed");
            return;
        }
    };
    let inbox = match snapshot.inbox(principal).await {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "reconciliation inbox fetch failed");
            return;
        }
    };
    let _ = reconciled_tx.send(Some(Reconciliation {
        unread_total,
        inbox,
        at: Utc::now(),
    }));
}

#[allow(clippy::too_many_arguments)]
async fn run_pump(
    principal: Principal,
    mut subscription: Subscription,
    transport: Arc<dyn Transport>,
    snapshot: Arc<dyn SnapshotSource>,
    config: SessionConfig,
    handlers: HandlerMap,
    state_tx: watch::Sender<SessionState>,
    reconciled_tx: watch::Sender<Option<Reconciliation>>,
) {
    loop {
        while let Some(raw) = subscription.next().await {
            let frame = match EventFrame::parse(&raw) {
                Ok(f) => f,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping undecodable event frame");
                    continue;
                }
            };
            let guard = handlers.read().await;
            if let Some(list) = guard.get(&frame.event) {
                for handler in list {
                    handler(frame.clone());
                }
            }
        }

        // Stream ended: fixed-delay retries, then give up and let the owner
        // poll.
        let _ = state_tx.send(SessionState::Reconnecting);
        let mut recovered = None;
        for attempt in 1..=config.max_reconnect_attempts {
            sleep(config.reconnect_delay).await;
            match transport.subscribe(principal.id).await {
                Ok(sub) => {
                    recovered = Some(sub);
                    break;
                }
                Err(e) => {
                    tracing::warn!(attempt, error = %e, "reconnect attempt failed");
                }
            }
        }

        match recovered {
            Some(sub) => {
                subscription = sub;
                // Events missed during the outage are recovered wholesale by
                // re-reading current state, never replayed individually.
                reconcile(&snapshot, &reconciled_tx, &principal).await;
                let _ = state_tx.send(SessionState::Connected);
            }
            None => {
                let _ = state_tx.send(SessionState::Lapsed);
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{LocalTransport, SyncGateway, TransportError};
    use crate::models::{ContentType, Role};
    use crate::services::conversation_service::ConversationService;
    use crate::services::message_service::MessageService;
    use crate::store::MemoryStore;
    use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
    use tokio::time::{timeout, Duration};
    use uuid::Uuid;

    struct Fixture {
        store: Arc<MemoryStore>,
        transport: LocalTransport,
        gateway: SyncGateway,
        snapshot: Arc<LocalSnapshot>,
    }

    fn fixture() -> Fixture {
        let store: Arc<MemoryStore> = Arc::new(MemoryStore::new());
        let transport = LocalTransport::new();
        let gateway = SyncGateway::new(Arc::new(transport.clone()));
        let unread = Arc::new(UnreadService::new(store.clone()));
        let snapshot = Arc::new(LocalSnapshot::new(store.clone(), unread));
        Fixture {
            store,
            transport,
            gateway,
            snapshot,
        }
    }

    fn quick_config() -> SessionConfig {
        SessionConfig {
            max_reconnect_attempts: 5,
            reconnect_delay: Duration::from_millis(10),
        }
    }

    async fn send(fx: &Fixture, sender: &Principal, counterpart: Uuid, content: &str) {
        let (conversation, _) =
            ConversationService::get_or_create(&*fx.store, sender, counterpart)
                .await
                .unwrap();
        let message = MessageService::append(
            &*fx.store,
            &conversation,
            sender,
            content.to_string(),
            ContentType::Text,
            None,
        )
        .await
        .unwrap();
        ConversationService::record_outgoing(&*fx.store, &conversation, sender, &message)
            .await
            .unwrap();
        fx.gateway.conversation_updated(&conversation).await;
    }

    async fn wait_for_state(
        rx: &mut watch::Receiver<SessionState>,
        wanted: SessionState,
    ) -> SessionState {
        timeout(Duration::from_secs(2), async {
            loop {
                if *rx.borrow() == wanted {
                    return wanted;
                }
                rx.changed().await.unwrap();
            }
        })
        .await
        .expect("state transition timed out")
    }

    #[tokio::test]
    async fn connect_runs_initial_reconciliation() {
        let fx = fixture();
        let provider = Principal {
            id: Uuid::new_v4(),
            role: Role::Provider,
        };
        let client = Principal {
            id: Uuid::new_v4(),
            role: Role::Client,
        };
        // Traffic before the session ever connects.
        send(&fx, &client, provider.id, "early").await;

        let manager = SessionManager::with_config(
            Arc::new(fx.transport.clone()),
            fx.snapshot.clone(),
            quick_config(),
        );
        manager.connect(provider).await.unwrap();

        let reconciled = manager.reconciled().borrow().clone().unwrap();
        assert_eq!(reconciled.unread_total, 1);
        assert_eq!(reconciled.inbox.len(), 1);
        assert_eq!(*manager.state().borrow(), SessionState::Connected);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn double_connect_is_rejected() {
        let fx = fixture();
        let manager = SessionManager::with_config(
            Arc::new(fx.transport.clone()),
            fx.snapshot.clone(),
            quick_config(),
        );
        let principal = Principal {
            id: Uuid::new_v4(),
            role: Role::Client,
        };
        manager.connect(principal).await.unwrap();
        let err = manager.connect(principal).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn handlers_receive_events_as_hints() {
        let fx = fixture();
        let provider = Principal {
            id: Uuid::new_v4(),
            role: Role::Provider,
        };
        let client = Principal {
            id: Uuid::new_v4(),
            role: Role::Client,
        };

        let manager = SessionManager::with_config(
            Arc::new(fx.transport.clone()),
            fx.snapshot.clone(),
            quick_config(),
        );
        let (seen_tx, mut seen_rx) = tokio::sync::mpsc::unbounded_channel();
        manager
            .subscribe("conversation.updated", move |frame| {
                let _ = seen_tx.send(frame.conversation_id);
            })
            .await;
        manager.connect(provider).await.unwrap();

        send(&fx, &client, provider.id, "hello").await;

        let hinted = timeout(Duration::from_secs(2), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        // The payload is only an identifier; confirm the re-query path works.
        let row = fx.store.get_conversation(hinted).await.unwrap().unwrap();
        assert_eq!(row.provider_unread_count, 1);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn missed_events_are_recovered_by_reconnect_reconciliation() {
        // A session that misses a push while evicted must see the post-event
        // totals after its automatic resubscribe, with no replay.
        let fx = fixture();
        let provider = Principal {
            id: Uuid::new_v4(),
            role: Role::Provider,
        };
        let client = Principal {
            id: Uuid::new_v4(),
            role: Role::Client,
        };

        let manager = SessionManager::with_config(
            Arc::new(fx.transport.clone()),
            fx.snapshot.clone(),
            quick_config(),
        );
        manager.connect(provider).await.unwrap();
        let mut state = manager.state();
        let mut reconciled = manager.reconciled();

        // Drop the live stream, then generate traffic the session cannot see.
        fx.transport.evict(provider.id).await;
        wait_for_state(&mut state, SessionState::Reconnecting).await;
        send(&fx, &client, provider.id, "while you were away").await;

        wait_for_state(&mut state, SessionState::Connected).await;
        let snapshot = timeout(Duration::from_secs(2), async {
            loop {
                if let Some(r) = reconciled.borrow().clone() {
                    if r.unread_total == 1 {
                        return r;
                    }
                }
                reconciled.changed().await.unwrap();
            }
        })
        .await
        .expect("reconciliation timed out");
        assert_eq!(snapshot.unread_total, 1);
        assert_eq!(snapshot.inbox.len(), 1);
        manager.disconnect().await;
    }

    /// Lets the first subscribe through, then refuses every reconnect.
    struct OneShotTransport {
        inner: LocalTransport,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Transport for OneShotTransport {
        async fn subscribe(&self, principal_id: Uuid) -> Result<Subscription, TransportError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.inner.subscribe(principal_id).await
            } else {
                Err(TransportError::Connect("refused".into()))
            }
        }

        async fn emit(
            &self,
            principal_id: Uuid,
            event: &str,
            payload: &serde_json::Value,
        ) -> Result<(), TransportError> {
            self.inner.emit(principal_id, event, payload).await
        }
    }

    #[tokio::test]
    async fn reconnect_exhaustion_lapses_the_session() {
        let fx = fixture();
        let transport = Arc::new(OneShotTransport {
            inner: fx.transport.clone(),
            calls: AtomicU32::new(0),
        });
        let manager =
            SessionManager::with_config(transport.clone(), fx.snapshot.clone(), quick_config());
        let principal = Principal {
            id: Uuid::new_v4(),
            role: Role::Client,
        };
        manager.connect(principal).await.unwrap();

        fx.transport.evict(principal.id).await;
        let mut state = manager.state();
        wait_for_state(&mut state, SessionState::Lapsed).await;
        // Initial connect plus exactly five retries.
        assert_eq!(transport.calls.load(Ordering::SeqCst), 6);
        manager.disconnect().await;
    }

    /// Refuses every subscribe while the gate is closed.
    struct GatedTransport {
        inner: LocalTransport,
        refuse: AtomicBool,
    }

    #[async_trait]
    impl Transport for GatedTransport {
        async fn subscribe(&self, principal_id: Uuid) -> Result<Subscription, TransportError> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(TransportError::Connect("refused".into()));
            }
            self.inner.subscribe(principal_id).await
        }

        async fn emit(
            &self,
            principal_id: Uuid,
            event: &str,
            payload: &serde_json::Value,
        ) -> Result<(), TransportError> {
            self.inner.emit(principal_id, event, payload).await
        }
    }

    #[tokio::test]
    async fn lapsed_session_accepts_a_fresh_connect() {
        let fx = fixture();
        let transport = Arc::new(GatedTransport {
            inner: fx.transport.clone(),
            refuse: AtomicBool::new(false),
        });
        let manager =
            SessionManager::with_config(transport.clone(), fx.snapshot.clone(), quick_config());
        let principal = Principal {
            id: Uuid::new_v4(),
            role: Role::Client,
        };
        manager.connect(principal).await.unwrap();

        transport.refuse.store(true, Ordering::SeqCst);
        fx.transport.evict(principal.id).await;
        let mut state = manager.state();
        wait_for_state(&mut state, SessionState::Lapsed).await;

        // Once the outage clears, the owner reconnects without an explicit
        // disconnect in between.
        transport.refuse.store(false, Ordering::SeqCst);
        timeout(Duration::from_secs(2), async {
            while manager.connect(principal).await.is_err() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("reconnect after lapse timed out");
        assert_eq!(*manager.state().borrow(), SessionState::Connected);
        manager.disconnect().await;
    }

    #[tokio::test]
    async fn undecodable_frames_are_dropped_without_stopping_the_pump() {
        let fx = fixture();
        let principal = Principal {
            id: Uuid::new_v4(),
            role: Role::Client,
        };
        let manager = SessionManager::with_config(
            Arc::new(fx.transport.clone()),
            fx.snapshot.clone(),
            quick_config(),
        );
        let hits = Arc::new(AtomicUsize::new(0));
        let counted = hits.clone();
        manager
            .subscribe("messages.read", move |_| {
                counted.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        manager.connect(principal).await.unwrap();

        fx.transport
            .broadcast(principal.id, "not json".to_string())
            .await;
        let conversation = Conversation {
            id: Uuid::new_v4(),
            client_id: principal.id,
            provider_id: Uuid::new_v4(),
            last_message_preview: None,
            last_message_at: None,
            last_message_sender_id: None,
            last_message_status: crate::models::MessageStatus::Sent,
            client_unread_count: 0,
            provider_unread_count: 0,
            is_active: true,
            is_archived_by_client: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        fx.gateway
            .messages_read(&conversation, Uuid::new_v4())
            .await;

        timeout(Duration::from_secs(2), async {
            while hits.load(Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("handler never ran after bad frame");
        manager.disconnect().await;
    }
}
