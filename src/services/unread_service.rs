use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::Principal;
use crate::store::Store;

/// Read-side projection of a principal's total unread count.
///
/// Unread badges are advisory UI state, so a store outage degrades to the
/// last successfully computed value (0 if none) instead of failing the
/// caller.
pub struct UnreadService {
    store: Arc<dyn Store>,
    cache: RwLock<HashMap<Uuid, u64>>,
}

impl UnreadService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub async fn compute_total(&self, principal: &Principal) -> u64 {
        match self.store.sum_unread(principal).await {
            Ok(total) => {
                let total = total.max(0) as u64;
                self.cache.write().await.insert(principal.id, total);
                total
            }
            Err(e) => {
                let fallback = self
                    .cache
                    .read()
                    .await
                    .get(&principal.id)
                    .copied()
                    .unwrap_or(0);
                tracing::warn!(
                    principal = %principal.id,
                    fallback,
                    error = %e,
                    "unread aggregation degraded"
                );
                fallback
            }
        }
    }
}
