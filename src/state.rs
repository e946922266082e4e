use std::sync::Arc;

use crate::gateway::SyncGateway;
use crate::services::unread_service::UnreadService;
use crate::store::Store;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub gateway: SyncGateway,
    pub unread: Arc<UnreadService>,
}
