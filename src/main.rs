use std::sync::Arc;

use conversation_service::{
    config, db, error,
    gateway::{redis::RedisTransport, LocalTransport, SyncGateway, Transport},
    logging, migrations, routes,
    services::unread_service::UnreadService,
    state::AppState,
    store::{MemoryStore, PgStore, Store},
};

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = config::Config::from_env()?;

    let store: Arc<dyn Store> = match cfg.database_url.as_deref() {
        Some(url) => {
            let pool = db::init_pool(url)
                .await
                .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;
            // Embedded migrations are idempotent; schema drift is fatal.
            migrations::run_all(&pool)
                .await
                .map_err(|e| error::AppError::StartServer(format!("migrations: {e}")))?;
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let transport: Arc<dyn Transport> = match cfg.redis_url.as_deref() {
        Some(url) => {
            let client = redis::Client::open(url)
                .map_err(|e| error::AppError::StartServer(format!("redis: {e}")))?;
            let transport = RedisTransport::new(client);
            transport.spawn_listener();
            Arc::new(transport)
        }
        None => {
            tracing::info!("REDIS_URL not set; live events fan out in-process only");
            Arc::new(LocalTransport::new())
        }
    };

    let gateway = SyncGateway::new(transport);
    let unread = Arc::new(UnreadService::new(store.clone()));
    let state = AppState {
        store,
        gateway,
        unread,
    };

    let app = routes::build_router().with_state(state);

    let bind_addr = format!("{}:{}", cfg.bind_addr, cfg.port);
    tracing::info!(%bind_addr, "starting conversation-service");
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;

    Ok(())
}
