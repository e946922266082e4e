use crate::state::AppState;
use axum::middleware;
use axum::{
    routing::{delete, get, post},
    Json, Router,
};

pub mod conversations;
use conversations::{
    create_conversation, deactivate, get_conversation, get_message_history, list_conversations,
    mark_read, set_archived,
};
pub mod messages;
use messages::{delete_message, send_message};
pub mod unread;
use unread::unread_total;
pub mod ws;
use ws::ws_handler;

async fn openapi_json() -> Json<serde_json::Value> {
    use utoipa::OpenApi;
    Json(serde_json::to_value(crate::openapi::ApiDoc::openapi()).unwrap_or_default())
}

pub fn build_router() -> Router<AppState> {
    // Service introspection endpoints (no API version prefix, no identity)
    let introspection = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/metrics", get(crate::metrics::metrics_handler))
        .route("/openapi.json", get(openapi_json));

    let api_v1 = Router::new()
        .route(
            "/conversations",
            post(create_conversation).get(list_conversations),
        )
        .route("/conversations/:id", get(get_conversation))
        .route(
            "/conversations/:id/messages",
            post(send_message).get(get_message_history),
        )
        .route("/conversations/:id/read", post(mark_read))
        .route("/conversations/:id/archive", post(set_archived))
        .route("/conversations/:id/deactivate", post(deactivate))
        .route("/messages/:id", delete(delete_message))
        .route("/unread/total", get(unread_total))
        .route("/ws", get(ws_handler))
        .layer(middleware::from_fn(
            crate::middleware::identity::identity_middleware,
        ));

    let router = introspection.merge(Router::new().nest("/api/v1", api_v1));

    crate::middleware::with_defaults(router)
}
