//! OpenAPI documentation for the conversation service.

use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Conversation Service API",
        version = "1.0.0",
        description = "Two-party conversations, unread counters, and real-time sync",
        license(name = "MIT")
    ),
    tags(
        (name = "Health", description = "Service health checks"),
        (name = "Conversations", description = "Conversation ledger operations"),
        (name = "Messages", description = "Message history and mutations"),
        (name = "Unread", description = "Per-principal unread totals"),
        (name = "WebSocket", description = "Live event stream"),
    )
)]
pub struct ApiDoc;
