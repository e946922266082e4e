use axum::extract::State;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use crate::models::Principal;
use crate::state::AppState;

#[derive(Serialize, Deserialize)]
pub struct UnreadTotalResponse {
    pub total: u64,
}

/// Advisory badge count: degrades to a cached value instead of failing.
pub async fn unread_total(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> Json<UnreadTotalResponse> {
    let total = state.unread.compute_total(&principal).await;
    Json(UnreadTotalResponse { total })
}
