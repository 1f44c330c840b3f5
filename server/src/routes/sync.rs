//! Sync endpoint routes.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use ferry_engine::protocol::{PULL_PATH, PUSH_PATH};
use ferry_engine::{ApiResponse, PullQuery, PushRequest};

use super::{envelope, now_ms};
use crate::error::Result;
use crate::handlers::{handle_pull, handle_push};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(PUSH_PATH, post(push_handler))
        .route(PULL_PATH, get(pull_handler))
}

/// POST /api/v1/sync/batch - Apply a batch of client changes.
async fn push_handler(
    State(state): State<AppState>,
    Json(request): Json<PushRequest>,
) -> Result<Json<ApiResponse>> {
    let response = handle_push(&state.store, &request, now_ms()).await?;
    envelope(response)
}

/// GET /api/v1/sync/updates - Changes since a cursor.
async fn pull_handler(
    State(state): State<AppState>,
    Query(query): Query<PullQuery>,
) -> Result<Json<ApiResponse>> {
    let response =
        handle_pull(&state.store, query, state.config.pull_max_limit, now_ms()).await?;
    envelope(response)
}
