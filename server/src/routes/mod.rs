//! HTTP route definitions.

mod entities;
mod health;
mod sync;

use crate::error::Result;
use crate::AppState;
use axum::{Json, Router};
use ferry_engine::ApiResponse;
use serde::Serialize;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(sync::routes())
        .merge(entities::routes())
}

/// Wrap handler output in a success envelope.
fn envelope<T: Serialize>(data: T) -> Result<Json<ApiResponse>> {
    Ok(Json(ApiResponse::ok(serde_json::to_value(data)?)))
}

/// Server clock in milliseconds.
fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}
