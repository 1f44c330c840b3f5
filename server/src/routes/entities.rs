//! Entity endpoint routes.

use axum::{
    extract::{Path, Query, State},
    routing::{get, put},
    Json, Router,
};
use ferry_engine::protocol::ENTITIES_PATH;
use ferry_engine::{ApiResponse, EntityKey, EntityPageQuery, EntityWrite};

use super::{envelope, now_ms};
use crate::error::Result;
use crate::handlers::{handle_page, handle_write};
use crate::AppState;

/// Create entity routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route(ENTITIES_PATH, get(page_handler))
        .route(
            &format!("{}/{{entity_type}}/{{entity_id}}", ENTITIES_PATH),
            put(write_handler),
        )
}

/// GET /api/v1/entities - One page of live entities of a type.
async fn page_handler(
    State(state): State<AppState>,
    Query(query): Query<EntityPageQuery>,
) -> Result<Json<ApiResponse>> {
    let page = handle_page(&state.store, &query).await?;
    envelope(page)
}

/// PUT /api/v1/entities/{entity_type}/{entity_id} - CAS update of one entity.
async fn write_handler(
    State(state): State<AppState>,
    Path((entity_type, entity_id)): Path<(String, String)>,
    Json(write): Json<EntityWrite>,
) -> Result<Json<ApiResponse>> {
    let key = EntityKey::new(entity_type, entity_id);
    let result = handle_write(&state.store, &key, &write, now_ms()).await?;
    envelope(result)
}
