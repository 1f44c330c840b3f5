//! Entity handlers - paged listing and single-entity CAS writes.

use crate::error::{AppError, Result};
use crate::store::Store;
use ferry_engine::{EntityKey, EntityPage, EntityPageQuery, EntityWrite, PushResult, Timestamp};

/// List one page of live entities of a type.
pub async fn handle_page(store: &Store, query: &EntityPageQuery) -> Result<EntityPage> {
    if query.entity_type.trim().is_empty() {
        return Err(AppError::BadRequest("entity_type is required".to_string()));
    }

    store.page(query).await
}

/// Update one entity if `client_version` is current.
pub async fn handle_write(
    store: &Store,
    key: &EntityKey,
    write: &EntityWrite,
    now: Timestamp,
) -> Result<PushResult> {
    let result = store.write(key, write, now).await?;

    tracing::info!(
        entity = %key,
        status = ?result.status,
        version = ?result.server_version,
        "entity write"
    );

    Ok(result)
}
