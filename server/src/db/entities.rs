//! Database operations for the entities table.
//!
//! Updates and deletes are compare-and-swap statements guarded by
//! `version = $n`; an empty result means the guard failed and the caller
//! inspects the current row to classify the rejection.

use ferry_engine::{PullCursor, VersionedEntity};
use sqlx::{PgExecutor, Row};

/// A stored entity row from the database.
#[derive(Debug)]
pub struct StoredEntity {
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub version: i64,
    pub updated_at: i64,
    pub deleted_at: Option<i64>,
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for StoredEntity {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(StoredEntity {
            entity_type: row.try_get("entity_type")?,
            entity_id: row.try_get("entity_id")?,
            data: row.try_get("data")?,
            version: row.try_get("version")?,
            updated_at: row.try_get("updated_at")?,
            deleted_at: row.try_get("deleted_at")?,
        })
    }
}

impl StoredEntity {
    /// Convert database row to an engine entity.
    pub fn to_entity(&self) -> VersionedEntity {
        VersionedEntity {
            id: self.entity_id.clone(),
            entity_type: self.entity_type.clone(),
            data: self.data.clone(),
            version: self.version as u64,
            updated_at: self.updated_at as u64,
            deleted_at: self.deleted_at.map(|t| t as u64),
        }
    }
}

const COLUMNS: &str = "entity_type, entity_id, data, version, updated_at, deleted_at";

/// Get an entity, tombstones included.
pub async fn get_entity<'e, E: PgExecutor<'e>>(
    executor: E,
    entity_type: &str,
    entity_id: &str,
) -> Result<Option<StoredEntity>, sqlx::Error> {
    sqlx::query_as::<_, StoredEntity>(&format!(
        "SELECT {COLUMNS} FROM entities WHERE entity_type = $1 AND entity_id = $2"
    ))
    .bind(entity_type)
    .bind(entity_id)
    .fetch_optional(executor)
    .await
}

/// Insert an entity at version 1. Returns `None` if the key is taken.
pub async fn insert_entity<'e, E: PgExecutor<'e>>(
    executor: E,
    entity: &VersionedEntity,
) -> Result<Option<StoredEntity>, sqlx::Error> {
    sqlx::query_as::<_, StoredEntity>(&format!(
        r#"
        INSERT INTO entities (entity_type, entity_id, data, version, updated_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (entity_type, entity_id) DO NOTHING
        RETURNING {COLUMNS}
        "#
    ))
    .bind(&entity.entity_type)
    .bind(&entity.id)
    .bind(&entity.data)
    .bind(entity.version as i64)
    .bind(entity.updated_at as i64)
    .fetch_optional(executor)
    .await
}

/// Replace the data of a live entity at `expected_version`.
pub async fn cas_update<'e, E: PgExecutor<'e>>(
    executor: E,
    entity_type: &str,
    entity_id: &str,
    data: &serde_json::Value,
    expected_version: u64,
    updated_at: u64,
) -> Result<Option<StoredEntity>, sqlx::Error> {
    sqlx::query_as::<_, StoredEntity>(&format!(
        r#"
        UPDATE entities
        SET data = $3, version = version + 1, updated_at = $5
        WHERE entity_type = $1 AND entity_id = $2
          AND version = $4 AND deleted_at IS NULL
        RETURNING {COLUMNS}
        "#
    ))
    .bind(entity_type)
    .bind(entity_id)
    .bind(data)
    .bind(expected_version as i64)
    .bind(updated_at as i64)
    .fetch_optional(executor)
    .await
}

/// Tombstone a live entity at `expected_version`.
pub async fn cas_delete<'e, E: PgExecutor<'e>>(
    executor: E,
    entity_type: &str,
    entity_id: &str,
    expected_version: u64,
    deleted_at: u64,
) -> Result<Option<StoredEntity>, sqlx::Error> {
    sqlx::query_as::<_, StoredEntity>(&format!(
        r#"
        UPDATE entities
        SET version = version + 1, updated_at = $4, deleted_at = $4
        WHERE entity_type = $1 AND entity_id = $2
          AND version = $3 AND deleted_at IS NULL
        RETURNING {COLUMNS}
        "#
    ))
    .bind(entity_type)
    .bind(entity_id)
    .bind(expected_version as i64)
    .bind(deleted_at as i64)
    .fetch_optional(executor)
    .await
}

/// Entities changed after a cursor, ordered by `(updated_at, entity_type,
/// entity_id)`.
///
/// Without a cursor, everything updated after `since` is returned. An empty
/// `entity_types` slice means all types.
pub async fn get_changes_since<'e, E: PgExecutor<'e>>(
    executor: E,
    cursor: Option<&PullCursor>,
    since: u64,
    entity_types: &[String],
    limit: i64,
) -> Result<Vec<StoredEntity>, sqlx::Error> {
    match cursor {
        Some(cursor) => {
            sqlx::query_as::<_, StoredEntity>(&format!(
                r#"
                SELECT {COLUMNS}
                FROM entities
                WHERE (updated_at, entity_type, entity_id) > ($1, $2, $3)
                  AND (cardinality($4::text[]) = 0 OR entity_type = ANY($4))
                ORDER BY updated_at ASC, entity_type ASC, entity_id ASC
                LIMIT $5
                "#
            ))
            .bind(cursor.timestamp as i64)
            .bind(&cursor.entity_type)
            .bind(&cursor.entity_id)
            .bind(entity_types)
            .bind(limit)
            .fetch_all(executor)
            .await
        }
        None => {
            sqlx::query_as::<_, StoredEntity>(&format!(
                r#"
                SELECT {COLUMNS}
                FROM entities
                WHERE updated_at > $1
                  AND (cardinality($2::text[]) = 0 OR entity_type = ANY($2))
                ORDER BY updated_at ASC, entity_type ASC, entity_id ASC
                LIMIT $3
                "#
            ))
            .bind(since as i64)
            .bind(entity_types)
            .bind(limit)
            .fetch_all(executor)
            .await
        }
    }
}

/// A page of live entities of one type, ordered by ID.
pub async fn get_active_page<'e, E: PgExecutor<'e>>(
    executor: E,
    entity_type: &str,
    offset: i64,
    limit: i64,
) -> Result<Vec<StoredEntity>, sqlx::Error> {
    sqlx::query_as::<_, StoredEntity>(&format!(
        r#"
        SELECT {COLUMNS}
        FROM entities
        WHERE entity_type = $1 AND deleted_at IS NULL
        ORDER BY entity_id ASC
        OFFSET $2
        LIMIT $3
        "#
    ))
    .bind(entity_type)
    .bind(offset)
    .bind(limit)
    .fetch_all(executor)
    .await
}
