//! Storage backends behind the HTTP handlers.
//!
//! [`Store::Postgres`] is the production backend. [`Store::Memory`] wraps the
//! engine's in-memory `VersionedStore` and is used when no database is
//! configured.

use crate::db::{self, Pool, StoredEntity};
use crate::error::{AppError, Result};
use ferry_engine::store::{DEFAULT_PAGE_LIMIT, DEFAULT_PULL_LIMIT, MAX_PAGE_LIMIT, MAX_PULL_LIMIT};
use ferry_engine::{
    rejection, ChangeAction, EntityKey, EntityPage, EntityPageQuery, EntityWrite, Error,
    PullChange, PullQuery, PullResponse, PushItem, PushResult, PushStatus, Timestamp, Version,
    VersionedEntity, VersionedStore,
};
use parking_lot::Mutex;
use std::collections::HashSet;

/// The authoritative versioned store.
pub enum Store {
    Postgres {
        pool: Pool,
        read_only: HashSet<String>,
    },
    Memory(Mutex<VersionedStore>),
}

impl Store {
    pub fn postgres(pool: Pool, read_only: &[String]) -> Self {
        Store::Postgres {
            pool,
            read_only: read_only.iter().cloned().collect(),
        }
    }

    pub fn memory(read_only: &[String]) -> Self {
        Store::Memory(Mutex::new(
            VersionedStore::new().with_read_only(read_only.iter().cloned()),
        ))
    }

    /// Backend name reported by the health check.
    pub fn backend(&self) -> &'static str {
        match self {
            Store::Postgres { .. } => "postgres",
            Store::Memory(_) => "memory",
        }
    }

    /// Apply one pushed change. Retransmitted change IDs return the recorded
    /// result.
    pub async fn apply(&self, item: &PushItem, now: Timestamp) -> Result<PushResult> {
        match self {
            Store::Memory(store) => Ok(store.lock().apply(item, now)),
            Store::Postgres { pool, read_only } => {
                let mut tx = pool.begin().await?;

                if let Some(change_id) = &item.change_id {
                    if let Some(previous) = db::get_applied_result(&mut *tx, change_id).await? {
                        tracing::debug!(%change_id, "change already applied");
                        return Ok(previous);
                    }
                }

                let key = EntityKey::new(item.entity_type.clone(), item.entity_id.clone());
                let written = match (item.action, item.client_version) {
                    (_, _) if read_only.contains(&item.entity_type) => {
                        Err(Error::PermissionDenied(item.entity_type.clone()).into())
                    }
                    (ChangeAction::Create, _) => pg_create(&mut tx, &key, &item.data, now).await,
                    (ChangeAction::Update, Some(version)) => {
                        pg_update(&mut tx, &key, &item.data, version, now).await
                    }
                    (ChangeAction::Delete, Some(version)) => {
                        pg_delete(&mut tx, &key, version, now).await
                    }
                    (action, None) => Err(Error::InvalidPayload(format!(
                        "client_version is required for {}",
                        action
                    ))
                    .into()),
                };

                let result = settle(&mut tx, &key, written).await?;

                if let Some(change_id) = &item.change_id {
                    if result.status == PushStatus::Success {
                        db::record_applied(&mut *tx, change_id, &result, now).await?;
                    }
                }

                tx.commit().await?;
                Ok(result)
            }
        }
    }

    /// Single-entity CAS update.
    pub async fn write(
        &self,
        key: &EntityKey,
        write: &EntityWrite,
        now: Timestamp,
    ) -> Result<PushResult> {
        match self {
            Store::Memory(store) => Ok(store.lock().write(
                &key.entity_type,
                &key.entity_id,
                write,
                now,
            )),
            Store::Postgres { pool, read_only } => {
                let mut tx = pool.begin().await?;

                let written = if read_only.contains(&key.entity_type) {
                    Err(Error::PermissionDenied(key.entity_type.clone()).into())
                } else {
                    pg_update(&mut tx, key, &write.data, write.client_version, now).await
                };
                let result = settle(&mut tx, key, written).await?;

                tx.commit().await?;
                Ok(result)
            }
        }
    }

    /// Changes after the query's cursor, at most `limit` of them.
    pub async fn changes_since(
        &self,
        query: &PullQuery,
        server_time: Timestamp,
    ) -> Result<PullResponse> {
        match self {
            Store::Memory(store) => Ok(store.lock().changes_since(query, server_time)),
            Store::Postgres { pool, .. } => {
                let limit = query
                    .limit
                    .map(|l| l.clamp(1, MAX_PULL_LIMIT))
                    .unwrap_or(DEFAULT_PULL_LIMIT) as usize;
                let cursor = query.cursor();

                // Fetch one more than requested to check if there are more
                let rows = db::get_changes_since(
                    pool,
                    cursor.as_ref(),
                    query.since.unwrap_or(0),
                    &query.entity_types(),
                    limit as i64 + 1,
                )
                .await?;

                let has_more = rows.len() > limit;
                let changes = rows
                    .iter()
                    .take(limit)
                    .map(|row| PullChange::from(&row.to_entity()))
                    .collect();

                Ok(PullResponse {
                    changes,
                    server_time,
                    has_more,
                })
            }
        }
    }

    /// Forget change IDs applied before `before`.
    pub async fn prune_applied(&self, before: Timestamp) -> Result<u64> {
        match self {
            Store::Memory(store) => Ok(store.lock().prune_applied(before) as u64),
            Store::Postgres { pool, .. } => Ok(db::prune_applied(pool, before).await?),
        }
    }

    /// One page of live entities of a type.
    pub async fn page(&self, query: &EntityPageQuery) -> Result<EntityPage> {
        match self {
            Store::Memory(store) => Ok(store.lock().page(query)),
            Store::Postgres { pool, .. } => {
                let limit = query
                    .limit
                    .map(|l| l.clamp(1, MAX_PAGE_LIMIT))
                    .unwrap_or(DEFAULT_PAGE_LIMIT) as usize;

                let rows = db::get_active_page(
                    pool,
                    &query.entity_type,
                    query.offset as i64,
                    limit as i64 + 1,
                )
                .await?;

                Ok(EntityPage {
                    has_more: rows.len() > limit,
                    entities: rows.iter().take(limit).map(StoredEntity::to_entity).collect(),
                })
            }
        }
    }
}

type Tx = sqlx::Transaction<'static, sqlx::Postgres>;

/// Turn a write outcome into a push result. Engine errors are rejections that
/// carry the current row; database errors abort the request.
async fn settle(
    tx: &mut Tx,
    key: &EntityKey,
    written: Result<VersionedEntity>,
) -> Result<PushResult> {
    match written {
        Ok(entity) => Ok(PushResult::success(entity)),
        Err(AppError::Engine(e)) => {
            let current = db::get_entity(&mut **tx, &key.entity_type, &key.entity_id)
                .await?
                .map(|row| row.to_entity());
            tracing::debug!(entity = %key, error = %e, "write rejected");
            Ok(rejection(key, &e, current))
        }
        Err(e) => Err(e),
    }
}

async fn pg_create(
    tx: &mut Tx,
    key: &EntityKey,
    data: &serde_json::Value,
    now: Timestamp,
) -> Result<VersionedEntity> {
    require_data(data)?;

    let entity = VersionedEntity::new(
        key.entity_type.clone(),
        key.entity_id.clone(),
        data.clone(),
        now,
    );
    if let Some(row) = db::insert_entity(&mut **tx, &entity).await? {
        return Ok(row.to_entity());
    }

    let existing = db::get_entity(&mut **tx, &key.entity_type, &key.entity_id).await?;
    Err(match existing {
        Some(row) if row.deleted_at.is_some() => Error::EntityDeleted {
            entity_type: key.entity_type.clone(),
            entity_id: key.entity_id.clone(),
        },
        _ => Error::EntityAlreadyExists {
            entity_type: key.entity_type.clone(),
            entity_id: key.entity_id.clone(),
        },
    }
    .into())
}

async fn pg_update(
    tx: &mut Tx,
    key: &EntityKey,
    data: &serde_json::Value,
    client_version: Version,
    now: Timestamp,
) -> Result<VersionedEntity> {
    require_data(data)?;

    match db::cas_update(
        &mut **tx,
        &key.entity_type,
        &key.entity_id,
        data,
        client_version,
        now,
    )
    .await?
    {
        Some(row) => Ok(row.to_entity()),
        None => Err(cas_failure(tx, key, client_version).await?.into()),
    }
}

async fn pg_delete(
    tx: &mut Tx,
    key: &EntityKey,
    client_version: Version,
    now: Timestamp,
) -> Result<VersionedEntity> {
    match db::cas_delete(&mut **tx, &key.entity_type, &key.entity_id, client_version, now).await? {
        Some(row) => Ok(row.to_entity()),
        None => Err(cas_failure(tx, key, client_version).await?.into()),
    }
}

/// Why a guarded write matched no row.
async fn cas_failure(tx: &mut Tx, key: &EntityKey, client_version: Version) -> Result<Error> {
    let current = db::get_entity(&mut **tx, &key.entity_type, &key.entity_id).await?;

    Ok(match current {
        None => Error::EntityNotFound {
            entity_type: key.entity_type.clone(),
            entity_id: key.entity_id.clone(),
        },
        Some(row) if row.deleted_at.is_some() => Error::EntityDeleted {
            entity_type: key.entity_type.clone(),
            entity_id: key.entity_id.clone(),
        },
        Some(row) => Error::VersionMismatch {
            expected: client_version,
            actual: row.version as Version,
        },
    })
}

fn require_data(data: &serde_json::Value) -> Result<()> {
    if data.is_null() {
        return Err(Error::InvalidPayload("data is required".into()).into());
    }
    Ok(())
}
