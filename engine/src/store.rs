//! VersionedStore - in-memory implementation of the optimistic-locking contract.
//!
//! Every write carries the version the writer believes is current. The store
//! compares it with the stored version and either applies the write (bumping
//! the version by one) or rejects it with the current state, so the writer
//! always has enough to merge. Deletes are soft: the entity keeps its last
//! version and a tombstone timestamp, and accepts no further writes.
//!
//! The network store in `ferry-server` follows the same rules; this type backs
//! tests, benchmarks and in-process transports.

use crate::protocol::{
    ConflictType, EntityPage, EntityPageQuery, EntityWrite, PullChange, PullCursor, PullQuery,
    PullResponse, PushItem, PushRequest, PushResponse, PushResult,
};
use crate::{
    error::Result, ChangeAction, ChangeId, EntityId, EntityKey, EntityType, Error, Timestamp,
    Version, VersionedEntity,
};
use std::collections::{HashMap, HashSet};

/// Default number of changes returned by a pull.
pub const DEFAULT_PULL_LIMIT: u32 = 100;

/// Maximum number of changes returned by a pull.
pub const MAX_PULL_LIMIT: u32 = 1000;

/// How long an applied change ID is remembered for retransmissions (30 days).
pub const APPLIED_RETENTION_MS: u64 = 30 * 24 * 60 * 60 * 1000;

/// Default and maximum page size for entity listings.
pub const DEFAULT_PAGE_LIMIT: u32 = 100;
pub const MAX_PAGE_LIMIT: u32 = 1000;

/// Entities of one type.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    entities: HashMap<EntityId, VersionedEntity>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
        }
    }

    /// Get an entity by ID, including tombstones.
    pub fn get(&self, id: &str) -> Option<&VersionedEntity> {
        self.entities.get(id)
    }

    fn get_mut(&mut self, id: &str) -> Option<&mut VersionedEntity> {
        self.entities.get_mut(id)
    }

    fn insert(&mut self, entity: VersionedEntity) {
        self.entities.insert(entity.id.clone(), entity);
    }

    /// All entities including tombstones.
    pub fn all(&self) -> impl Iterator<Item = &VersionedEntity> {
        self.entities.values()
    }

    /// Count of active entities.
    pub fn len(&self) -> usize {
        self.entities.values().filter(|e| e.is_active()).count()
    }

    /// Check if collection has no active entities.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Authoritative record store with compare-and-swap writes.
#[derive(Debug, Clone, Default)]
pub struct VersionedStore {
    collections: HashMap<EntityType, Collection>,
    /// Entity types that reject all writes
    read_only: HashSet<EntityType>,
    /// Results of applied changes and when they were applied, by change ID
    applied: HashMap<ChangeId, (Timestamp, PushResult)>,
}

impl VersionedStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark entity types as read-only.
    pub fn with_read_only<I, S>(mut self, entity_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<EntityType>,
    {
        self.read_only
            .extend(entity_types.into_iter().map(Into::into));
        self
    }

    /// Seed an entity as-is, bypassing version checks.
    pub fn insert(&mut self, entity: VersionedEntity) {
        self.collections
            .entry(entity.entity_type.clone())
            .or_default()
            .insert(entity);
    }

    /// Get an entity, including tombstones.
    pub fn get(&self, entity_type: &str, id: &str) -> Option<&VersionedEntity> {
        self.collections.get(entity_type).and_then(|c| c.get(id))
    }

    /// Get a collection by entity type.
    pub fn collection(&self, entity_type: &str) -> Option<&Collection> {
        self.collections.get(entity_type)
    }

    fn check_writable(&self, entity_type: &str) -> Result<()> {
        if self.read_only.contains(entity_type) {
            return Err(Error::PermissionDenied(entity_type.to_string()));
        }
        Ok(())
    }

    /// Create an entity at version 1.
    pub fn create(
        &mut self,
        entity_type: &str,
        id: &str,
        data: serde_json::Value,
        timestamp: Timestamp,
    ) -> Result<VersionedEntity> {
        self.check_writable(entity_type)?;
        if data.is_null() {
            return Err(Error::InvalidPayload("data is required".into()));
        }

        let collection = self.collections.entry(entity_type.to_string()).or_default();
        if let Some(existing) = collection.get(id) {
            if existing.is_active() {
                return Err(Error::EntityAlreadyExists {
                    entity_type: entity_type.to_string(),
                    entity_id: id.to_string(),
                });
            }
            return Err(Error::EntityDeleted {
                entity_type: entity_type.to_string(),
                entity_id: id.to_string(),
            });
        }

        let entity = VersionedEntity::new(entity_type, id, data, timestamp);
        collection.insert(entity.clone());
        Ok(entity)
    }

    /// Replace an entity's data if `client_version` is current.
    pub fn update(
        &mut self,
        entity_type: &str,
        id: &str,
        data: serde_json::Value,
        client_version: Version,
        timestamp: Timestamp,
    ) -> Result<VersionedEntity> {
        self.check_writable(entity_type)?;
        if data.is_null() {
            return Err(Error::InvalidPayload("data is required".into()));
        }

        let entity = self.writable_entity(entity_type, id, client_version)?;
        entity.update_data(data, timestamp);
        Ok(entity.clone())
    }

    /// Soft-delete an entity if `client_version` is current.
    pub fn delete(
        &mut self,
        entity_type: &str,
        id: &str,
        client_version: Version,
        timestamp: Timestamp,
    ) -> Result<VersionedEntity> {
        self.check_writable(entity_type)?;

        let entity = self.writable_entity(entity_type, id, client_version)?;
        entity.mark_deleted(timestamp);
        Ok(entity.clone())
    }

    fn writable_entity(
        &mut self,
        entity_type: &str,
        id: &str,
        client_version: Version,
    ) -> Result<&mut VersionedEntity> {
        let entity = self
            .collections
            .get_mut(entity_type)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| Error::EntityNotFound {
                entity_type: entity_type.to_string(),
                entity_id: id.to_string(),
            })?;

        if !entity.is_active() {
            return Err(Error::EntityDeleted {
                entity_type: entity_type.to_string(),
                entity_id: id.to_string(),
            });
        }

        if entity.version != client_version {
            return Err(Error::VersionMismatch {
                expected: client_version,
                actual: entity.version,
            });
        }

        Ok(entity)
    }

    /// Apply one pushed change and report its outcome.
    ///
    /// A change whose `change_id` was already applied returns the recorded
    /// result without touching the store.
    pub fn apply(&mut self, item: &PushItem, timestamp: Timestamp) -> PushResult {
        if let Some(change_id) = &item.change_id {
            if let Some((_, previous)) = self.applied.get(change_id) {
                return previous.clone();
            }
        }

        let key = EntityKey::new(item.entity_type.clone(), item.entity_id.clone());
        let outcome = match (item.action, item.client_version) {
            (ChangeAction::Create, _) => self.create(
                &item.entity_type,
                &item.entity_id,
                item.data.clone(),
                timestamp,
            ),
            (ChangeAction::Update, Some(version)) => self.update(
                &item.entity_type,
                &item.entity_id,
                item.data.clone(),
                version,
                timestamp,
            ),
            (ChangeAction::Delete, Some(version)) => {
                self.delete(&item.entity_type, &item.entity_id, version, timestamp)
            }
            (action, None) => Err(Error::InvalidPayload(format!(
                "client_version is required for {}",
                action
            ))),
        };

        let result = match outcome {
            Ok(entity) => PushResult::success(entity),
            Err(e) => {
                let current = self.get(&item.entity_type, &item.entity_id).cloned();
                rejection(&key, &e, current)
            }
        };

        if let Some(change_id) = &item.change_id {
            if result.status == crate::protocol::PushStatus::Success {
                self.applied
                    .insert(change_id.clone(), (timestamp, result.clone()));
            }
        }

        result
    }

    /// Forget change IDs applied before `before`. Returns how many were
    /// dropped; a retransmission of one of them is evaluated again.
    pub fn prune_applied(&mut self, before: Timestamp) -> usize {
        let count = self.applied.len();
        self.applied.retain(|_, (applied_at, _)| *applied_at >= before);
        count - self.applied.len()
    }

    /// Apply a whole batch in order.
    pub fn push(&mut self, request: &PushRequest, timestamp: Timestamp) -> PushResponse {
        let results = request
            .changes
            .iter()
            .map(|item| self.apply(item, timestamp))
            .collect();

        PushResponse {
            results,
            server_time: timestamp,
        }
    }

    /// Single-entity CAS write, used when a merged payload is resubmitted.
    pub fn write(
        &mut self,
        entity_type: &str,
        id: &str,
        write: &EntityWrite,
        timestamp: Timestamp,
    ) -> PushResult {
        let key = EntityKey::new(entity_type, id);
        match self.update(
            entity_type,
            id,
            write.data.clone(),
            write.client_version,
            timestamp,
        ) {
            Ok(entity) => PushResult::success(entity),
            Err(e) => {
                let current = self.get(entity_type, id).cloned();
                rejection(&key, &e, current)
            }
        }
    }

    /// Entities changed after the query's cursor, in cursor order.
    pub fn changes_since(&self, query: &PullQuery, server_time: Timestamp) -> PullResponse {
        let limit = query
            .limit
            .map(|l| l.clamp(1, MAX_PULL_LIMIT))
            .unwrap_or(DEFAULT_PULL_LIMIT) as usize;
        let entity_types = query.entity_types();
        let cursor = query.cursor();
        let since = query.since.unwrap_or(0);

        let mut changes: Vec<PullChange> = self
            .collections
            .iter()
            .filter(|(t, _)| entity_types.is_empty() || entity_types.contains(*t))
            .flat_map(|(_, c)| c.all())
            .map(PullChange::from)
            .filter(|change| match &cursor {
                Some(cursor) => PullCursor::after(change) > *cursor,
                None => change.updated_at > since,
            })
            .collect();

        changes.sort_by(|a, b| PullCursor::after(a).cmp(&PullCursor::after(b)));

        let has_more = changes.len() > limit;
        changes.truncate(limit);

        PullResponse {
            changes,
            server_time,
            has_more,
        }
    }

    /// One page of active entities of a type, ordered by ID.
    pub fn page(&self, query: &EntityPageQuery) -> EntityPage {
        let limit = query
            .limit
            .map(|l| l.clamp(1, MAX_PAGE_LIMIT))
            .unwrap_or(DEFAULT_PAGE_LIMIT) as usize;

        let mut entities: Vec<&VersionedEntity> = self
            .collections
            .get(&query.entity_type)
            .map(|c| c.all().filter(|e| e.is_active()).collect())
            .unwrap_or_default();
        entities.sort_by(|a, b| a.id.cmp(&b.id));

        let remaining = entities.len().saturating_sub(query.offset as usize);
        let page: Vec<VersionedEntity> = entities
            .into_iter()
            .skip(query.offset as usize)
            .take(limit)
            .cloned()
            .collect();

        EntityPage {
            has_more: remaining > page.len(),
            entities: page,
        }
    }
}

/// Translate a rejected write into a push result.
///
/// Version, existence, tombstone and permission failures are conflicts that
/// carry the current server state; everything else is an item error.
pub fn rejection(key: &EntityKey, error: &Error, current: Option<VersionedEntity>) -> PushResult {
    match error {
        Error::VersionMismatch { .. } | Error::EntityAlreadyExists { .. } => PushResult::conflict(
            key,
            ConflictType::VersionMismatch,
            current,
            error.to_string(),
        ),
        Error::EntityDeleted { .. } => {
            PushResult::conflict(key, ConflictType::Deleted, current, error.to_string())
        }
        Error::PermissionDenied(_) => PushResult::conflict(
            key,
            ConflictType::PermissionDenied,
            current,
            error.to_string(),
        ),
        _ => PushResult::error(key, error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::PushStatus;
    use crate::ChangeRecord;
    use serde_json::json;

    fn seeded_store() -> VersionedStore {
        let mut store = VersionedStore::new();
        store
            .create("estimate", "e-1", json!({"clientName": "Acme"}), 1000)
            .unwrap();
        store
    }

    #[test]
    fn create_starts_at_version_one() {
        let store = seeded_store();
        let entity = store.get("estimate", "e-1").unwrap();

        assert_eq!(entity.version, 1);
        assert_eq!(store.collection("estimate").unwrap().len(), 1);
    }

    #[test]
    fn create_duplicate_rejected() {
        let mut store = seeded_store();
        let err = store
            .create("estimate", "e-1", json!({}), 2000)
            .unwrap_err();

        assert!(matches!(err, Error::EntityAlreadyExists { .. }));
    }

    #[test]
    fn update_with_current_version_increments() {
        let mut store = seeded_store();
        let entity = store
            .update("estimate", "e-1", json!({"clientName": "Beta"}), 1, 2000)
            .unwrap();

        assert_eq!(entity.version, 2);
        assert_eq!(store.get("estimate", "e-1").unwrap().data["clientName"], "Beta");
    }

    #[test]
    fn update_with_stale_version_leaves_store_unchanged() {
        let mut store = seeded_store();
        store
            .update("estimate", "e-1", json!({"clientName": "Beta"}), 1, 2000)
            .unwrap();

        let err = store
            .update("estimate", "e-1", json!({"clientName": "Gamma"}), 1, 3000)
            .unwrap_err();

        assert_eq!(
            err,
            Error::VersionMismatch {
                expected: 1,
                actual: 2
            }
        );
        let entity = store.get("estimate", "e-1").unwrap();
        assert_eq!(entity.version, 2);
        assert_eq!(entity.data["clientName"], "Beta");
    }

    #[test]
    fn delete_is_soft_and_final() {
        let mut store = seeded_store();
        let tombstone = store.delete("estimate", "e-1", 1, 2000).unwrap();

        assert_eq!(tombstone.version, 2);
        assert_eq!(tombstone.deleted_at, Some(2000));

        let err = store
            .update("estimate", "e-1", json!({}), 2, 3000)
            .unwrap_err();
        assert!(matches!(err, Error::EntityDeleted { .. }));
        assert_eq!(store.get("estimate", "e-1").unwrap().version, 2);
    }

    #[test]
    fn apply_reports_conflict_with_current_state() {
        let mut store = seeded_store();
        store
            .update("estimate", "e-1", json!({"clientName": "Server"}), 1, 2000)
            .unwrap();

        let change =
            ChangeRecord::update("c-1", "estimate", "e-1", json!({"clientName": "Local"}), 1, 1500);
        let result = store.apply(&PushItem::from(&change), 3000);

        assert_eq!(result.status, PushStatus::Conflict);
        assert_eq!(result.conflict_type, Some(ConflictType::VersionMismatch));
        assert_eq!(result.server_version, Some(2));
        assert_eq!(
            result.server_data.unwrap().data,
            json!({"clientName": "Server"})
        );
    }

    #[test]
    fn apply_on_tombstone_is_delete_conflict() {
        let mut store = seeded_store();
        store.delete("estimate", "e-1", 1, 2000).unwrap();

        let change = ChangeRecord::update("c-1", "estimate", "e-1", json!({"a": 1}), 2, 2500);
        let result = store.apply(&PushItem::from(&change), 3000);

        assert_eq!(result.conflict_type, Some(ConflictType::Deleted));
        assert!(result.server_data.unwrap().deleted_at.is_some());
    }

    #[test]
    fn apply_missing_entity_is_item_error() {
        let mut store = VersionedStore::new();
        let change = ChangeRecord::update("c-1", "estimate", "nope", json!({"a": 1}), 1, 1000);
        let result = store.apply(&PushItem::from(&change), 2000);

        assert_eq!(result.status, PushStatus::Error);
        assert!(result.message.unwrap().contains("not found"));
    }

    #[test]
    fn apply_without_client_version_is_item_error() {
        let mut store = seeded_store();
        let mut item = PushItem::from(&ChangeRecord::update(
            "c-1",
            "estimate",
            "e-1",
            json!({"a": 1}),
            1,
            1000,
        ));
        item.client_version = None;

        let result = store.apply(&item, 2000);
        assert_eq!(result.status, PushStatus::Error);
        assert_eq!(store.get("estimate", "e-1").unwrap().version, 1);
    }

    #[test]
    fn read_only_type_is_permission_conflict() {
        let mut store = VersionedStore::new().with_read_only(["setting"]);
        let change = ChangeRecord::create("c-1", "setting", "theme", json!({"v": "dark"}), 1000);
        let result = store.apply(&PushItem::from(&change), 2000);

        assert_eq!(result.conflict_type, Some(ConflictType::PermissionDenied));
        assert!(store.get("setting", "theme").is_none());
    }

    #[test]
    fn retransmitted_change_is_idempotent() {
        let mut store = seeded_store();
        let change =
            ChangeRecord::update("c-1", "estimate", "e-1", json!({"clientName": "B"}), 1, 1500);
        let item = PushItem::from(&change);

        let first = store.apply(&item, 2000);
        let second = store.apply(&item, 3000);

        assert_eq!(first.status, PushStatus::Success);
        assert_eq!(first, second);
        assert_eq!(store.get("estimate", "e-1").unwrap().version, 2);
    }

    #[test]
    fn pruned_change_id_is_evaluated_again() {
        let mut store = seeded_store();
        let change =
            ChangeRecord::update("c-1", "estimate", "e-1", json!({"clientName": "B"}), 1, 1500);
        let item = PushItem::from(&change);

        assert_eq!(store.apply(&item, 2000).status, PushStatus::Success);
        assert_eq!(store.prune_applied(2000), 0);
        assert_eq!(store.prune_applied(2001), 1);

        // Without the record the stale version is a conflict
        let again = store.apply(&item, 3000);
        assert_eq!(again.status, PushStatus::Conflict);
        assert_eq!(store.get("estimate", "e-1").unwrap().version, 2);
    }

    #[test]
    fn write_resubmits_with_cas() {
        let mut store = seeded_store();
        let ok = store.write(
            "estimate",
            "e-1",
            &EntityWrite {
                data: json!({"clientName": "Merged"}),
                client_version: 1,
            },
            2000,
        );
        assert_eq!(ok.status, PushStatus::Success);
        assert_eq!(ok.server_version, Some(2));

        let stale = store.write(
            "estimate",
            "e-1",
            &EntityWrite {
                data: json!({"clientName": "Again"}),
                client_version: 1,
            },
            3000,
        );
        assert_eq!(stale.status, PushStatus::Conflict);
    }

    #[test]
    fn changes_since_orders_and_pages() {
        let mut store = VersionedStore::new();
        store.create("estimate", "b", json!({"n": 1}), 100).unwrap();
        store.create("estimate", "a", json!({"n": 2}), 100).unwrap();
        store.create("catalog", "z", json!({"n": 3}), 50).unwrap();
        store.delete("estimate", "b", 1, 200).unwrap();

        let first = store.changes_since(&PullQuery::new(None, &[], 2), 999);
        let keys: Vec<_> = first.changes.iter().map(|c| c.entity_id.as_str()).collect();
        assert_eq!(keys, vec!["z", "a"]);
        assert!(first.has_more);
        assert_eq!(first.server_time, 999);

        let cursor = PullCursor::after(first.changes.last().unwrap());
        let second = store.changes_since(&PullQuery::new(Some(&cursor), &[], 2), 999);
        assert_eq!(second.changes.len(), 1);
        assert_eq!(second.changes[0].entity_id, "b");
        assert!(second.changes[0].deleted_at.is_some());
        assert!(!second.has_more);
    }

    #[test]
    fn changes_since_filters_by_type_and_timestamp() {
        let mut store = VersionedStore::new();
        store.create("estimate", "e-1", json!({}), 100).unwrap();
        store.create("catalog", "c-1", json!({}), 300).unwrap();
        store.create("estimate", "e-2", json!({}), 300).unwrap();

        let query = PullQuery {
            since: Some(100),
            entity_types: Some("estimate".into()),
            ..Default::default()
        };
        let response = store.changes_since(&query, 400);

        assert_eq!(response.changes.len(), 1);
        assert_eq!(response.changes[0].entity_id, "e-2");
    }

    #[test]
    fn page_lists_active_entities() {
        let mut store = VersionedStore::new();
        for id in ["c", "a", "b", "d"] {
            store.create("estimate", id, json!({"id": id}), 100).unwrap();
        }
        store.delete("estimate", "d", 1, 200).unwrap();

        let first = store.page(&EntityPageQuery {
            entity_type: "estimate".into(),
            offset: 0,
            limit: Some(2),
        });
        let ids: Vec<_> = first.entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert!(first.has_more);

        let second = store.page(&EntityPageQuery {
            entity_type: "estimate".into(),
            offset: 2,
            limit: Some(2),
        });
        assert_eq!(second.entities.len(), 1);
        assert!(!second.has_more);
    }
}
