//! Wire protocol shared by the client and the store server.
//!
//! Every response travels inside an [`ApiResponse`] envelope. Push results
//! are aligned by index with the pushed changes.

use crate::{
    ChangeAction, ChangeId, ChangeRecord, EntityId, EntityKey, EntityType, Timestamp, Version,
    VersionedEntity,
};
use serde::{Deserialize, Serialize};

/// Batch push endpoint.
pub const PUSH_PATH: &str = "/api/v1/sync/batch";
/// Pull-since-cursor endpoint.
pub const PULL_PATH: &str = "/api/v1/sync/updates";
/// Paged entity listing endpoint.
pub const ENTITIES_PATH: &str = "/api/v1/entities";

/// Path of the single-entity write endpoint.
pub fn entity_path(entity_type: &str, entity_id: &str) -> String {
    format!("{}/{}/{}", ENTITIES_PATH, entity_type, entity_id)
}

/// Response envelope: `{success, data|error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApiResponse {
    /// A successful envelope.
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed envelope.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

// ============================================================================
// Push
// ============================================================================

/// One change as transmitted to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_id: Option<ChangeId>,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub action: ChangeAction,
    #[serde(default)]
    pub data: serde_json::Value,
    /// Version the client believes is current
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_version: Option<Version>,
    pub timestamp: Timestamp,
}

impl From<&ChangeRecord> for PushItem {
    fn from(change: &ChangeRecord) -> Self {
        Self {
            change_id: Some(change.change_id.clone()),
            entity_type: change.entity_type.clone(),
            entity_id: change.entity_id.clone(),
            action: change.action,
            data: change.payload.clone(),
            client_version: change.base_version,
            timestamp: change.enqueued_at,
        }
    }
}

/// Request body for the batch push.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushRequest {
    pub changes: Vec<PushItem>,
}

/// Per-item status of a push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushStatus {
    Success,
    Conflict,
    Error,
}

/// Why the store rejected a write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictType {
    VersionMismatch,
    Deleted,
    PermissionDenied,
    #[serde(other)]
    Other,
}

/// Result of one pushed change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResult {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub status: PushStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_version: Option<Version>,
    /// Current server state of the entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_data: Option<VersionedEntity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_type: Option<ConflictType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PushResult {
    /// The write was applied; `entity` is the new server state.
    pub fn success(entity: VersionedEntity) -> Self {
        Self {
            entity_type: entity.entity_type.clone(),
            entity_id: entity.id.clone(),
            status: PushStatus::Success,
            server_version: Some(entity.version),
            server_data: Some(entity),
            conflict_type: None,
            message: None,
        }
    }

    /// The write was rejected; `current` is what the store holds now.
    pub fn conflict(
        key: &EntityKey,
        conflict_type: ConflictType,
        current: Option<VersionedEntity>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: key.entity_type.clone(),
            entity_id: key.entity_id.clone(),
            status: PushStatus::Conflict,
            server_version: current.as_ref().map(|e| e.version),
            server_data: current,
            conflict_type: Some(conflict_type),
            message: Some(message.into()),
        }
    }

    /// The item failed for a non-conflict reason.
    pub fn error(key: &EntityKey, message: impl Into<String>) -> Self {
        Self {
            entity_type: key.entity_type.clone(),
            entity_id: key.entity_id.clone(),
            status: PushStatus::Error,
            server_version: None,
            server_data: None,
            conflict_type: None,
            message: Some(message.into()),
        }
    }

    /// Key of the entity this result refers to.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.entity_id.clone())
    }
}

/// Response data of the batch push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushResponse {
    pub results: Vec<PushResult>,
    pub server_time: Timestamp,
}

/// Body of the single-entity write used to resubmit merges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityWrite {
    pub data: serde_json::Value,
    pub client_version: Version,
}

// ============================================================================
// Pull
// ============================================================================

/// Position of the last change consumed by a pull.
///
/// Changes are ordered by `(updated_at, entity_type, entity_id)`, so the
/// cursor stays exact when several entities share a timestamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PullCursor {
    pub timestamp: Timestamp,
    pub entity_type: EntityType,
    pub entity_id: EntityId,
}

impl PullCursor {
    /// Cursor pointing at `change`.
    pub fn after(change: &PullChange) -> Self {
        Self {
            timestamp: change.updated_at,
            entity_type: change.entity_type.clone(),
            entity_id: change.entity_id.clone(),
        }
    }
}

/// Pull request as sent in the query string.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullQuery {
    /// Timestamp part of the cursor (0 or absent for a first pull)
    #[serde(default)]
    pub since: Option<Timestamp>,
    #[serde(default)]
    pub after_type: Option<EntityType>,
    #[serde(default)]
    pub after_id: Option<EntityId>,
    /// Comma separated entity types
    #[serde(default)]
    pub entity_types: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl PullQuery {
    /// Build a query from a cursor and tracked entity types.
    pub fn new(cursor: Option<&PullCursor>, entity_types: &[EntityType], limit: u32) -> Self {
        Self {
            since: cursor.map(|c| c.timestamp),
            after_type: cursor.map(|c| c.entity_type.clone()),
            after_id: cursor.map(|c| c.entity_id.clone()),
            entity_types: if entity_types.is_empty() {
                None
            } else {
                Some(entity_types.join(","))
            },
            limit: Some(limit),
        }
    }

    /// The cursor encoded in this query, if complete.
    pub fn cursor(&self) -> Option<PullCursor> {
        match (self.since, &self.after_type, &self.after_id) {
            (Some(timestamp), Some(entity_type), Some(entity_id)) => Some(PullCursor {
                timestamp,
                entity_type: entity_type.clone(),
                entity_id: entity_id.clone(),
            }),
            _ => None,
        }
    }

    /// Requested entity types; empty means all.
    pub fn entity_types(&self) -> Vec<EntityType> {
        self.entity_types
            .as_deref()
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Query string pairs.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(since) = self.since {
            pairs.push(("since", since.to_string()));
        }
        if let Some(t) = &self.after_type {
            pairs.push(("after_type", t.clone()));
        }
        if let Some(id) = &self.after_id {
            pairs.push(("after_id", id.clone()));
        }
        if let Some(types) = &self.entity_types {
            pairs.push(("entity_types", types.clone()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }
}

/// One changed entity in a pull response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullChange {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
    pub data: serde_json::Value,
    pub data_version: Version,
    pub updated_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
}

impl PullChange {
    /// Key of the changed entity.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.entity_id.clone())
    }

    /// Convert into a cacheable entity.
    pub fn to_entity(&self) -> VersionedEntity {
        VersionedEntity {
            id: self.entity_id.clone(),
            entity_type: self.entity_type.clone(),
            data: self.data.clone(),
            version: self.data_version,
            updated_at: self.updated_at,
            deleted_at: self.deleted_at,
        }
    }
}

impl From<&VersionedEntity> for PullChange {
    fn from(entity: &VersionedEntity) -> Self {
        Self {
            entity_type: entity.entity_type.clone(),
            entity_id: entity.id.clone(),
            data: entity.data.clone(),
            data_version: entity.version,
            updated_at: entity.updated_at,
            deleted_at: entity.deleted_at,
        }
    }
}

/// Response data of a pull.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullResponse {
    pub changes: Vec<PullChange>,
    pub server_time: Timestamp,
    pub has_more: bool,
}

// ============================================================================
// Full listing
// ============================================================================

/// Paged listing request used by full resynchronization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPageQuery {
    pub entity_type: EntityType,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub limit: Option<u32>,
}

impl EntityPageQuery {
    /// Query string pairs.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("entity_type", self.entity_type.clone()),
            ("offset", self.offset.to_string()),
        ];
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }
}

/// One page of active entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPage {
    pub entities: Vec<VersionedEntity>,
    pub has_more: bool,
}
