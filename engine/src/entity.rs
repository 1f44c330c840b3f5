//! Versioned entity types shared by the cache, the store and the wire protocol.

use crate::{EntityId, EntityType, Timestamp, Version};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies an entity across all entity types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey {
    pub entity_type: EntityType,
    pub entity_id: EntityId,
}

impl EntityKey {
    /// Create a new key.
    pub fn new(entity_type: impl Into<EntityType>, entity_id: impl Into<EntityId>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
        }
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// An entity as known to the authoritative store.
///
/// `version` starts at 1 and increases by exactly one per successful write.
/// A soft-deleted entity keeps its last version and carries `deleted_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedEntity {
    pub id: EntityId,
    pub entity_type: EntityType,
    pub data: serde_json::Value,
    pub version: Version,
    /// When the entity was last written (milliseconds since epoch)
    pub updated_at: Timestamp,
    /// Tombstone timestamp, set by a soft delete
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<Timestamp>,
}

impl VersionedEntity {
    /// Create a freshly written entity at version 1.
    pub fn new(
        entity_type: impl Into<EntityType>,
        id: impl Into<EntityId>,
        data: serde_json::Value,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            data,
            version: 1,
            updated_at: timestamp,
            deleted_at: None,
        }
    }

    /// Key of this entity.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.id.clone())
    }

    /// Check if entity is active (not tombstoned).
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    /// Replace the data and bump the version.
    pub fn update_data(&mut self, data: serde_json::Value, timestamp: Timestamp) {
        self.data = data;
        self.version += 1;
        self.updated_at = timestamp;
    }

    /// Soft-delete: set the tombstone and bump the version once.
    pub fn mark_deleted(&mut self, timestamp: Timestamp) {
        self.deleted_at = Some(timestamp);
        self.version += 1;
        self.updated_at = timestamp;
    }
}
