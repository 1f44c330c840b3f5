//! Change records for expressing local mutations.
//!
//! Local edits are not written to the cache directly. They are expressed as
//! change records, queued, and transmitted to the store during a push cycle.
//! A change derived from a cached entity carries that entity as its merge
//! base, so a later pull that refreshes the cache cannot move the base.

use crate::{EntityId, EntityKey, EntityType, Timestamp, Version, VersionedEntity};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a change.
pub type ChangeId = String;

/// Kind of mutation a change performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeAction::Create => write!(f, "create"),
            ChangeAction::Update => write!(f, "update"),
            ChangeAction::Delete => write!(f, "delete"),
        }
    }
}

/// A local mutation awaiting transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    /// Change ID, used by the store to recognise retransmissions
    pub change_id: ChangeId,
    /// Target entity type
    pub entity_type: EntityType,
    /// Target entity ID
    pub entity_id: EntityId,
    /// What the change does
    pub action: ChangeAction,
    /// Full replacement data (ignored for deletes)
    pub payload: serde_json::Value,
    /// Version the local edit was derived from. `None` for creates.
    pub base_version: Option<Version>,
    /// Snapshot at `base_version` the edit was made against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<VersionedEntity>,
    /// When the change was queued (milliseconds since epoch)
    pub enqueued_at: Timestamp,
}

impl ChangeRecord {
    /// Create a new change record.
    pub fn new(
        change_id: impl Into<ChangeId>,
        entity_type: impl Into<EntityType>,
        entity_id: impl Into<EntityId>,
        action: ChangeAction,
        payload: serde_json::Value,
        base_version: Option<Version>,
        enqueued_at: Timestamp,
    ) -> Self {
        Self {
            change_id: change_id.into(),
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            action,
            payload,
            base_version,
            base: None,
            enqueued_at,
        }
    }

    /// Attach the pre-edit snapshot. Ignored unless it is at `base_version`.
    pub fn with_base(mut self, base: VersionedEntity) -> Self {
        if self.base_version == Some(base.version) && base.key() == self.key() {
            self.base = Some(base);
        }
        self
    }

    /// Shorthand for a create.
    pub fn create(
        change_id: impl Into<ChangeId>,
        entity_type: impl Into<EntityType>,
        entity_id: impl Into<EntityId>,
        payload: serde_json::Value,
        enqueued_at: Timestamp,
    ) -> Self {
        Self::new(
            change_id,
            entity_type,
            entity_id,
            ChangeAction::Create,
            payload,
            None,
            enqueued_at,
        )
    }

    /// Shorthand for an update derived from `base_version`.
    pub fn update(
        change_id: impl Into<ChangeId>,
        entity_type: impl Into<EntityType>,
        entity_id: impl Into<EntityId>,
        payload: serde_json::Value,
        base_version: Version,
        enqueued_at: Timestamp,
    ) -> Self {
        Self::new(
            change_id,
            entity_type,
            entity_id,
            ChangeAction::Update,
            payload,
            Some(base_version),
            enqueued_at,
        )
    }

    /// Shorthand for a delete of `base_version`.
    pub fn delete(
        change_id: impl Into<ChangeId>,
        entity_type: impl Into<EntityType>,
        entity_id: impl Into<EntityId>,
        base_version: Version,
        enqueued_at: Timestamp,
    ) -> Self {
        Self::new(
            change_id,
            entity_type,
            entity_id,
            ChangeAction::Delete,
            serde_json::Value::Null,
            Some(base_version),
            enqueued_at,
        )
    }

    /// Key of the target entity.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.entity_type.clone(), self.entity_id.clone())
    }
}
