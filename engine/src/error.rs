//! Error types for the Ferry engine.

use crate::{EntityId, EntityType, Version};
use thiserror::Error;

/// All possible errors from the Ferry engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Lookup errors
    #[error("entity not found: {entity_type}/{entity_id}")]
    EntityNotFound {
        entity_type: EntityType,
        entity_id: EntityId,
    },

    #[error("entity already exists: {entity_type}/{entity_id}")]
    EntityAlreadyExists {
        entity_type: EntityType,
        entity_id: EntityId,
    },

    // Write errors
    #[error("version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: Version, actual: Version },

    #[error("write on deleted entity: {entity_type}/{entity_id}")]
    EntityDeleted {
        entity_type: EntityType,
        entity_id: EntityId,
    },

    #[error("entity type is read-only: {0}")]
    PermissionDenied(EntityType),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
