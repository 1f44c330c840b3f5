//! Conflict classification and resolution planning.
//!
//! A rejected push result is classified from the store's `conflict_type` and
//! turned into a [`ResolutionPlan`]. Plans that only touch the cache are
//! applied here with [`apply_plan`]; a [`ResolutionPlan::Resubmit`] needs the
//! network and is executed by the client, which falls back to
//! [`ResolutionPlan::fallback`] when the resubmission does not succeed.

use crate::cache::LocalCache;
use crate::merge::three_way_merge;
use crate::protocol::{ConflictType, PushResult};
use crate::{ChangeRecord, EntityKey, Schema, Timestamp, Version, VersionedEntity};
use serde::{Deserialize, Serialize};

/// Kind of write-write conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConflictKind {
    VersionConflict,
    DeleteConflict,
    PermissionConflict,
    Unknown,
}

impl ConflictKind {
    /// Classify a store-reported conflict type. Missing means unknown.
    pub fn classify(conflict_type: Option<&ConflictType>) -> Self {
        match conflict_type {
            Some(ConflictType::VersionMismatch) => ConflictKind::VersionConflict,
            Some(ConflictType::Deleted) => ConflictKind::DeleteConflict,
            Some(ConflictType::PermissionDenied) => ConflictKind::PermissionConflict,
            Some(ConflictType::Other) | None => ConflictKind::Unknown,
        }
    }
}

/// A local change the store rejected, with the store's current state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictReport {
    pub kind: ConflictKind,
    pub local_change: ChangeRecord,
    pub server_snapshot: Option<VersionedEntity>,
}

impl ConflictReport {
    /// Build a report from the change and its conflict result.
    pub fn new(local_change: ChangeRecord, result: &PushResult) -> Self {
        Self {
            kind: ConflictKind::classify(result.conflict_type.as_ref()),
            local_change,
            server_snapshot: result.server_data.clone(),
        }
    }

    /// Key of the conflicting entity.
    pub fn key(&self) -> EntityKey {
        self.local_change.key()
    }
}

/// What to do about a conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum ResolutionPlan {
    /// Write `merged` back to the store, expecting `client_version`.
    Resubmit {
        key: EntityKey,
        merged: serde_json::Value,
        client_version: Version,
        server: VersionedEntity,
    },
    /// Replace the cached entity with the server's, if known.
    AcceptServer {
        key: EntityKey,
        server: Option<VersionedEntity>,
    },
    /// Drop the entity from the cache.
    Evict(EntityKey),
    /// Drop the local edit and leave the cache alone.
    Discard(EntityKey),
}

impl ResolutionPlan {
    /// Plan to use when a resubmission fails.
    pub fn fallback(self) -> Self {
        match self {
            ResolutionPlan::Resubmit { key, server, .. } => ResolutionPlan::AcceptServer {
                key,
                server: Some(server),
            },
            other => other,
        }
    }
}

/// How a conflict ended up being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    /// The merged payload was accepted at this version
    Merged { version: Version },
    AcceptedServer,
    Evicted,
    Discarded,
    /// Needs a resubmission before it is settled
    Deferred,
}

/// Decide how to resolve a conflict.
///
/// `base` is the snapshot the local edit was derived from. It only counts when
/// it is at the change's `base_version`: a newer snapshot would make the
/// server's edits look like local ones. A version conflict is merged only when
/// the base and the server state are both known and all three payloads are
/// objects; otherwise the server wins.
pub fn plan_resolution(
    report: &ConflictReport,
    base: Option<&VersionedEntity>,
    schema: &Schema,
) -> ResolutionPlan {
    let key = report.key();

    match report.kind {
        ConflictKind::DeleteConflict => ResolutionPlan::Evict(key),
        ConflictKind::PermissionConflict => ResolutionPlan::Discard(key),
        ConflictKind::Unknown => ResolutionPlan::AcceptServer {
            key,
            server: report.server_snapshot.clone(),
        },
        ConflictKind::VersionConflict => {
            let base = base.filter(|b| Some(b.version) == report.local_change.base_version);
            let (Some(base), Some(server)) = (base, report.server_snapshot.as_ref()) else {
                return ResolutionPlan::AcceptServer {
                    key,
                    server: report.server_snapshot.clone(),
                };
            };

            match three_way_merge(
                schema,
                &key.entity_type,
                &base.data,
                &report.local_change.payload,
                &server.data,
            ) {
                Some(merged) => ResolutionPlan::Resubmit {
                    key,
                    merged,
                    client_version: server.version,
                    server: server.clone(),
                },
                None => ResolutionPlan::AcceptServer {
                    key,
                    server: Some(server.clone()),
                },
            }
        }
    }
}

/// Apply a cache-only plan.
///
/// Accepting a tombstone evicts the entity; accepting without server data
/// leaves the cache as it is.
pub fn apply_plan<C: LocalCache + ?Sized>(
    cache: &C,
    plan: &ResolutionPlan,
    now: Timestamp,
) -> Resolution {
    match plan {
        ResolutionPlan::Resubmit { .. } => Resolution::Deferred,
        ResolutionPlan::AcceptServer { key, server } => {
            match server {
                Some(entity) if entity.is_active() => {
                    cache.update_cached_item(entity.clone(), now);
                }
                Some(_) => {
                    cache.remove_cached_item(key);
                }
                None => {}
            }
            Resolution::AcceptedServer
        }
        ResolutionPlan::Evict(key) => {
            cache.remove_cached_item(key);
            Resolution::Evicted
        }
        ResolutionPlan::Discard(_) => Resolution::Discarded,
    }
}
