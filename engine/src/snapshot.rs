//! Snapshot types for persisting and restoring client state.
//!
//! A snapshot captures everything a client needs to resume after a restart:
//! the cached entities, the sync metadata (including the pull cursor) and the
//! changes still waiting to be pushed. Serialization is deterministic.

use crate::cache::{CacheEntry, MemoryCache, SyncMetadata};
use crate::{error::Result, ChangeQueue, EntityId, EntityType, Error};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time snapshot of a client's local state.
///
/// Uses BTreeMap instead of HashMap for deterministic serialization order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheSnapshot {
    /// Snapshot format version
    pub format_version: u32,
    /// Cached entities by entity type, then by entity ID
    pub entries: BTreeMap<EntityType, BTreeMap<EntityId, CacheEntry>>,
    /// Metadata of the last sync cycle
    pub metadata: SyncMetadata,
    /// Changes not yet pushed
    pub queue: ChangeQueue,
}

impl Default for CacheSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheSnapshot {
    /// Create a new empty snapshot.
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            entries: BTreeMap::new(),
            metadata: SyncMetadata::default(),
            queue: ChangeQueue::new(),
        }
    }

    /// Capture a cache and a queue.
    pub fn capture(cache: &MemoryCache, queue: &ChangeQueue) -> Self {
        let mut snapshot = Self::new();
        for entry in cache.entries() {
            snapshot.add_entry(entry);
        }
        snapshot.metadata = crate::LocalCache::sync_metadata(cache);
        snapshot.queue = queue.clone();
        snapshot
    }

    /// Load the cached part into `cache`, replacing its contents, and hand
    /// back the queued changes.
    pub fn restore(self, cache: &MemoryCache) -> ChangeQueue {
        let entries = self
            .entries
            .into_values()
            .flat_map(BTreeMap::into_values)
            .collect();
        cache.load(entries, self.metadata);
        self.queue
    }

    /// Add a cache entry.
    pub fn add_entry(&mut self, entry: CacheEntry) {
        self.entries
            .entry(entry.entity.entity_type.clone())
            .or_default()
            .insert(entry.entity.id.clone(), entry);
    }

    /// Count cached entities.
    pub fn entity_count(&self) -> usize {
        self.entries.values().map(|e| e.len()).sum()
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}
