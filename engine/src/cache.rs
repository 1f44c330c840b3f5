//! Local cache collaborator.
//!
//! The cache holds the last server-confirmed state of each entity the client
//! knows about, plus the sync metadata of the last cycle. Queued changes take
//! their merge base from it, and pull reconciliation writes into it.
//!
//! Capacity is bounded per entity type. When a type is full, new entities are
//! simply not cached; nothing already cached is evicted to make room.

use crate::protocol::PullCursor;
use crate::{EntityKey, EntityType, Timestamp, VersionedEntity};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Default number of entities cached per entity type.
pub const DEFAULT_CAPACITY: usize = 500;

/// Cached entities older than this are removed by cleanup (7 days).
pub const DEFAULT_MAX_AGE_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Outcome of the last sync cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Never,
    Success,
    Error,
}

/// Bookkeeping written at the end of every cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<Timestamp>,
    #[serde(default)]
    pub status: SyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Position of the last change consumed by a pull
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<PullCursor>,
}

impl SyncMetadata {
    /// Metadata for a cycle that completed.
    pub fn succeeded(at: Timestamp, cursor: Option<PullCursor>) -> Self {
        Self {
            last_sync_at: Some(at),
            status: SyncStatus::Success,
            last_error: None,
            cursor,
        }
    }

    /// Metadata for a cycle that failed. The cursor is whatever the pull
    /// managed to consume before the failure.
    pub fn failed(at: Timestamp, error: impl Into<String>, cursor: Option<PullCursor>) -> Self {
        Self {
            last_sync_at: Some(at),
            status: SyncStatus::Error,
            last_error: Some(error.into()),
            cursor,
        }
    }
}

/// A cached entity with the time it entered the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub entity: VersionedEntity,
    pub cached_at: Timestamp,
}

/// Storage for server-confirmed entity snapshots.
///
/// Methods take `&self`; implementations use interior mutability so a cache
/// can be shared between the coordinator and the application.
pub trait LocalCache: Send + Sync {
    /// Cached snapshot of an entity.
    fn get_cached_item(&self, key: &EntityKey) -> Option<VersionedEntity>;

    /// Overwrite an entity, or add it if there is space. Returns whether the
    /// entity is cached afterwards.
    fn update_cached_item(&self, entity: VersionedEntity, now: Timestamp) -> bool;

    /// Remove an entity. Returns whether it was cached.
    fn remove_cached_item(&self, key: &EntityKey) -> bool;

    /// Add an entity not yet cached if its type has room.
    fn add_to_cache_if_space(&self, entity: VersionedEntity, now: Timestamp) -> bool;

    /// Cursor of the last pull.
    fn get_last_sync_timestamp(&self) -> Option<PullCursor>;

    /// Record the outcome of a cycle.
    fn update_sync_metadata(&self, metadata: SyncMetadata);

    /// Current sync metadata.
    fn sync_metadata(&self) -> SyncMetadata;

    /// Drop every entity except those of the given types. Metadata survives.
    fn clear_cache_except(&self, keep: &[EntityType]);

    /// Remove entities cached before `now - max_age_ms`, except `protected`
    /// keys. Returns the number removed.
    fn evict_stale(
        &self,
        max_age_ms: u64,
        now: Timestamp,
        protected: &BTreeSet<EntityKey>,
    ) -> usize;
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<EntityKey, CacheEntry>,
    counts: HashMap<EntityType, usize>,
    metadata: SyncMetadata,
}

impl CacheState {
    fn insert(&mut self, key: EntityKey, entry: CacheEntry) {
        if self.entries.insert(key.clone(), entry).is_none() {
            *self.counts.entry(key.entity_type).or_default() += 1;
        }
    }

    fn remove(&mut self, key: &EntityKey) -> bool {
        if self.entries.remove(key).is_none() {
            return false;
        }
        if let Some(count) = self.counts.get_mut(&key.entity_type) {
            *count = count.saturating_sub(1);
        }
        true
    }
}

/// In-memory cache with per-entity-type capacity.
#[derive(Debug)]
pub struct MemoryCache {
    state: RwLock<CacheState>,
    default_capacity: usize,
    capacities: HashMap<EntityType, usize>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MemoryCache {
    /// Create a cache holding up to `default_capacity` entities per type.
    pub fn new(default_capacity: usize) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            default_capacity,
            capacities: HashMap::new(),
        }
    }

    /// Override the capacity of one entity type.
    pub fn with_capacity(mut self, entity_type: impl Into<EntityType>, capacity: usize) -> Self {
        self.capacities.insert(entity_type.into(), capacity);
        self
    }

    /// Capacity of an entity type.
    pub fn capacity(&self, entity_type: &str) -> usize {
        self.capacities
            .get(entity_type)
            .copied()
            .unwrap_or(self.default_capacity)
    }

    /// Total number of cached entities.
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    /// Check if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of cached entities of one type.
    pub fn count(&self, entity_type: &str) -> usize {
        self.state
            .read()
            .counts
            .get(entity_type)
            .copied()
            .unwrap_or(0)
    }

    /// All entries, ordered by key.
    pub fn entries(&self) -> Vec<CacheEntry> {
        let state = self.state.read();
        let mut entries: Vec<CacheEntry> = state.entries.values().cloned().collect();
        entries.sort_by(|a, b| a.entity.key().cmp(&b.entity.key()));
        entries
    }

    /// Replace the whole contents. Capacity is not enforced.
    pub fn load(&self, entries: Vec<CacheEntry>, metadata: SyncMetadata) {
        let mut state = self.state.write();
        *state = CacheState::default();
        for entry in entries {
            state.insert(entry.entity.key(), entry);
        }
        state.metadata = metadata;
    }

    fn has_space(&self, state: &CacheState, entity_type: &str) -> bool {
        state.counts.get(entity_type).copied().unwrap_or(0) < self.capacity(entity_type)
    }
}

impl LocalCache for MemoryCache {
    fn get_cached_item(&self, key: &EntityKey) -> Option<VersionedEntity> {
        self.state.read().entries.get(key).map(|e| e.entity.clone())
    }

    fn update_cached_item(&self, entity: VersionedEntity, now: Timestamp) -> bool {
        let key = entity.key();
        let mut state = self.state.write();
        if !state.entries.contains_key(&key) && !self.has_space(&state, &key.entity_type) {
            return false;
        }
        state.insert(
            key,
            CacheEntry {
                entity,
                cached_at: now,
            },
        );
        true
    }

    fn remove_cached_item(&self, key: &EntityKey) -> bool {
        self.state.write().remove(key)
    }

    fn add_to_cache_if_space(&self, entity: VersionedEntity, now: Timestamp) -> bool {
        let key = entity.key();
        let mut state = self.state.write();
        if state.entries.contains_key(&key) || !self.has_space(&state, &key.entity_type) {
            return false;
        }
        state.insert(
            key,
            CacheEntry {
                entity,
                cached_at: now,
            },
        );
        true
    }

    fn get_last_sync_timestamp(&self) -> Option<PullCursor> {
        self.state.read().metadata.cursor.clone()
    }

    fn update_sync_metadata(&self, metadata: SyncMetadata) {
        self.state.write().metadata = metadata;
    }

    fn sync_metadata(&self) -> SyncMetadata {
        self.state.read().metadata.clone()
    }

    fn clear_cache_except(&self, keep: &[EntityType]) {
        let mut state = self.state.write();
        state.entries.retain(|key, _| keep.contains(&key.entity_type));
        state.counts.retain(|entity_type, _| keep.contains(entity_type));
    }

    fn evict_stale(
        &self,
        max_age_ms: u64,
        now: Timestamp,
        protected: &BTreeSet<EntityKey>,
    ) -> usize {
        let cutoff = now.saturating_sub(max_age_ms);
        let mut state = self.state.write();

        let stale: Vec<EntityKey> = state
            .entries
            .iter()
            .filter(|(key, entry)| entry.cached_at < cutoff && !protected.contains(*key))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &stale {
            state.remove(key);
        }
        stale.len()
    }
}
