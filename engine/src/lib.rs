//! # Ferry Engine
//!
//! The IO-free core of the Ferry data-synchronization engine.
//!
//! A client keeps a local cache of server-confirmed entities and a queue of
//! local changes. Changes are pushed to an authoritative store that guards
//! every write with a per-entity version (optimistic concurrency). Rejected
//! writes are classified and either merged against the snapshot the edit was
//! derived from or resolved in the server's favour. Server changes are then pulled since a
//! cursor and reconciled into the cache.
//!
//! This crate holds the pieces of that flow that need no runtime, so they are
//! deterministic and testable without a network.
//!
//! ## Core Concepts
//!
//! ### Entities
//!
//! A [`VersionedEntity`] carries a JSON payload, a version that starts at 1
//! and grows by one per write, and an optional tombstone. Deletes are soft.
//!
//! ### Changes
//!
//! Local edits are expressed as [`ChangeRecord`]s and buffered in the FIFO
//! [`ChangeQueue`], which hands out bounded batches and takes failed batches
//! back at its head.
//!
//! ### Conflicts
//!
//! [`ConflictKind::classify`] maps the store's conflict type to a kind and
//! [`plan_resolution`] decides what to do. Version conflicts are merged with
//! [`three_way_merge`], guided by a per-entity-type merge [`Schema`].
//!
//! ### Reconciliation
//!
//! [`apply_pull`] folds pulled server changes into any [`LocalCache`].
//!
//! ### Store contract
//!
//! [`VersionedStore`] is an in-memory implementation of the compare-and-swap
//! rules the server enforces.
//!
//! ## Quick Start
//!
//! ```rust
//! use ferry_engine::{
//!     apply_pull, ChangeRecord, MemoryCache, PullQuery, PushItem, VersionedStore,
//! };
//! use serde_json::json;
//!
//! let mut store = VersionedStore::new();
//! let cache = MemoryCache::default();
//!
//! // Push a create
//! let change = ChangeRecord::create("c-1", "estimate", "e-1", json!({"paxCount": 2}), 1000);
//! let result = store.apply(&PushItem::from(&change), 1000);
//! assert_eq!(result.server_version, Some(1));
//!
//! // Pull it back into the cache
//! let pulled = store.changes_since(&PullQuery::new(None, &[], 100), 1001);
//! let outcome = apply_pull(&cache, &pulled.changes, 1001);
//! assert_eq!(outcome.inserted, 1);
//! assert_eq!(cache.len(), 1);
//! ```
//!
//! ## Persistence
//!
//! Use [`CacheSnapshot::capture`] and [`CacheSnapshot::restore`] to persist a
//! [`MemoryCache`] and its [`ChangeQueue`]. Snapshots serialize to JSON with
//! deterministic ordering.

pub mod cache;
pub mod change;
pub mod conflict;
pub mod entity;
pub mod error;
pub mod merge;
pub mod protocol;
pub mod queue;
pub mod reconcile;
pub mod schema;
pub mod snapshot;
pub mod store;

// Re-export main types at crate root
pub use cache::{
    CacheEntry, LocalCache, MemoryCache, SyncMetadata, SyncStatus, DEFAULT_CAPACITY,
    DEFAULT_MAX_AGE_MS,
};
pub use change::{ChangeAction, ChangeId, ChangeRecord};
pub use conflict::{
    apply_plan, plan_resolution, ConflictKind, ConflictReport, Resolution, ResolutionPlan,
};
pub use entity::{EntityKey, VersionedEntity};
pub use error::Error;
pub use merge::{merge_keyed_list, three_way_merge};
pub use protocol::{
    ApiResponse, ConflictType, EntityPage, EntityPageQuery, EntityWrite, PullChange, PullCursor,
    PullQuery, PullResponse, PushItem, PushRequest, PushResponse, PushResult, PushStatus,
};
pub use queue::{ChangeQueue, DEFAULT_BATCH_SIZE};
pub use reconcile::{advance_cursor, apply_pull, PullOutcome};
pub use schema::{EntitySchema, FieldDef, FieldKind, Schema};
pub use snapshot::{CacheSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use store::{rejection, Collection, VersionedStore};

/// Type aliases for clarity
pub type EntityId = String;
pub type EntityType = String;
pub type Version = u64;
pub type Timestamp = u64;
