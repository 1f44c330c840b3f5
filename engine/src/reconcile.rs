//! Pull reconciliation.
//!
//! Server changes pulled since the last cursor are folded into the local
//! cache. The server is authoritative here, so there is no conflict handling:
//! a change either replaces what the cache holds or is ignored.
//!
//! # Algorithm
//!
//! For each change, in server order:
//!
//! 1. Tombstone: evict the entity (a tombstone is never inserted)
//! 2. Not cached: insert it if its entity type has room
//! 3. Cached with a strictly lower version: overwrite
//! 4. Otherwise: leave the cache alone
//!
//! Capacity is checked at the moment a change is applied, so whether an
//! insert fits depends on the evictions that came before it in server order.
//! While capacity does not bind, applying the same page twice leaves the
//! cache as after the first time.

use crate::cache::LocalCache;
use crate::protocol::{PullChange, PullCursor};
use crate::Timestamp;
use serde::{Deserialize, Serialize};

/// What a pull did to the cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullOutcome {
    pub inserted: usize,
    pub updated: usize,
    pub removed: usize,
    pub skipped: usize,
}

impl PullOutcome {
    /// Number of changes examined.
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.removed + self.skipped
    }

    /// Accumulate another page's outcome.
    pub fn absorb(&mut self, other: PullOutcome) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.removed += other.removed;
        self.skipped += other.skipped;
    }
}

/// Apply pulled changes to the cache.
pub fn apply_pull<C: LocalCache + ?Sized>(
    cache: &C,
    changes: &[PullChange],
    now: Timestamp,
) -> PullOutcome {
    let mut outcome = PullOutcome::default();

    for change in changes {
        if change.deleted_at.is_some() {
            if cache.remove_cached_item(&change.key()) {
                outcome.removed += 1;
            } else {
                outcome.skipped += 1;
            }
            continue;
        }

        match cache.get_cached_item(&change.key()) {
            None => {
                if cache.add_to_cache_if_space(change.to_entity(), now) {
                    outcome.inserted += 1;
                } else {
                    outcome.skipped += 1;
                }
            }
            Some(cached) if change.data_version > cached.version => {
                cache.update_cached_item(change.to_entity(), now);
                outcome.updated += 1;
            }
            Some(_) => outcome.skipped += 1,
        }
    }

    outcome
}

/// Cursor after consuming `changes`, or `current` if there were none.
pub fn advance_cursor(current: Option<PullCursor>, changes: &[PullChange]) -> Option<PullCursor> {
    match changes.last() {
        Some(last) => {
            let next = PullCursor::after(last);
            match current {
                Some(current) if current > next => Some(current),
                _ => Some(next),
            }
        }
        None => current,
    }
}
