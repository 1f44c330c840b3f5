//! ChangeQueue - ordered buffer of changes awaiting a push cycle.

use crate::{ChangeRecord, EntityKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};

/// Default number of changes transmitted per push.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// FIFO queue of not-yet-transmitted changes.
///
/// Batches are taken from the head. A batch whose transmission failed is put
/// back at the head, so a retry keeps its position ahead of changes queued
/// in the meantime.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeQueue {
    changes: VecDeque<ChangeRecord>,
}

impl ChangeQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            changes: VecDeque::new(),
        }
    }

    /// Append a change to the tail.
    pub fn enqueue(&mut self, change: ChangeRecord) {
        self.changes.push_back(change);
    }

    /// Remove up to `max` changes from the head.
    pub fn take_batch(&mut self, max: usize) -> Vec<ChangeRecord> {
        let n = max.min(self.changes.len());
        self.changes.drain(..n).collect()
    }

    /// Put a batch back at the head, preserving its internal order.
    pub fn requeue_front(&mut self, batch: Vec<ChangeRecord>) {
        for change in batch.into_iter().rev() {
            self.changes.push_front(change);
        }
    }

    /// Number of queued changes.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Check if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Iterate in transmission order.
    pub fn iter(&self) -> impl Iterator<Item = &ChangeRecord> {
        self.changes.iter()
    }

    /// Keys of every entity with at least one queued change.
    pub fn pending_keys(&self) -> BTreeSet<EntityKey> {
        self.changes.iter().map(ChangeRecord::key).collect()
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.changes.clear();
    }
}
