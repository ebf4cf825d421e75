//! Thread-safe segment map with secondary views.
//!
//! The store's own lock only provides reader/writer isolation for single
//! operations; the meta engine's write lock serializes mutations, so no
//! store method ever spans external I/O.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use strata_core::{Allocation, CollectionId, SegmentId, SegmentState};

use crate::entry::SegmentEntry;

#[derive(Default)]
struct StoreInner {
    segments: HashMap<SegmentId, Arc<SegmentEntry>>,
    by_collection: HashMap<CollectionId, HashSet<SegmentId>>,
    by_channel: HashMap<String, HashSet<SegmentId>>,
}

impl StoreInner {
    fn unlink(&mut self, entry: &SegmentEntry) {
        if let Some(ids) = self.by_collection.get_mut(&entry.record.collection_id) {
            ids.remove(&entry.record.id);
            if ids.is_empty() {
                self.by_collection.remove(&entry.record.collection_id);
            }
        }
        if let Some(ids) = self.by_channel.get_mut(&entry.record.insert_channel) {
            ids.remove(&entry.record.id);
            if ids.is_empty() {
                self.by_channel.remove(&entry.record.insert_channel);
            }
        }
    }

    fn link(&mut self, entry: &SegmentEntry) {
        self.by_collection
            .entry(entry.record.collection_id)
            .or_default()
            .insert(entry.record.id);
        self.by_channel
            .entry(entry.record.insert_channel.clone())
            .or_default()
            .insert(entry.record.id);
    }
}

/// Concurrent map from segment id to entry, with by-collection and
/// by-channel views.
#[derive(Default)]
pub struct SegmentStore {
    inner: RwLock<StoreInner>,
}

impl SegmentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an entry, maintaining the secondary views.
    pub fn set(&self, entry: SegmentEntry) {
        let mut inner = self.inner.write();
        if let Some(old) = inner.segments.remove(&entry.record.id) {
            inner.unlink(&old);
        }
        inner.link(&entry);
        inner.segments.insert(entry.record.id, Arc::new(entry));
    }

    /// Fetches an entry by id. The returned `Arc` is a snapshot; callers
    /// must not assume it stays current.
    #[must_use]
    pub fn get(&self, id: SegmentId) -> Option<Arc<SegmentEntry>> {
        self.inner.read().segments.get(&id).cloned()
    }

    /// Removes an entry.
    pub fn drop_segment(&self, id: SegmentId) {
        let mut inner = self.inner.write();
        if let Some(old) = inner.segments.remove(&id) {
            inner.unlink(&old);
        }
    }

    /// Snapshot of every entry. Callers must not mutate through the Arcs.
    #[must_use]
    pub fn get_segments(&self) -> Vec<Arc<SegmentEntry>> {
        self.inner.read().segments.values().cloned().collect()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().segments.len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.read().segments.is_empty()
    }

    /// Snapshot of entries matching `predicate` (linear scan under the
    /// read lock).
    #[must_use]
    pub fn select<P>(&self, predicate: P) -> Vec<Arc<SegmentEntry>>
    where
        P: Fn(&SegmentEntry) -> bool,
    {
        self.inner
            .read()
            .segments
            .values()
            .filter(|e| predicate(e))
            .cloned()
            .collect()
    }

    /// Ids of all segments of a collection.
    #[must_use]
    pub fn ids_of_collection(&self, collection_id: CollectionId) -> Vec<SegmentId> {
        self.inner
            .read()
            .by_collection
            .get(&collection_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Ids of all segments on a channel.
    #[must_use]
    pub fn ids_of_channel(&self, channel: &str) -> Vec<SegmentId> {
        self.inner
            .read()
            .by_channel
            .get(channel)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    fn mutate<F>(&self, id: SegmentId, f: F) -> bool
    where
        F: FnOnce(&mut SegmentEntry),
    {
        let mut inner = self.inner.write();
        let Some(current) = inner.segments.get(&id) else {
            return false;
        };
        let mut updated = SegmentEntry::clone(current);
        f(&mut updated);
        // channel and collection are immutable per segment, views stay valid
        inner.segments.insert(id, Arc::new(updated));
        true
    }

    /// Sets the lifecycle state.
    pub fn set_state(&self, id: SegmentId, state: SegmentState) {
        self.mutate(id, |e| e.record.state = state);
    }

    /// Replaces all allocations.
    pub fn set_allocations(&self, id: SegmentId, allocations: Vec<Allocation>) {
        self.mutate(id, |e| e.allocations = allocations);
    }

    /// Appends one allocation.
    pub fn add_allocation(&self, id: SegmentId, allocation: Allocation) {
        self.mutate(id, |e| e.allocations.push(allocation));
    }

    /// Sets the writer-reported running row count.
    pub fn set_current_rows(&self, id: SegmentId, rows: i64) {
        self.mutate(id, |e| e.curr_rows = rows);
    }

    /// Stamps the last flush time.
    pub fn set_flush_time(&self, id: SegmentId, at: DateTime<Utc>) {
        self.mutate(id, |e| e.last_flush_time = Some(at));
    }

    /// Marks or clears compaction participation.
    pub fn set_is_compacting(&self, id: SegmentId, compacting: bool) {
        self.mutate(id, |e| e.is_compacting = compacting);
    }

    /// Marks or clears the bulk-import flag.
    pub fn set_is_importing(&self, id: SegmentId, importing: bool) {
        self.mutate(id, |e| e.record.is_importing = importing);
    }
}
