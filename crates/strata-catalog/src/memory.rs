//! In-memory catalog for testing
//!
//! Mirrors the durable contract over plain maps and supports scripted
//! failure injection so engine tests can exercise rollback semantics.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;

use strata_core::traits::BinlogsIncrement;
use strata_core::{
    Catalog, CollectionId, IndexMeta, MetaError, MetaResult, PartitionId, SegmentId,
    SegmentIndexMeta, SegmentRecord, StreamPosition,
};

/// Operations a [`MemoryCatalog`] can be told to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogOp {
    AddSegment,
    AlterSegments,
    DropSegment,
    SaveDroppedSegmentsInBatch,
    MarkChannelDeleted,
    SaveChannelCheckpoint,
    DropChannelCheckpoint,
}

#[derive(Default)]
struct Inner {
    segments: HashMap<SegmentId, SegmentRecord>,
    checkpoints: HashMap<String, StreamPosition>,
    deleted_channels: HashSet<String>,
    indexes: Vec<IndexMeta>,
    segment_indexes: Vec<SegmentIndexMeta>,
    fail_next: Vec<CatalogOp>,
}

/// In-memory catalog.
pub struct MemoryCatalog {
    inner: Mutex<Inner>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Makes the next invocation of `op` fail with a catalog error.
    pub fn fail_next(&self, op: CatalogOp) {
        self.inner.lock().fail_next.push(op);
    }

    /// Seeds index definitions for reload tests.
    pub fn seed_indexes(&self, indexes: Vec<IndexMeta>) {
        self.inner.lock().indexes = indexes;
    }

    /// Seeds per-segment index builds for reload tests.
    pub fn seed_segment_indexes(&self, segment_indexes: Vec<SegmentIndexMeta>) {
        self.inner.lock().segment_indexes = segment_indexes;
    }

    /// Number of persisted segment records.
    #[must_use]
    pub fn segment_count(&self) -> usize {
        self.inner.lock().segments.len()
    }

    /// A copy of the persisted record, if any.
    #[must_use]
    pub fn persisted_segment(&self, id: SegmentId) -> Option<SegmentRecord> {
        self.inner.lock().segments.get(&id).cloned()
    }

    fn take_failure(&self, op: CatalogOp) -> bool {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.fail_next.iter().position(|o| *o == op) {
            inner.fail_next.remove(idx);
            true
        } else {
            false
        }
    }

    fn injected(op: CatalogOp) -> MetaError {
        MetaError::Catalog(format!("injected failure: {op:?}"))
    }
}

impl Default for MemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn list_segments(&self) -> MetaResult<Vec<SegmentRecord>> {
        Ok(self.inner.lock().segments.values().cloned().collect())
    }

    async fn add_segment(&self, segment: &SegmentRecord) -> MetaResult<()> {
        if self.take_failure(CatalogOp::AddSegment) {
            return Err(Self::injected(CatalogOp::AddSegment));
        }
        self.inner.lock().segments.insert(segment.id, segment.clone());
        Ok(())
    }

    async fn alter_segments(
        &self,
        segments: &[SegmentRecord],
        _increments: &[BinlogsIncrement],
    ) -> MetaResult<()> {
        if self.take_failure(CatalogOp::AlterSegments) {
            return Err(Self::injected(CatalogOp::AlterSegments));
        }
        let mut inner = self.inner.lock();
        for segment in segments {
            inner.segments.insert(segment.id, segment.clone());
        }
        Ok(())
    }

    async fn drop_segment(&self, segment: &SegmentRecord) -> MetaResult<()> {
        if self.take_failure(CatalogOp::DropSegment) {
            return Err(Self::injected(CatalogOp::DropSegment));
        }
        self.inner.lock().segments.remove(&segment.id);
        Ok(())
    }

    async fn save_dropped_segments_in_batch(&self, segments: &[SegmentRecord]) -> MetaResult<()> {
        if self.take_failure(CatalogOp::SaveDroppedSegmentsInBatch) {
            return Err(Self::injected(CatalogOp::SaveDroppedSegmentsInBatch));
        }
        let mut inner = self.inner.lock();
        for segment in segments {
            inner.segments.insert(segment.id, segment.clone());
        }
        Ok(())
    }

    async fn mark_channel_deleted(&self, channel: &str) -> MetaResult<()> {
        if self.take_failure(CatalogOp::MarkChannelDeleted) {
            return Err(Self::injected(CatalogOp::MarkChannelDeleted));
        }
        self.inner.lock().deleted_channels.insert(channel.to_string());
        Ok(())
    }

    async fn is_channel_deleted(&self, channel: &str) -> MetaResult<bool> {
        Ok(self.inner.lock().deleted_channels.contains(channel))
    }

    async fn list_channel_checkpoints(&self) -> MetaResult<HashMap<String, StreamPosition>> {
        Ok(self.inner.lock().checkpoints.clone())
    }

    async fn save_channel_checkpoint(&self, channel: &str, pos: &StreamPosition) -> MetaResult<()> {
        if self.take_failure(CatalogOp::SaveChannelCheckpoint) {
            return Err(Self::injected(CatalogOp::SaveChannelCheckpoint));
        }
        self.inner
            .lock()
            .checkpoints
            .insert(channel.to_string(), pos.clone());
        Ok(())
    }

    async fn drop_channel_checkpoint(&self, channel: &str) -> MetaResult<()> {
        if self.take_failure(CatalogOp::DropChannelCheckpoint) {
            return Err(Self::injected(CatalogOp::DropChannelCheckpoint));
        }
        self.inner.lock().checkpoints.remove(channel);
        Ok(())
    }

    async fn list_indexes(&self) -> MetaResult<Vec<IndexMeta>> {
        Ok(self.inner.lock().indexes.clone())
    }

    async fn list_segment_indexes(&self) -> MetaResult<Vec<SegmentIndexMeta>> {
        Ok(self.inner.lock().segment_indexes.clone())
    }

    async fn gc_confirm(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
    ) -> MetaResult<bool> {
        let inner = self.inner.lock();
        Ok(!inner.segments.values().any(|s| {
            s.collection_id == collection_id && s.partition_id == partition_id
        }))
    }
}
