use async_trait::async_trait;
use std::collections::HashMap;

use crate::compaction::{
    CompactionPlan, CompactionPlanResult, CompactionSignal, CompactionTask, PlanAck,
};
use crate::collection::CollectionInfo;
use crate::error::MetaResult;
use crate::ids::{CollectionId, PartitionId, PlanId};
use crate::index::{IndexMeta, SegmentIndexMeta};
use crate::segment::{SegmentRecord, StreamPosition};

/// A segment whose binlog listing grew within the current transaction. The
/// catalog uses the annotation to index the segment's logs alongside the
/// record write.
#[derive(Debug, Clone)]
pub struct BinlogsIncrement {
    pub segment: SegmentRecord,
}

/// Durable catalog for control-plane metadata.
///
/// The catalog provides linearizable single-key writes and atomic batched
/// multi-key writes. Every error is fatal to the calling operation: the
/// engine never installs in-memory state for a failed write.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Returns every persisted segment record.
    async fn list_segments(&self) -> MetaResult<Vec<SegmentRecord>>;

    /// Persists a newly created segment record.
    async fn add_segment(&self, segment: &SegmentRecord) -> MetaResult<()>;

    /// Atomically rewrites a batch of segment records, optionally carrying
    /// binlog-increment annotations for log indexing.
    async fn alter_segments(
        &self,
        segments: &[SegmentRecord],
        increments: &[BinlogsIncrement],
    ) -> MetaResult<()>;

    /// Removes a segment record.
    async fn drop_segment(&self, segment: &SegmentRecord) -> MetaResult<()>;

    /// Atomically persists a batch of dropped segment records.
    async fn save_dropped_segments_in_batch(&self, segments: &[SegmentRecord]) -> MetaResult<()>;

    /// Marks a virtual channel as deleted.
    async fn mark_channel_deleted(&self, channel: &str) -> MetaResult<()>;

    /// Whether a channel carries the deletion marker.
    async fn is_channel_deleted(&self, channel: &str) -> MetaResult<bool>;

    /// Returns every persisted channel checkpoint.
    async fn list_channel_checkpoints(&self) -> MetaResult<HashMap<String, StreamPosition>>;

    /// Persists one channel checkpoint.
    async fn save_channel_checkpoint(&self, channel: &str, pos: &StreamPosition) -> MetaResult<()>;

    /// Removes one channel checkpoint.
    async fn drop_channel_checkpoint(&self, channel: &str) -> MetaResult<()>;

    /// Returns every index definition.
    async fn list_indexes(&self) -> MetaResult<Vec<IndexMeta>>;

    /// Returns every per-segment index build record.
    async fn list_segment_indexes(&self) -> MetaResult<Vec<SegmentIndexMeta>>;

    /// Whether garbage collection of the partition's blobs may proceed
    /// (no live records remain).
    async fn gc_confirm(
        &self,
        collection_id: CollectionId,
        partition_id: PartitionId,
    ) -> MetaResult<bool>;
}

/// Cluster-wide monotonic id and timestamp allocation.
#[async_trait]
pub trait Allocator: Send + Sync {
    /// Allocates one unique id.
    async fn alloc_id(&self) -> MetaResult<i64>;

    /// Allocates one cluster timestamp.
    async fn alloc_timestamp(&self) -> MetaResult<u64>;
}

/// Source of collection metadata (schema, partitions, properties).
#[async_trait]
pub trait CollectionHandler: Send + Sync {
    /// Fetches collection metadata by id.
    async fn get_collection(&self, collection_id: CollectionId) -> MetaResult<CollectionInfo>;
}

/// External executor of compaction plans.
#[async_trait]
pub trait CompactionHandler: Send + Sync {
    /// Accepts a plan for execution. The acknowledgement's status must be
    /// verified by the caller.
    async fn exec_compaction_plan(
        &self,
        signal: &CompactionSignal,
        plan: CompactionPlan,
    ) -> MetaResult<PlanAck>;

    /// Reports a finished plan result.
    async fn complete_compaction(&self, result: CompactionPlanResult) -> MetaResult<()>;

    /// Whether the execution pool has no free slot.
    fn is_full(&self) -> bool;

    /// Looks up a queued or running plan.
    fn get_compaction(&self, plan_id: PlanId) -> Option<CompactionTask>;

    /// Lists every plan spawned by one trigger signal.
    fn get_compaction_tasks_by_signal_id(&self, signal_id: i64) -> Vec<CompactionTask>;

    /// Starts background execution.
    fn start(&self);

    /// Stops background execution.
    fn stop(&self);

    /// Advances the handler's view of time, expiring timed-out plans.
    async fn update_compaction(&self, ts: u64) -> MetaResult<()>;
}
