use serde::{Deserialize, Serialize};

use crate::ids::{CollectionId, PartitionId, PlanId, SegmentId};
use crate::segment::{FieldBinlog, SegmentLevel};
use crate::status::{Status, StatusBearing};

/// Kind of compaction work a plan describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompactionType {
    /// Merge several small segments into one and fold in tombstones.
    MixCompaction,
    /// Push channel-scoped L0 deletes down into sealed segments.
    L0DeleteCompaction,
}

/// Execution state of a plan on the worker side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompactionState {
    Executing,
    Pipelining,
    Completed,
    Failed,
    Timeout,
}

/// The log set of one source segment as captured when the plan was cut.
/// Deltas that land on the source afterwards are "late" and are carried
/// over by the completer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanSegmentBinlogs {
    pub segment_id: SegmentId,
    pub field_binlogs: Vec<FieldBinlog>,
    pub statslogs: Vec<FieldBinlog>,
    pub deltalogs: Vec<FieldBinlog>,
    pub level: SegmentLevel,
}

/// A unit of compaction work handed to an external worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionPlan {
    pub plan_id: PlanId,
    pub segment_binlogs: Vec<PlanSegmentBinlogs>,
    pub compaction_type: CompactionType,
    pub channel: String,
    /// Cluster timestamp taken when the plan was cut.
    pub start_time: u64,
    pub timeout_secs: u32,
    pub collection_ttl_secs: u64,
}

impl CompactionPlan {
    /// Ids of all source segments in the plan.
    #[must_use]
    pub fn segment_ids(&self) -> Vec<SegmentId> {
        self.segment_binlogs.iter().map(|b| b.segment_id).collect()
    }
}

/// One result segment reported by the worker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompactionSegment {
    pub segment_id: SegmentId,
    pub num_of_rows: i64,
    pub insert_logs: Vec<FieldBinlog>,
    pub statslogs: Vec<FieldBinlog>,
    pub deltalogs: Vec<FieldBinlog>,
    pub channel: String,
}

/// Worker-side outcome of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionPlanResult {
    pub plan_id: PlanId,
    pub state: CompactionState,
    pub segments: Vec<CompactionSegment>,
}

/// A request for the trigger to (re)consider compaction candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompactionSignal {
    pub id: i64,
    pub is_force: bool,
    pub is_global: bool,
    pub collection_id: Option<CollectionId>,
    pub partition_id: Option<PartitionId>,
    pub segment_id: Option<SegmentId>,
    pub channel: Option<String>,
}

/// A queued or running plan as tracked by the external handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactionTask {
    pub plan: CompactionPlan,
    pub state: CompactionState,
    pub signal_id: i64,
}

/// Acknowledgement returned by the handler when a plan is submitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanAck {
    pub status: Status,
    pub plan_id: PlanId,
}

impl PlanAck {
    /// A success acknowledgement for `plan_id`.
    #[must_use]
    pub fn accepted(plan_id: PlanId) -> Self {
        Self {
            status: Status::success(),
            plan_id,
        }
    }
}

impl StatusBearing for PlanAck {
    fn status(&self) -> &Status {
        &self.status
    }
}

/// Byte size of one result segment for the compacted-size metric. Delta
/// logs count twice and statslogs not at all; the metric series is defined
/// that way.
#[must_use]
pub fn compacted_segment_size(segment: &CompactionSegment) -> i64 {
    let mut size = 0;
    for insert_logs in &segment.insert_logs {
        for log in &insert_logs.logs {
            size += log.log_size;
        }
    }
    for delta_logs in &segment.deltalogs {
        for log in &delta_logs.logs {
            size += log.log_size;
        }
    }
    for stats_logs in &segment.deltalogs {
        for log in &stats_logs.logs {
            size += log.log_size;
        }
    }
    size
}
