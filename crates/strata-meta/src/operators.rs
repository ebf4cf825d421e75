//! Composable single-segment transforms applied inside one meta
//! transaction.
//!
//! Operators share one [`UpdatePack`]: a lazy clone-on-first-write view of
//! the segment map plus the transaction's metric buffer. Every operator
//! reports an [`OperatorOutcome`]; an `Abort` from any operator discards the
//! whole pipeline without a catalog write.

use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use strata_core::segment::{merge_field_binlogs, row_count_from_binlogs};
use strata_core::{
    CollectionId, FieldBinlog, PartitionId, SegmentCheckpoint, SegmentId, SegmentLevel,
    SegmentRecord, SegmentStartPosition, SegmentState,
};

use crate::entry::SegmentEntry;
use crate::metric_mutation::{apply_state_change, MetricMutation};
use crate::store::SegmentStore;

/// What an operator did to the shared pack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorOutcome {
    /// The operator mutated at least one segment; the transaction must be
    /// persisted.
    Dirty,
    /// The operator ran but had nothing to change.
    Clean,
    /// The whole transaction must be abandoned without a catalog write.
    Abort,
}

/// A single-segment transform over the shared mutation pack.
pub type UpdateOperator = Box<dyn FnOnce(&mut UpdatePack<'_>) -> OperatorOutcome + Send>;

/// Shared state of one operator pipeline run.
pub struct UpdatePack<'a> {
    store: &'a SegmentStore,
    /// Cloned segments dirtied (or created) by the pipeline.
    pub(crate) segments: HashMap<SegmentId, SegmentEntry>,
    /// Segments whose binlog listing grew and needs catalog indexing.
    pub(crate) increments: HashSet<SegmentId>,
    /// Deferred metric deltas, committed after the catalog write.
    pub(crate) metric_mutation: MetricMutation,
}

impl<'a> UpdatePack<'a> {
    pub(crate) fn new(store: &'a SegmentStore) -> Self {
        Self {
            store,
            segments: HashMap::new(),
            increments: HashSet::new(),
            metric_mutation: MetricMutation::new(),
        }
    }

    fn materialize(&mut self, id: SegmentId) -> bool {
        if self.segments.contains_key(&id) {
            return true;
        }
        let Some(current) = self.store.get(id) else {
            warn!(segment_id = %id, "meta update: segment not found");
            return false;
        };
        if !current.is_healthy() {
            warn!(segment_id = %id, state = current.record.state.as_str(),
                "meta update: segment unhealthy");
            return false;
        }
        self.segments.insert(id, SegmentEntry::clone(&current));
        true
    }

    /// The pack's clone of a healthy segment, cloning it on first access.
    /// Returns `None` for missing or unhealthy segments.
    pub fn get(&mut self, id: SegmentId) -> Option<&mut SegmentEntry> {
        if !self.materialize(id) {
            return None;
        }
        self.segments.get_mut(&id)
    }

    fn get_with_metrics(
        &mut self,
        id: SegmentId,
    ) -> Option<(&mut SegmentEntry, &mut MetricMutation)> {
        if !self.materialize(id) {
            return None;
        }
        let Self {
            segments,
            metric_mutation,
            ..
        } = self;
        segments.get_mut(&id).map(|s| (s, &mut *metric_mutation))
    }
}

pub(crate) fn now_unix_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// Inserts a fresh L0 Flushed segment with zero rows when `segment_id` is
/// unknown; an existing segment is left untouched.
pub fn create_l0(
    collection_id: CollectionId,
    partition_id: PartitionId,
    segment_id: SegmentId,
    channel: String,
) -> UpdateOperator {
    Box::new(move |pack| {
        if pack.segments.contains_key(&segment_id) || pack.store.get(segment_id).is_some() {
            return OperatorOutcome::Clean;
        }

        info!(
            collection_id = %collection_id,
            partition_id = %partition_id,
            segment_id = %segment_id,
            "meta update: add new L0 segment"
        );
        let record = SegmentRecord {
            id: segment_id,
            collection_id,
            partition_id,
            insert_channel: channel,
            num_of_rows: 0,
            state: SegmentState::Flushed,
            level: SegmentLevel::L0,
            ..SegmentRecord::default()
        };
        pack.metric_mutation
            .add_new_seg(SegmentState::Flushed, SegmentLevel::L0, 0);
        pack.segments.insert(segment_id, SegmentEntry::new(record));
        OperatorOutcome::Dirty
    })
}

/// Transitions a segment's state, stamping `dropped_at` on drops.
pub fn update_status(segment_id: SegmentId, status: SegmentState) -> UpdateOperator {
    Box::new(move |pack| {
        let Some((segment, metrics)) = pack.get_with_metrics(segment_id) else {
            warn!(segment_id = %segment_id, status = status.as_str(),
                "meta update: update status failed - segment not found");
            return OperatorOutcome::Abort;
        };

        apply_state_change(&mut segment.record, status, metrics);
        if status == SegmentState::Dropped {
            segment.record.dropped_at = now_unix_nanos();
        }
        OperatorOutcome::Dirty
    })
}

/// Marks a segment's content as subsumed by compaction.
pub fn update_compacted(segment_id: SegmentId) -> UpdateOperator {
    Box::new(move |pack| {
        let Some(segment) = pack.get(segment_id) else {
            warn!(segment_id = %segment_id,
                "meta update: update compacted failed - segment not found");
            return OperatorOutcome::Abort;
        };
        segment.record.compacted = true;
        OperatorOutcome::Dirty
    })
}

/// Stamps the per-segment storage format version.
pub fn update_storage_version(segment_id: SegmentId, version: i64) -> UpdateOperator {
    Box::new(move |pack| {
        let Some(segment) = pack.get(segment_id) else {
            info!(segment_id = %segment_id,
                "meta update: update storage version - segment not found");
            return OperatorOutcome::Abort;
        };
        segment.record.storage_version = version;
        OperatorOutcome::Dirty
    })
}

/// Merges freshly flushed insert, stats, and delta logs into a segment and
/// schedules its binlog listing for catalog indexing.
pub fn update_binlogs(
    segment_id: SegmentId,
    binlogs: Vec<FieldBinlog>,
    statslogs: Vec<FieldBinlog>,
    deltalogs: Vec<FieldBinlog>,
) -> UpdateOperator {
    Box::new(move |pack| {
        let Some(segment) = pack.get(segment_id) else {
            warn!(segment_id = %segment_id,
                "meta update: update binlog failed - segment not found");
            return OperatorOutcome::Abort;
        };

        let record = &mut segment.record;
        record.binlogs = merge_field_binlogs(std::mem::take(&mut record.binlogs), binlogs);
        record.statslogs = merge_field_binlogs(std::mem::take(&mut record.statslogs), statslogs);
        record.deltalogs = merge_field_binlogs(std::mem::take(&mut record.deltalogs), deltalogs);
        pack.increments.insert(segment_id);
        OperatorOutcome::Dirty
    })
}

/// Sets the start position of every listed segment whose reported position
/// carries a message id.
pub fn update_start_position(positions: Vec<SegmentStartPosition>) -> UpdateOperator {
    Box::new(move |pack| {
        let mut touched = false;
        for pos in positions {
            if pos.position.msg_id.is_empty() {
                continue;
            }
            let Some(segment) = pack.get(pos.segment_id) else {
                continue;
            };
            segment.record.start_position = Some(pos.position);
            touched = true;
        }
        if touched {
            OperatorOutcome::Dirty
        } else {
            OperatorOutcome::Clean
        }
    })
}

/// Applies writer flush checkpoints: row count and DML position advance,
/// stale positions are dropped, and the row count is cross-checked against
/// the insert-log entry counts.
pub fn update_checkpoint(
    segment_id: SegmentId,
    importing: bool,
    checkpoints: Vec<SegmentCheckpoint>,
) -> UpdateOperator {
    Box::new(move |pack| {
        let Some(segment) = pack.get(segment_id) else {
            warn!(segment_id = %segment_id,
                "meta update: update checkpoint failed - segment not found");
            return OperatorOutcome::Abort;
        };

        if importing {
            segment.record.num_of_rows = segment.curr_rows;
        } else {
            for cp in checkpoints {
                if cp.segment_id != segment_id {
                    warn!(segment_id = %segment_id, checkpoint_segment = %cp.segment_id,
                        "checkpoint does not belong to the segment being flushed, ignored");
                    continue;
                }
                if let Some(dml) = &segment.record.dml_position {
                    if dml.timestamp >= cp.position.timestamp {
                        warn!(segment_id = %segment_id,
                            current_ts = dml.timestamp,
                            reported_ts = cp.position.timestamp,
                            "stale checkpoint reported, ignored");
                        continue;
                    }
                }
                segment.record.num_of_rows = cp.num_of_rows;
                segment.record.dml_position = Some(cp.position);
            }
        }

        let counted = row_count_from_binlogs(&segment.record.binlogs);
        if counted != segment.curr_rows && counted > 0 {
            info!(segment_id = %segment_id,
                reported_rows = segment.curr_rows,
                binlog_rows = counted,
                "checkpoint row count inconsistent with binlogs, healing");
            segment.record.num_of_rows = counted;
        }
        OperatorOutcome::Dirty
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{Binlog, FieldId, LogId, StreamPosition};

    fn store_with(entries: Vec<SegmentEntry>) -> SegmentStore {
        let store = SegmentStore::new();
        for entry in entries {
            store.set(entry);
        }
        store
    }

    fn growing(id: i64) -> SegmentEntry {
        SegmentEntry::new(SegmentRecord::growing(
            SegmentId::new(id),
            CollectionId::new(1),
            PartitionId::new(1),
            "ch-0",
            false,
        ))
    }

    #[test]
    fn test_update_status_stamps_dropped_at() {
        let store = store_with(vec![growing(1)]);
        let mut pack = UpdatePack::new(&store);

        let outcome = update_status(SegmentId::new(1), SegmentState::Dropped)(&mut pack);
        assert_eq!(outcome, OperatorOutcome::Dirty);

        let seg = &pack.segments[&SegmentId::new(1)];
        assert_eq!(seg.record.state, SegmentState::Dropped);
        assert!(seg.record.dropped_at > 0);
    }

    #[test]
    fn test_missing_segment_aborts() {
        let store = store_with(vec![]);
        let mut pack = UpdatePack::new(&store);
        let outcome = update_status(SegmentId::new(9), SegmentState::Flushed)(&mut pack);
        assert_eq!(outcome, OperatorOutcome::Abort);
    }

    #[test]
    fn test_unhealthy_segment_aborts() {
        let mut dropped = growing(1);
        dropped.record.state = SegmentState::Dropped;
        let store = store_with(vec![dropped]);
        let mut pack = UpdatePack::new(&store);
        let outcome = update_compacted(SegmentId::new(1))(&mut pack);
        assert_eq!(outcome, OperatorOutcome::Abort);
    }

    #[test]
    fn test_create_l0_only_when_absent() {
        let store = store_with(vec![growing(1)]);
        let mut pack = UpdatePack::new(&store);

        let existing = create_l0(
            CollectionId::new(1),
            PartitionId::new(1),
            SegmentId::new(1),
            "ch-0".into(),
        )(&mut pack);
        assert_eq!(existing, OperatorOutcome::Clean);
        assert!(pack.segments.is_empty());

        let fresh = create_l0(
            CollectionId::new(1),
            PartitionId::new(1),
            SegmentId::new(2),
            "ch-0".into(),
        )(&mut pack);
        assert_eq!(fresh, OperatorOutcome::Dirty);
        let seg = &pack.segments[&SegmentId::new(2)];
        assert_eq!(seg.record.level, SegmentLevel::L0);
        assert_eq!(seg.record.state, SegmentState::Flushed);
        assert_eq!(seg.record.num_of_rows, 0);
    }

    #[test]
    fn test_update_binlogs_merges_by_field() {
        let mut seg = growing(1);
        seg.record.binlogs = vec![FieldBinlog::new(
            FieldId::new(1),
            vec![Binlog {
                log_id: LogId::new(0),
                ..Binlog::default()
            }],
        )];
        let store = store_with(vec![seg]);
        let mut pack = UpdatePack::new(&store);

        let outcome = update_binlogs(
            SegmentId::new(1),
            vec![FieldBinlog::new(
                FieldId::new(1),
                vec![Binlog {
                    log_id: LogId::new(1),
                    ..Binlog::default()
                }],
            )],
            vec![],
            vec![],
        )(&mut pack);
        assert_eq!(outcome, OperatorOutcome::Dirty);
        assert!(pack.increments.contains(&SegmentId::new(1)));

        let seg = &pack.segments[&SegmentId::new(1)];
        assert_eq!(seg.record.binlogs.len(), 1);
        assert_eq!(
            seg.record.binlogs[0]
                .logs
                .iter()
                .map(|l| l.log_id.as_i64())
                .collect::<Vec<_>>(),
            vec![0, 1]
        );
    }

    #[test]
    fn test_update_start_position_skips_empty_msg_id() {
        let store = store_with(vec![growing(1)]);
        let mut pack = UpdatePack::new(&store);

        let outcome = update_start_position(vec![SegmentStartPosition {
            segment_id: SegmentId::new(1),
            position: StreamPosition::new("ch-0", vec![], 10),
        }])(&mut pack);
        assert_eq!(outcome, OperatorOutcome::Clean);
        assert!(pack.segments.is_empty());

        let outcome = update_start_position(vec![SegmentStartPosition {
            segment_id: SegmentId::new(1),
            position: StreamPosition::new("ch-0", vec![1, 2, 3], 10),
        }])(&mut pack);
        assert_eq!(outcome, OperatorOutcome::Dirty);
        let seg = &pack.segments[&SegmentId::new(1)];
        assert_eq!(
            seg.record.start_position.as_ref().unwrap().msg_id,
            vec![1, 2, 3]
        );
    }

    #[test]
    fn test_update_checkpoint_rejects_stale_position() {
        let mut seg = growing(1);
        seg.curr_rows = 10;
        seg.record.dml_position = Some(StreamPosition::new("ch-0", vec![1], 100));
        let store = store_with(vec![seg]);
        let mut pack = UpdatePack::new(&store);

        update_checkpoint(
            SegmentId::new(1),
            false,
            vec![SegmentCheckpoint {
                segment_id: SegmentId::new(1),
                num_of_rows: 99,
                position: StreamPosition::new("ch-0", vec![2], 50),
            }],
        )(&mut pack);

        let seg = &pack.segments[&SegmentId::new(1)];
        assert_eq!(seg.record.dml_position.as_ref().unwrap().timestamp, 100);
        assert_ne!(seg.record.num_of_rows, 99);
    }

    #[test]
    fn test_update_checkpoint_heals_row_count_from_binlogs() {
        let mut seg = growing(1);
        seg.curr_rows = 5;
        seg.record.binlogs = vec![FieldBinlog::new(
            FieldId::new(1),
            vec![Binlog {
                entries_num: 12,
                ..Binlog::default()
            }],
        )];
        let store = store_with(vec![seg]);
        let mut pack = UpdatePack::new(&store);

        update_checkpoint(
            SegmentId::new(1),
            false,
            vec![SegmentCheckpoint {
                segment_id: SegmentId::new(1),
                num_of_rows: 5,
                position: StreamPosition::new("ch-0", vec![2], 50),
            }],
        )(&mut pack);

        let seg = &pack.segments[&SegmentId::new(1)];
        assert_eq!(seg.record.num_of_rows, 12);
    }

    #[test]
    fn test_update_checkpoint_importing_copies_current_rows() {
        let mut seg = growing(1);
        seg.curr_rows = 77;
        let store = store_with(vec![seg]);
        let mut pack = UpdatePack::new(&store);

        update_checkpoint(SegmentId::new(1), true, vec![])(&mut pack);
        // no binlogs: the cross-check cannot override the copied count
        let seg = &pack.segments[&SegmentId::new(1)];
        assert_eq!(seg.record.num_of_rows, 77);
    }
}
