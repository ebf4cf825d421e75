use serde::{Deserialize, Serialize};

use crate::ids::{CollectionId, FieldId, LogId, PartitionId, SegmentId};

/// Lifecycle state of a segment.
///
/// `None` and `NotExist` are terminal/invalid markers kept for wire
/// compatibility; healthy segments only move forward through
/// `Growing → Sealed → Flushing → Flushed → Dropped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SegmentState {
    None,
    Growing,
    Sealed,
    Flushing,
    Flushed,
    Dropped,
    NotExist,
}

impl SegmentState {
    /// Canonical name used in metric labels and the catalog.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Growing => "Growing",
            Self::Sealed => "Sealed",
            Self::Flushing => "Flushing",
            Self::Flushed => "Flushed",
            Self::Dropped => "Dropped",
            Self::NotExist => "NotExist",
        }
    }

    /// Returns true for `Flushing` and `Flushed`.
    #[must_use]
    pub const fn is_flush_state(&self) -> bool {
        matches!(self, Self::Flushing | Self::Flushed)
    }

    /// Whether a forward transition to `target` is legal. Backward
    /// transitions and transitions out of terminal states are rejected.
    #[must_use]
    pub fn can_transition_to(&self, target: SegmentState) -> bool {
        use SegmentState::{Dropped, Flushed, Flushing, Growing, Sealed};
        match (self, target) {
            (Growing, Sealed | Flushing | Flushed | Dropped) => true,
            (Sealed, Flushing | Flushed | Dropped) => true,
            (Flushing, Flushed | Dropped) => true,
            (Flushed, Dropped) => true,
            (s, t) if *s == t => true,
            _ => false,
        }
    }
}

/// Segment tier. Discriminant values are a wire contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum SegmentLevel {
    Legacy = 0,
    L0 = 1,
    L1 = 2,
    L2 = 3,
}

impl SegmentLevel {
    /// Canonical name used in metric labels and the catalog.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "Legacy",
            Self::L0 => "L0",
            Self::L1 => "L1",
            Self::L2 => "L2",
        }
    }
}

impl Default for SegmentLevel {
    fn default() -> Self {
        Self::Legacy
    }
}

/// A position in a message stream: the checkpoint unit for channels and
/// segments. Timestamps are hybrid cluster timestamps (see [`crate::tso`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamPosition {
    pub channel: String,
    pub msg_id: Vec<u8>,
    pub timestamp: u64,
}

impl StreamPosition {
    #[must_use]
    pub fn new(channel: impl Into<String>, msg_id: Vec<u8>, timestamp: u64) -> Self {
        Self {
            channel: channel.into(),
            msg_id,
            timestamp,
        }
    }
}

/// Descriptor of one immutable log file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binlog {
    pub entries_num: i64,
    pub timestamp_from: u64,
    pub timestamp_to: u64,
    pub log_size: i64,
    pub log_id: LogId,
    pub log_path: String,
}

/// All log files of one field within a segment. Append-only: merging new
/// logs into a field preserves the order of the existing list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldBinlog {
    pub field_id: FieldId,
    pub logs: Vec<Binlog>,
}

impl FieldBinlog {
    #[must_use]
    pub fn new(field_id: FieldId, logs: Vec<Binlog>) -> Self {
        Self { field_id, logs }
    }
}

/// Merges `new` field binlogs into `current`: logs of a known field are
/// concatenated after the existing ones, unknown fields are appended.
#[must_use]
pub fn merge_field_binlogs(mut current: Vec<FieldBinlog>, new: Vec<FieldBinlog>) -> Vec<FieldBinlog> {
    for incoming in new {
        match current.iter_mut().find(|f| f.field_id == incoming.field_id) {
            Some(existing) => existing.logs.extend(incoming.logs),
            None => current.push(incoming),
        }
    }
    current
}

/// Total number of log files across a field-binlog list.
#[must_use]
pub fn binlog_count(field_binlogs: &[FieldBinlog]) -> usize {
    field_binlogs.iter().map(|f| f.logs.len()).sum()
}

/// Total byte size across a field-binlog list.
#[must_use]
pub fn binlog_size(field_binlogs: &[FieldBinlog]) -> i64 {
    field_binlogs
        .iter()
        .flat_map(|f| f.logs.iter())
        .map(|l| l.log_size)
        .sum()
}

/// Row count recomputed from insert-log entry counts. Authoritative when it
/// disagrees with the writer-reported running count.
#[must_use]
pub fn row_count_from_binlogs(binlogs: &[FieldBinlog]) -> i64 {
    // every field logs the same rows; one field is enough
    binlogs
        .first()
        .map(|f| f.logs.iter().map(|l| l.entries_num).sum())
        .unwrap_or(0)
}

/// Persisted descriptor of a segment. This is the unit the catalog stores
/// and the engine installs; runtime-only bookkeeping lives on the meta
/// crate's entry wrapper.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentRecord {
    pub id: SegmentId,
    pub collection_id: CollectionId,
    pub partition_id: PartitionId,
    pub insert_channel: String,
    pub state: SegmentState,
    pub level: SegmentLevel,
    pub num_of_rows: i64,
    pub max_row_num: i64,
    pub binlogs: Vec<FieldBinlog>,
    pub statslogs: Vec<FieldBinlog>,
    pub deltalogs: Vec<FieldBinlog>,
    pub start_position: Option<StreamPosition>,
    pub dml_position: Option<StreamPosition>,
    /// Expiry fence for allocations, as a cluster timestamp.
    pub last_expire_time: u64,
    /// Wall-clock nanoseconds at the drop transition; zero until dropped.
    pub dropped_at: u64,
    pub is_importing: bool,
    /// Content has been subsumed by a compaction target.
    pub compacted: bool,
    pub compaction_from: Vec<SegmentId>,
    pub created_by_compaction: bool,
    pub storage_version: i64,
}

impl Default for SegmentState {
    fn default() -> Self {
        Self::None
    }
}

impl SegmentRecord {
    /// A fresh `Growing` segment with no logs.
    #[must_use]
    pub fn growing(
        id: SegmentId,
        collection_id: CollectionId,
        partition_id: PartitionId,
        insert_channel: impl Into<String>,
        is_importing: bool,
    ) -> Self {
        Self {
            id,
            collection_id,
            partition_id,
            insert_channel: insert_channel.into(),
            state: SegmentState::Growing,
            is_importing,
            ..Self::default()
        }
    }

    /// Healthy segments are the ones visible to planners and triggers.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        !matches!(
            self.state,
            SegmentState::None | SegmentState::NotExist | SegmentState::Dropped
        )
    }

    /// Combined byte size of insert, stats, and delta logs.
    #[must_use]
    pub fn total_log_size(&self) -> i64 {
        binlog_size(&self.binlogs) + binlog_size(&self.statslogs) + binlog_size(&self.deltalogs)
    }
}

/// A reserved slice of row capacity on a growing segment. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub segment_id: SegmentId,
    pub num_of_rows: i64,
    pub expire_time: u64,
}

/// A writer-reported flush checkpoint for one segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentCheckpoint {
    pub segment_id: SegmentId,
    pub num_of_rows: i64,
    pub position: StreamPosition,
}

/// A writer-reported start position for one segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentStartPosition {
    pub segment_id: SegmentId,
    pub position: StreamPosition,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log(id: i64, size: i64) -> Binlog {
        Binlog {
            entries_num: 1,
            log_size: size,
            log_id: LogId::new(id),
            ..Binlog::default()
        }
    }

    #[test]
    fn test_merge_field_binlogs_preserves_order() {
        let current = vec![FieldBinlog::new(FieldId::new(1), vec![log(0, 10)])];
        let incoming = vec![
            FieldBinlog::new(FieldId::new(1), vec![log(1, 20)]),
            FieldBinlog::new(FieldId::new(2), vec![log(2, 30)]),
        ];

        let merged = merge_field_binlogs(current, incoming);
        assert_eq!(merged.len(), 2);
        assert_eq!(
            merged[0].logs.iter().map(|l| l.log_id.as_i64()).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(merged[1].field_id, FieldId::new(2));
    }

    #[test]
    fn test_state_transitions() {
        assert!(SegmentState::Growing.can_transition_to(SegmentState::Sealed));
        assert!(SegmentState::Sealed.can_transition_to(SegmentState::Flushing));
        assert!(SegmentState::Flushing.can_transition_to(SegmentState::Flushed));
        assert!(SegmentState::Flushed.can_transition_to(SegmentState::Dropped));
        assert!(!SegmentState::Flushed.can_transition_to(SegmentState::Growing));
        assert!(!SegmentState::Dropped.can_transition_to(SegmentState::Flushed));
        assert!(!SegmentState::NotExist.can_transition_to(SegmentState::Growing));
    }

    #[test]
    fn test_row_count_from_binlogs_uses_one_field() {
        let binlogs = vec![
            FieldBinlog::new(
                FieldId::new(1),
                vec![
                    Binlog {
                        entries_num: 5,
                        ..Binlog::default()
                    },
                    Binlog {
                        entries_num: 7,
                        ..Binlog::default()
                    },
                ],
            ),
            FieldBinlog::new(
                FieldId::new(2),
                vec![Binlog {
                    entries_num: 12,
                    ..Binlog::default()
                }],
            ),
        ];
        assert_eq!(row_count_from_binlogs(&binlogs), 12);
        assert_eq!(row_count_from_binlogs(&[]), 0);
    }

    #[test]
    fn test_healthy_states() {
        let mut seg = SegmentRecord::growing(
            SegmentId::new(1),
            CollectionId::new(1),
            PartitionId::new(1),
            "ch-1",
            false,
        );
        assert!(seg.is_healthy());
        seg.state = SegmentState::Dropped;
        assert!(!seg.is_healthy());
        seg.state = SegmentState::NotExist;
        assert!(!seg.is_healthy());
    }
}
