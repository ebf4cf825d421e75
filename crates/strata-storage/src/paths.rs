//! Deterministic key scheme for log blobs.
//!
//! Every log file lives under
//! `<root>/<kind>/<collection>/<partition>/<segment>/<field>/<logID>`.
//! The compaction completer re-addresses a delta log to its target segment
//! by substituting only the segment component.

use strata_core::ids::{CollectionId, FieldId, LogId, PartitionId, SegmentId};

const INSERT_LOG_DIR: &str = "insert_log";
const STATS_LOG_DIR: &str = "stats_log";
const DELTA_LOG_DIR: &str = "delta_log";

fn log_path(
    root: &str,
    kind: &str,
    collection_id: CollectionId,
    partition_id: PartitionId,
    segment_id: SegmentId,
    field_id: FieldId,
    log_id: LogId,
) -> String {
    format!("{root}/{kind}/{collection_id}/{partition_id}/{segment_id}/{field_id}/{log_id}")
}

/// Key of an insert-log blob.
#[must_use]
pub fn insert_log_path(
    root: &str,
    collection_id: CollectionId,
    partition_id: PartitionId,
    segment_id: SegmentId,
    field_id: FieldId,
    log_id: LogId,
) -> String {
    log_path(
        root,
        INSERT_LOG_DIR,
        collection_id,
        partition_id,
        segment_id,
        field_id,
        log_id,
    )
}

/// Key of a stats-log blob.
#[must_use]
pub fn stats_log_path(
    root: &str,
    collection_id: CollectionId,
    partition_id: PartitionId,
    segment_id: SegmentId,
    field_id: FieldId,
    log_id: LogId,
) -> String {
    log_path(
        root,
        STATS_LOG_DIR,
        collection_id,
        partition_id,
        segment_id,
        field_id,
        log_id,
    )
}

/// Key of a delta-log blob.
#[must_use]
pub fn delta_log_path(
    root: &str,
    collection_id: CollectionId,
    partition_id: PartitionId,
    segment_id: SegmentId,
    field_id: FieldId,
    log_id: LogId,
) -> String {
    log_path(
        root,
        DELTA_LOG_DIR,
        collection_id,
        partition_id,
        segment_id,
        field_id,
        log_id,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_layout() {
        let key = delta_log_path(
            "files",
            CollectionId::new(2),
            PartitionId::new(3),
            SegmentId::new(4),
            FieldId::new(5),
            LogId::new(6),
        );
        assert_eq!(key, "files/delta_log/2/3/4/5/6");
    }

    #[test]
    fn test_segment_substitution_changes_one_component() {
        let from = delta_log_path(
            "files",
            CollectionId::new(2),
            PartitionId::new(3),
            SegmentId::new(4),
            FieldId::new(5),
            LogId::new(6),
        );
        let to = delta_log_path(
            "files",
            CollectionId::new(2),
            PartitionId::new(3),
            SegmentId::new(9),
            FieldId::new(5),
            LogId::new(6),
        );
        assert_ne!(from, to);
        assert_eq!(from.replace("/4/", "/9/"), to);
    }
}
