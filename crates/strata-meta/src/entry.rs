use chrono::{DateTime, Utc};

use strata_core::{Allocation, SegmentId, SegmentRecord};

/// A segment as held by the in-memory store: the persisted record plus
/// runtime bookkeeping that never reaches the catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentEntry {
    /// The persisted descriptor.
    pub record: SegmentRecord,
    /// Writer-reported running row count; reconciled into
    /// `record.num_of_rows` at checkpoint time.
    pub curr_rows: i64,
    /// Outstanding row-capacity reservations.
    pub allocations: Vec<Allocation>,
    /// Last time the segment was flushed.
    pub last_flush_time: Option<DateTime<Utc>>,
    /// Set while the segment is a source of a running compaction plan.
    pub is_compacting: bool,
}

impl SegmentEntry {
    /// Wraps a freshly loaded or created record.
    #[must_use]
    pub fn new(record: SegmentRecord) -> Self {
        Self {
            record,
            ..Self::default()
        }
    }

    /// The segment's identifier.
    #[must_use]
    pub fn id(&self) -> SegmentId {
        self.record.id
    }

    /// Whether the segment is visible to planners and triggers.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.record.is_healthy()
    }
}

impl From<SegmentRecord> for SegmentEntry {
    fn from(record: SegmentRecord) -> Self {
        Self::new(record)
    }
}
