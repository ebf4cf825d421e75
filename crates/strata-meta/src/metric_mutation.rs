//! Deferred metric bookkeeping.
//!
//! A [`MetricMutation`] accumulates counter adjustments while a mutation is
//! being prepared and applies them only after the catalog write succeeded.
//! A failed write drops the buffer untouched, so retries never double-count.

use std::collections::HashMap;

use strata_core::metrics::{NUM_SEGMENTS, STORED_ROWS, STORED_ROWS_TOTAL};
use strata_core::{SegmentLevel, SegmentRecord, SegmentState};

/// Buffered metric deltas for one meta transaction.
#[derive(Debug, Default)]
pub struct MetricMutation {
    /// Segment-count delta per (level, state) bucket.
    state_change: HashMap<(SegmentLevel, SegmentState), i64>,
    /// Delta of live rows.
    row_count_change: i64,
    /// Delta of the cumulative flushed-row counter; never negative.
    row_count_acc_change: i64,
}

impl MetricMutation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a state transition of an existing segment.
    pub fn append(
        &mut self,
        old_state: SegmentState,
        new_state: SegmentState,
        level: SegmentLevel,
        row_delta: i64,
    ) {
        if old_state != new_state {
            *self.state_change.entry((level, old_state)).or_default() -= 1;
            *self.state_change.entry((level, new_state)).or_default() += 1;
        }
        if new_state.is_flush_state() && !old_state.is_flush_state() {
            self.row_count_change += row_delta;
            self.row_count_acc_change += row_delta;
        } else if new_state == SegmentState::Dropped && old_state != new_state {
            self.row_count_change -= row_delta;
        }
    }

    /// Records a brand-new segment entering the map.
    pub fn add_new_seg(&mut self, state: SegmentState, level: SegmentLevel, row_count: i64) {
        *self.state_change.entry((level, state)).or_default() += 1;
        self.row_count_change += row_count;
        self.row_count_acc_change += row_count;
    }

    /// Applies all buffered deltas to the process-wide registry. Must only
    /// be called after the catalog write succeeded.
    pub fn commit(self) {
        for ((level, state), change) in &self.state_change {
            NUM_SEGMENTS
                .with_label_values(&[state.as_str(), level.as_str()])
                .add(*change);
        }
        STORED_ROWS.add(self.row_count_change);
        if self.row_count_acc_change > 0 {
            STORED_ROWS_TOTAL.inc_by(self.row_count_acc_change as u64);
        }
    }
}

/// Moves a record to `target` state and buffers the matching metric delta.
pub fn apply_state_change(
    record: &mut SegmentRecord,
    target: SegmentState,
    mutation: &mut MetricMutation,
) {
    tracing::debug!(
        segment_id = %record.id,
        old_state = record.state.as_str(),
        new_state = target.as_str(),
        rows = record.num_of_rows,
        "updating segment state"
    );
    mutation.append(record.state, target, record.level, record.num_of_rows);
    record.state = target;
}
