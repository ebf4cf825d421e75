//! Targeted single-segment transforms for [`MetaEngine::update_segment`].
//!
//! A transform mutates the cloned entry and reports whether it changed
//! anything; when no transform changes anything the engine skips the
//! catalog write.
//!
//! [`MetaEngine::update_segment`]: crate::meta::MetaEngine::update_segment

use strata_core::SegmentLevel;

use crate::entry::SegmentEntry;

/// A single-segment transform: mutates the clone, returns true when it
/// changed something.
pub type SegmentTransform = Box<dyn Fn(&mut SegmentEntry) -> bool + Send + Sync>;

/// Sets the segment's row capacity.
#[must_use]
pub fn set_max_row_num(max_row_num: i64) -> SegmentTransform {
    Box::new(move |segment| {
        if segment.record.max_row_num == max_row_num {
            return false;
        }
        segment.record.max_row_num = max_row_num;
        true
    })
}

/// Moves the segment to another tier.
#[must_use]
pub fn set_level(level: SegmentLevel) -> SegmentTransform {
    Box::new(move |segment| {
        if segment.record.level == level {
            return false;
        }
        segment.record.level = level;
        true
    })
}
