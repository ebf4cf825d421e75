//! Small-segment merge policy.
//!
//! Candidates are packed into bins by a size-ordered greedy pass. A bin's
//! combined row count may not exceed the row capacity (prioritized fill) or
//! its expansion-rate headroom (squeeze pass), and a bin never exceeds the
//! configured segment-count cap. Bins below the merge minimum are dropped
//! unless they already hold enough rows or the round is forced.

use std::sync::Arc;

use strata_meta::SegmentEntry;

/// Parameters of one packing round.
#[derive(Debug, Clone)]
pub struct MergePolicy {
    /// Row capacity of the compaction target.
    pub max_rows: i64,
    /// Headroom multiplier a squeezed bin may use over `max_rows`.
    pub expansion_rate: f64,
    /// Bins with fewer segments are discarded unless forced or already
    /// compactable.
    pub min_segments_to_merge: usize,
    /// Hard cap on segments per bin.
    pub max_segments_to_merge: usize,
    /// A segment under this share of `max_rows` counts as small.
    pub small_proportion: f64,
    /// A bin over this share of `max_rows` merges even below the count
    /// minimum.
    pub compactable_proportion: f64,
}

impl MergePolicy {
    fn expanded_cap(&self) -> i64 {
        (self.expansion_rate * self.max_rows as f64) as i64
    }

    /// Whether a segment is small enough to be coalesced.
    #[must_use]
    pub fn is_small_segment(&self, rows: i64) -> bool {
        rows < (self.max_rows as f64 * self.small_proportion) as i64
    }

    fn is_compactable(&self, total_rows: i64) -> bool {
        total_rows > (self.max_rows as f64 * self.compactable_proportion) as i64
    }

    fn is_expandable_small(&self, rows: i64) -> bool {
        rows < (self.max_rows as f64 * (self.expansion_rate - 1.0)) as i64
    }

    /// Packs candidates into merge bins.
    ///
    /// `prioritized` segments (force-selected or individually overdue) each
    /// seed a bin that is always emitted, filled up to `max_rows` from the
    /// remaining prioritized then small candidates. Leftover `small`
    /// segments form bins of their own, emitted when they reach the count
    /// minimum or enough rows; stragglers are squeezed into emitted bins
    /// within the expansion headroom.
    #[must_use]
    pub fn pack(
        &self,
        mut prioritized: Vec<Arc<SegmentEntry>>,
        mut small: Vec<Arc<SegmentEntry>>,
    ) -> Vec<Vec<Arc<SegmentEntry>>> {
        sort_by_rows_desc(&mut prioritized);
        sort_by_rows_desc(&mut small);

        let mut bins: Vec<Vec<Arc<SegmentEntry>>> = Vec::new();

        while !prioritized.is_empty() {
            let seed = prioritized.remove(0);
            let mut bin = vec![seed];

            let mut rows = bin[0].record.num_of_rows;
            if rows < self.max_rows {
                let mut slots = self.max_segments_to_merge - 1;
                let (picked, used) = greedy_select(&mut prioritized, self.max_rows - rows, slots);
                slots -= picked.len();
                rows += used;
                bin.extend(picked);
                if slots > 0 {
                    let (picked, _) = greedy_select(&mut small, self.max_rows - rows, slots);
                    bin.extend(picked);
                }
            }
            // an overdue segment compacts even alone
            bins.push(bin);
        }

        let mut leftovers: Vec<Arc<SegmentEntry>> = Vec::new();
        while !small.is_empty() {
            let seed = small.remove(0);
            let mut bin = vec![seed];
            let mut rows = bin[0].record.num_of_rows;

            let free = self.max_rows - rows;
            // fill smallest-first so a pair of half-full segments still
            // reaches the count minimum
            let (picked, used) =
                reverse_greedy_select(&mut small, free, self.max_segments_to_merge - 1);
            rows += used;
            bin.extend(picked);

            if bin.len() >= self.min_segments_to_merge
                || (bin.len() > 1 && self.is_compactable(rows))
            {
                bins.push(bin);
            } else {
                leftovers.extend(bin);
            }
        }

        // squeeze what remains into already-emitted bins
        for segment in leftovers {
            if !self.is_expandable_small(segment.record.num_of_rows) {
                continue;
            }
            let cap = self.expanded_cap();
            for bin in &mut bins {
                let total: i64 = bin.iter().map(|s| s.record.num_of_rows).sum();
                if bin.len() < self.max_segments_to_merge
                    && total + segment.record.num_of_rows <= cap
                {
                    bin.push(segment);
                    break;
                }
            }
        }

        bins
    }
}

fn sort_by_rows_desc(segments: &mut [Arc<SegmentEntry>]) {
    segments.sort_by(|a, b| b.record.num_of_rows.cmp(&a.record.num_of_rows));
}

/// Takes candidates (largest first) that fit into `free` rows, up to
/// `limit` segments. Returns the picked segments and the rows they use.
fn greedy_select(
    candidates: &mut Vec<Arc<SegmentEntry>>,
    mut free: i64,
    limit: usize,
) -> (Vec<Arc<SegmentEntry>>, i64) {
    let mut picked = Vec::new();
    let mut used = 0;
    let mut i = 0;
    while i < candidates.len() && picked.len() < limit {
        let rows = candidates[i].record.num_of_rows;
        if rows <= free {
            free -= rows;
            used += rows;
            picked.push(candidates.remove(i));
        } else {
            i += 1;
        }
    }
    (picked, used)
}

/// Like [`greedy_select`] but walks the candidates smallest-first.
fn reverse_greedy_select(
    candidates: &mut Vec<Arc<SegmentEntry>>,
    mut free: i64,
    limit: usize,
) -> (Vec<Arc<SegmentEntry>>, i64) {
    let mut picked = Vec::new();
    let mut used = 0;
    let mut i = candidates.len();
    while i > 0 && picked.len() < limit {
        i -= 1;
        let rows = candidates[i].record.num_of_rows;
        if rows <= free {
            free -= rows;
            used += rows;
            picked.push(candidates.remove(i));
        }
    }
    (picked, used)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::{CollectionId, PartitionId, SegmentId, SegmentRecord, SegmentState};

    fn policy(max_rows: i64) -> MergePolicy {
        MergePolicy {
            max_rows,
            expansion_rate: 1.25,
            min_segments_to_merge: 3,
            max_segments_to_merge: 30,
            small_proportion: 0.5,
            compactable_proportion: 0.85,
        }
    }

    fn seg(id: i64, rows: i64) -> Arc<SegmentEntry> {
        let mut record = SegmentRecord::growing(
            SegmentId::new(id),
            CollectionId::new(1),
            PartitionId::new(1),
            "ch-0",
            false,
        );
        record.state = SegmentState::Flushed;
        record.num_of_rows = rows;
        Arc::new(SegmentEntry::new(record))
    }

    fn ids(bin: &[Arc<SegmentEntry>]) -> Vec<i64> {
        let mut ids: Vec<i64> = bin.iter().map(|s| s.id().as_i64()).collect();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn test_prioritized_seed_merges_alone() {
        let bins = policy(100).pack(vec![seg(1, 120)], vec![]);
        assert_eq!(bins.len(), 1);
        assert_eq!(ids(&bins[0]), vec![1]);
    }

    #[test]
    fn test_prioritized_fill_from_small() {
        let bins = policy(100).pack(vec![seg(1, 60)], vec![seg(2, 30), seg(3, 20)]);
        assert_eq!(bins.len(), 1);
        // 60 + 30 fits; 20 no longer fits after that
        assert_eq!(ids(&bins[0]), vec![1, 2]);
    }

    #[test]
    fn test_small_bin_below_minimum_is_dropped() {
        let bins = policy(100).pack(vec![], vec![seg(1, 10), seg(2, 10)]);
        assert!(bins.is_empty());
    }

    #[test]
    fn test_small_bin_reaching_minimum_merges() {
        let bins = policy(100).pack(vec![], vec![seg(1, 20), seg(2, 20), seg(3, 20)]);
        assert_eq!(bins.len(), 1);
        assert_eq!(ids(&bins[0]), vec![1, 2, 3]);
    }

    #[test]
    fn test_two_large_smalls_merge_via_compactable_rule() {
        // 45 + 45 = 90 > 85% of 100: merged even though below the count
        // minimum
        let bins = policy(100).pack(vec![], vec![seg(1, 45), seg(2, 45)]);
        assert_eq!(bins.len(), 1);
        assert_eq!(ids(&bins[0]), vec![1, 2]);
    }

    #[test]
    fn test_squeeze_into_existing_bin() {
        // max 110, expansion 1.25 -> cap 137. Bin of 60+26+26=112 forms from
        // prioritized + small; the leftover 24-row segment squeezes in.
        let policy = MergePolicy {
            max_rows: 110,
            ..policy(110)
        };
        let bins = policy.pack(
            vec![seg(1, 60)],
            vec![seg(2, 26), seg(3, 26), seg(4, 24)],
        );
        assert_eq!(bins.len(), 1);
        assert_eq!(ids(&bins[0]), vec![1, 2, 3, 4]);
        let total: i64 = bins[0].iter().map(|s| s.record.num_of_rows).sum();
        assert!(total <= 137);
    }

    #[test]
    fn test_bin_respects_segment_count_cap() {
        let policy = MergePolicy {
            max_segments_to_merge: 3,
            min_segments_to_merge: 2,
            ..policy(1000)
        };
        let bins = policy.pack(
            vec![seg(1, 10)],
            vec![seg(2, 10), seg(3, 10), seg(4, 10), seg(5, 10)],
        );
        assert!(bins.iter().all(|b| b.len() <= 3));
    }
}
