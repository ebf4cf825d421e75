//! Central metrics registry and metric definitions
//!
//! Prometheus metrics for the control plane, registered lazily on first
//! access using once_cell::Lazy.

use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_gauge, register_int_gauge_vec,
    HistogramVec, IntCounter, IntGauge, IntGaugeVec,
};

/// Metric label for insert-log file counts.
pub const INSERT_FILE_LABEL: &str = "insert_file";
/// Metric label for stats-log file counts.
pub const STATS_FILE_LABEL: &str = "stats_file";
/// Metric label for delete-log file counts.
pub const DELETE_FILE_LABEL: &str = "delete_file";
/// Metric label for index file counts.
pub const INDEX_FILE_LABEL: &str = "index_file";

/// Number of segments grouped by lifecycle state and tier level
pub static NUM_SEGMENTS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "strata_meta_segments",
        "Number of segments grouped by state and level",
        &["state", "level"]
    )
    .expect("Failed to register segment count gauge")
});

/// Number of collections currently cached by the meta engine
pub static NUM_COLLECTIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "strata_meta_collections",
        "Number of collections cached by the meta engine"
    )
    .expect("Failed to register collection count gauge")
});

/// Live rows across flushed segments
pub static STORED_ROWS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!(
        "strata_meta_stored_rows",
        "Live rows across flushed segments"
    )
    .expect("Failed to register stored rows gauge")
});

/// Cumulative rows ever flushed, never decremented
pub static STORED_ROWS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "strata_meta_stored_rows_total",
        "Cumulative rows flushed into durable segments"
    )
    .expect("Failed to register stored rows counter")
});

/// Per-channel checkpoint position as unix seconds
pub static CHECKPOINT_UNIX_SECONDS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "strata_meta_checkpoint_unix_seconds",
        "Channel checkpoint position as unix seconds",
        &["channel"]
    )
    .expect("Failed to register checkpoint gauge")
});

/// File count of flushed segments by log type
pub static FLUSHED_SEGMENT_FILE_NUM: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "strata_meta_flushed_segment_file_num",
        "Number of log files per flushed segment",
        &["file_type"],
        vec![1.0, 4.0, 16.0, 64.0, 256.0, 1024.0]
    )
    .expect("Failed to register flushed file histogram")
});

/// Byte size of segments produced by compaction
pub static COMPACTED_SEGMENT_SIZE: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "strata_compaction_segment_size_bytes",
        "Byte size of segments produced by compaction",
        &[],
        prometheus::exponential_buckets(1024.0 * 1024.0, 4.0, 8).expect("valid buckets")
    )
    .expect("Failed to register compacted segment size histogram")
});

/// Binlog bytes stored per collection
pub static STORED_BINLOG_SIZE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "strata_meta_stored_binlog_size_bytes",
        "Binlog bytes stored, by collection and segment",
        &["collection", "segment"]
    )
    .expect("Failed to register stored binlog size gauge")
});
