//! Core domain types and contracts for the stratadb metadata control plane.

pub mod collection;
pub mod compaction;
pub mod config;
pub mod error;
pub mod ids;
pub mod index;
pub mod metrics;
pub mod segment;
pub mod status;
pub mod traits;
pub mod tso;

pub use collection::{CollectionInfo, CollectionSchema, DataType, FieldSchema};
pub use compaction::{
    compacted_segment_size, CompactionPlan, CompactionPlanResult, CompactionSegment,
    CompactionSignal, CompactionState, CompactionTask, CompactionType, PlanAck,
    PlanSegmentBinlogs,
};
pub use config::{CatalogConfig, CompactionConfig, SegmentConfig, StrataConfig};
pub use error::{MetaError, MetaResult};
pub use ids::{BuildId, CollectionId, FieldId, IndexId, LogId, PartitionId, PlanId, SegmentId};
pub use index::{IndexMeta, IndexState, SegmentIndexMeta};
pub use segment::{
    Allocation, Binlog, FieldBinlog, SegmentCheckpoint, SegmentLevel, SegmentRecord,
    SegmentStartPosition, SegmentState, StreamPosition,
};
pub use status::{verify_response, verify_status, Status, StatusBearing};
pub use traits::{Allocator, BinlogsIncrement, Catalog, CollectionHandler, CompactionHandler};
