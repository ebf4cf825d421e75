use serde::{Deserialize, Serialize};

use crate::ids::{BuildId, CollectionId, FieldId, IndexId, PartitionId, SegmentId};

/// Index parameter key carrying the index type.
pub const INDEX_TYPE_KEY: &str = "index_type";
/// DiskANN index type value.
pub const INDEX_TYPE_DISKANN: &str = "DISKANN";
/// HNSW index type value.
pub const INDEX_TYPE_HNSW: &str = "HNSW";
/// Brute-force flat index type value.
pub const INDEX_TYPE_FLAT: &str = "FLAT";

/// Build state of one index on one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexState {
    Unissued,
    InProgress,
    Finished,
    Failed,
}

impl Default for IndexState {
    fn default() -> Self {
        Self::Unissued
    }
}

/// Definition of an index on a collection field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub index_id: IndexId,
    pub collection_id: CollectionId,
    pub field_id: FieldId,
    pub index_name: String,
    pub index_params: Vec<(String, String)>,
    pub is_deleted: bool,
}

impl IndexMeta {
    /// The declared index type, if any.
    #[must_use]
    pub fn index_type(&self) -> Option<&str> {
        self.index_params
            .iter()
            .find(|(k, _)| k == INDEX_TYPE_KEY)
            .map(|(_, v)| v.as_str())
    }

    /// Whether the index is a disk-resident ANN index.
    #[must_use]
    pub fn is_diskann(&self) -> bool {
        self.index_type() == Some(INDEX_TYPE_DISKANN)
    }
}

/// State of one index build on one segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentIndexMeta {
    pub segment_id: SegmentId,
    pub collection_id: CollectionId,
    pub partition_id: PartitionId,
    pub index_id: IndexId,
    pub build_id: BuildId,
    pub num_rows: i64,
    pub state: IndexState,
    pub index_file_keys: Vec<String>,
    /// Engine version the index files were built with.
    pub current_index_version: i32,
}
