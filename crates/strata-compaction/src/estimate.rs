//! Segment row-capacity estimation.
//!
//! A compaction target should fill one segment; its row capacity derives
//! from the configured segment byte size divided by the schema's estimated
//! per-row size. Collections whose vector fields are all served by
//! disk-resident ANN indexes get the larger disk segment size.

use strata_core::{CollectionSchema, IndexMeta, MetaError, MetaResult, SegmentConfig};

/// Estimated row capacity for a segment of `max_size_bytes`.
///
/// # Errors
///
/// Returns `MetaError::Parameter` when the schema has no sized fields.
pub fn max_rows_by_schema(schema: &CollectionSchema, max_size_bytes: u64) -> MetaResult<i64> {
    let row_size = schema.row_byte_size();
    if row_size == 0 {
        return Err(MetaError::Parameter(format!(
            "collection schema `{}` has zero estimated row size",
            schema.name
        )));
    }
    Ok((max_size_bytes / row_size) as i64)
}

/// Whether every vector field of the collection is covered by a DiskANN
/// index. Collections without any vector index stay on the memory policy.
#[must_use]
pub fn collection_uses_disk_index(schema: &CollectionSchema, indexes: &[IndexMeta]) -> bool {
    let vector_fields = schema.vector_field_ids();
    if vector_fields.is_empty() {
        return false;
    }
    let vector_indexes: Vec<&IndexMeta> = indexes
        .iter()
        .filter(|i| !i.is_deleted && vector_fields.contains(&i.field_id))
        .collect();
    !vector_indexes.is_empty() && vector_indexes.iter().all(|i| i.is_diskann())
}

/// Row capacity for the collection under the configured segment sizes.
///
/// # Errors
///
/// Returns `MetaError::Parameter` when the schema has no sized fields.
pub fn segment_max_rows(
    schema: &CollectionSchema,
    indexes: &[IndexMeta],
    config: &SegmentConfig,
) -> MetaResult<i64> {
    let max_size_mb = if collection_uses_disk_index(schema, indexes) {
        config.disk_max_size_mb
    } else {
        config.max_size_mb
    };
    max_rows_by_schema(schema, max_size_mb * 1024 * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::index::{INDEX_TYPE_DISKANN, INDEX_TYPE_HNSW, INDEX_TYPE_KEY};
    use strata_core::{DataType, FieldId, FieldSchema, IndexId, StrataConfig};

    fn schema(dim: u32) -> CollectionSchema {
        CollectionSchema {
            name: "docs".into(),
            fields: vec![
                FieldSchema {
                    field_id: FieldId::new(1),
                    name: "pk".into(),
                    data_type: DataType::Int64,
                    dim: 0,
                },
                FieldSchema {
                    field_id: FieldId::new(101),
                    name: "embedding".into(),
                    data_type: DataType::FloatVector,
                    dim,
                },
            ],
        }
    }

    fn index(index_type: &str) -> IndexMeta {
        IndexMeta {
            index_id: IndexId::new(1),
            field_id: FieldId::new(101),
            index_params: vec![(INDEX_TYPE_KEY.into(), index_type.into())],
            ..IndexMeta::default()
        }
    }

    #[test]
    fn test_max_rows_by_schema() {
        // 8 bytes pk + 128 * 4 bytes vector = 520 bytes per row
        let rows = max_rows_by_schema(&schema(128), 520 * 1000).unwrap();
        assert_eq!(rows, 1000);
    }

    #[test]
    fn test_empty_schema_is_an_error() {
        let empty = CollectionSchema::default();
        assert!(max_rows_by_schema(&empty, 1024).is_err());
    }

    #[test]
    fn test_disk_index_detection() {
        let schema = schema(128);
        assert!(!collection_uses_disk_index(&schema, &[]));
        assert!(collection_uses_disk_index(&schema, &[index(INDEX_TYPE_DISKANN)]));
        assert!(!collection_uses_disk_index(&schema, &[index(INDEX_TYPE_HNSW)]));
        assert!(!collection_uses_disk_index(
            &schema,
            &[index(INDEX_TYPE_DISKANN), index(INDEX_TYPE_HNSW)]
        ));
    }

    #[test]
    fn test_disk_policy_doubles_capacity() {
        let config = StrataConfig::defaults().segment;
        let schema = schema(128);
        let memory_rows = segment_max_rows(&schema, &[], &config).unwrap();
        let disk_rows =
            segment_max_rows(&schema, &[index(INDEX_TYPE_DISKANN)], &config).unwrap();
        assert_eq!(disk_rows, memory_rows * 2);
    }
}
