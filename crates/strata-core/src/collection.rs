use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{MetaError, MetaResult};
use crate::ids::{CollectionId, FieldId, PartitionId};
use crate::segment::StreamPosition;

/// Collection property key holding the per-collection TTL in seconds.
pub const PROPERTY_COLLECTION_TTL_SECONDS: &str = "collection.ttl.seconds";
/// Collection property key enabling or disabling automatic compaction.
pub const PROPERTY_AUTO_COMPACTION_ENABLED: &str = "collection.autocompaction.enabled";

/// Field value type. Only the widths matter to the control plane: they feed
/// the per-row size estimate that sizes compaction targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    VarChar,
    FloatVector,
    BinaryVector,
    Float16Vector,
}

impl DataType {
    /// Whether the type is a vector type.
    #[must_use]
    pub const fn is_vector(&self) -> bool {
        matches!(
            self,
            Self::FloatVector | Self::BinaryVector | Self::Float16Vector
        )
    }
}

/// Schema of a single field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub field_id: FieldId,
    pub name: String,
    pub data_type: DataType,
    /// Vector dimension; zero for scalar fields.
    #[serde(default)]
    pub dim: u32,
}

impl FieldSchema {
    /// Estimated bytes one row of this field occupies in insert logs.
    #[must_use]
    pub fn row_byte_size(&self) -> u64 {
        match self.data_type {
            DataType::Bool | DataType::Int8 => 1,
            DataType::Int16 => 2,
            DataType::Int32 | DataType::Float => 4,
            DataType::Int64 | DataType::Double => 8,
            // average, the control plane only needs an estimate
            DataType::VarChar => 64,
            DataType::FloatVector => u64::from(self.dim) * 4,
            DataType::BinaryVector => u64::from(self.dim) / 8,
            DataType::Float16Vector => u64::from(self.dim) * 2,
        }
    }
}

/// Schema of a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
}

impl CollectionSchema {
    /// Ids of all vector fields.
    #[must_use]
    pub fn vector_field_ids(&self) -> Vec<FieldId> {
        self.fields
            .iter()
            .filter(|f| f.data_type.is_vector())
            .map(|f| f.field_id)
            .collect()
    }

    /// Estimated bytes per row across all fields.
    #[must_use]
    pub fn row_byte_size(&self) -> u64 {
        self.fields.iter().map(FieldSchema::row_byte_size).sum()
    }
}

/// Cached collection metadata. The control plane caches this from the
/// upstream coordinator; only `properties` ever changes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionInfo {
    pub id: CollectionId,
    pub schema: CollectionSchema,
    pub partitions: Vec<PartitionId>,
    pub start_positions: Vec<StreamPosition>,
    pub properties: HashMap<String, String>,
    /// Creation time as a cluster timestamp.
    pub created_at: u64,
}

impl CollectionInfo {
    /// Per-collection TTL in seconds, or `default` when the property is
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns `MetaError::Parameter` when the property is present but not
    /// an integer.
    pub fn ttl_seconds(&self, default: u64) -> MetaResult<u64> {
        match self.properties.get(PROPERTY_COLLECTION_TTL_SECONDS) {
            Some(raw) => raw.parse::<u64>().map_err(|_| {
                MetaError::Parameter(format!(
                    "collection {} has malformed ttl property: {raw}",
                    self.id
                ))
            }),
            None => Ok(default),
        }
    }

    /// Whether automatic compaction is enabled, falling back to `default`
    /// when the property is absent.
    ///
    /// # Errors
    ///
    /// Returns `MetaError::Parameter` when the property is present but not
    /// a boolean.
    pub fn auto_compaction_enabled(&self, default: bool) -> MetaResult<bool> {
        match self.properties.get(PROPERTY_AUTO_COMPACTION_ENABLED) {
            Some(raw) => raw.parse::<bool>().map_err(|_| {
                MetaError::Parameter(format!(
                    "collection {} has malformed autocompaction property: {raw}",
                    self.id
                ))
            }),
            None => Ok(default),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> CollectionSchema {
        CollectionSchema {
            name: "docs".into(),
            fields: vec![
                FieldSchema {
                    field_id: FieldId::new(100),
                    name: "pk".into(),
                    data_type: DataType::Int64,
                    dim: 0,
                },
                FieldSchema {
                    field_id: FieldId::new(101),
                    name: "embedding".into(),
                    data_type: DataType::FloatVector,
                    dim: 128,
                },
            ],
        }
    }

    #[test]
    fn test_vector_fields_and_row_size() {
        let schema = schema();
        assert_eq!(schema.vector_field_ids(), vec![FieldId::new(101)]);
        assert_eq!(schema.row_byte_size(), 8 + 128 * 4);
    }

    #[test]
    fn test_ttl_property_parsing() {
        let mut info = CollectionInfo {
            schema: schema(),
            ..CollectionInfo::default()
        };
        assert_eq!(info.ttl_seconds(0).unwrap(), 0);

        info.properties
            .insert(PROPERTY_COLLECTION_TTL_SECONDS.into(), "3600".into());
        assert_eq!(info.ttl_seconds(0).unwrap(), 3600);

        info.properties
            .insert(PROPERTY_COLLECTION_TTL_SECONDS.into(), "never".into());
        assert!(matches!(
            info.ttl_seconds(0),
            Err(MetaError::Parameter(_))
        ));
    }

    #[test]
    fn test_auto_compaction_property_parsing() {
        let mut info = CollectionInfo::default();
        assert!(info.auto_compaction_enabled(true).unwrap());

        info.properties
            .insert(PROPERTY_AUTO_COMPACTION_ENABLED.into(), "false".into());
        assert!(!info.auto_compaction_enabled(true).unwrap());

        info.properties
            .insert(PROPERTY_AUTO_COMPACTION_ENABLED.into(), "maybe".into());
        assert!(info.auto_compaction_enabled(true).is_err());
    }
}
