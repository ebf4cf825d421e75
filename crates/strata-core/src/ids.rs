use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

macro_rules! define_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(
            Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize,
            Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(i64);

        impl $name {
            /// Wraps an allocator-issued raw identifier.
            #[must_use]
            pub const fn new(raw: i64) -> Self {
                Self(raw)
            }

            /// Returns the raw identifier value.
            #[must_use]
            pub const fn as_i64(&self) -> i64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl From<i64> for $name {
            fn from(value: i64) -> Self {
                Self(value)
            }
        }

        impl From<$name> for i64 {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

define_id!(SegmentId, "Unique identifier for a segment.");
define_id!(CollectionId, "Unique identifier for a collection.");
define_id!(
    PartitionId,
    "Unique identifier for a partition within a collection."
);
define_id!(FieldId, "Unique identifier for a field within a schema.");
define_id!(LogId, "Unique identifier for a single binlog file.");
define_id!(PlanId, "Unique identifier for a compaction plan.");
define_id!(IndexId, "Unique identifier for an index definition.");
define_id!(BuildId, "Unique identifier for an index build job.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_roundtrip() {
        let id = SegmentId::new(42);
        assert_eq!(id.as_i64(), 42);
        assert_eq!(id.to_string(), "42");
        assert_eq!("42".parse::<SegmentId>().unwrap(), id);
    }

    #[test]
    fn test_id_serde_transparent() {
        let id = CollectionId::new(7);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "7");
        let back: CollectionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
