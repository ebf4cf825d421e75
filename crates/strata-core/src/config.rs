//! Configuration for the stratadb control plane.
//!
//! Supports YAML configuration files, environment variable overrides
//! (prefix `STRATA`, separator `__`), and validated defaults.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StrataConfig {
    #[serde(default)]
    pub segment: SegmentConfig,

    #[serde(default)]
    pub compaction: CompactionConfig,

    #[serde(default)]
    pub catalog: CatalogConfig,
}

/// Segment sizing parameters.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct SegmentConfig {
    /// Target size of a sealed segment in MiB.
    pub max_size_mb: u64,
    /// Target size of a sealed segment in MiB when every vector index of
    /// the collection is disk-resident.
    pub disk_max_size_mb: u64,
    /// Maximum size of one binlog file in bytes.
    pub binlog_max_size: u64,
    /// Row-capacity headroom a compaction target may use over `max_row_num`.
    pub expansion_rate: f64,
}

/// Compaction trigger parameters.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CompactionConfig {
    /// Global default when a collection has no auto-compaction property.
    pub enable_auto_compaction: bool,
    /// Bins with fewer segments than this are discarded unless forced.
    pub min_segment_to_merge: usize,
    /// Hard cap on segments per plan.
    pub max_segment_to_merge: usize,
    /// A segment under this share of the row capacity counts as small.
    pub segment_small_proportion: f64,
    /// A bin reaching this share of the row capacity is worth merging even
    /// below the segment-count minimum.
    pub segment_compactable_proportion: f64,
    /// Delta-log file count above which a single segment is compacted.
    pub single_deltalog_max_num: usize,
    /// Deleted/expired row ratio at which a single segment is compacted.
    pub single_ratio_threshold: f64,
    /// Expired-log byte floor for expiry-triggered single compaction.
    pub single_expired_log_max_size: u64,
    /// Delta-log byte floor for delete-triggered single compaction.
    pub single_deltalog_max_size: u64,
    /// Rebuild segments indexed by an older engine version.
    pub auto_upgrade_segment_index: bool,
    /// Seconds between global trigger rounds.
    pub global_interval_secs: u64,
    /// Global default entity TTL in seconds; zero disables expiry.
    pub entity_expiration_ttl_secs: u64,
    /// Per-plan execution timeout in seconds.
    pub plan_timeout_secs: u32,
}

/// Durable catalog parameters.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CatalogConfig {
    /// SQLite connection url, e.g. `sqlite://strata.db`.
    pub url: String,
}

impl StrataConfig {
    /// Load configuration with precedence: environment variables, then the
    /// file named by `STRATA_CONFIG`, then `./config/strata.yaml`, then
    /// defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = Self::set_defaults(Config::builder())?;

        if let Ok(config_path) = std::env::var("STRATA_CONFIG") {
            builder = builder.add_source(File::with_name(&config_path).required(false));
        }
        builder = builder.add_source(File::with_name("./config/strata").required(false));

        builder = builder.add_source(
            Environment::with_prefix("STRATA")
                .separator("__")
                .try_parsing(true),
        );

        let config: StrataConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, still applying
    /// defaults underneath.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let builder = Self::set_defaults(Config::builder())?
            .add_source(File::from(path.as_ref()).required(true));
        let config: StrataConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn set_defaults(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
        builder
            // Segment sizing
            .set_default("segment.max_size_mb", 1024)?
            .set_default("segment.disk_max_size_mb", 2048)?
            .set_default("segment.binlog_max_size", 64 * 1024 * 1024)?
            .set_default("segment.expansion_rate", 1.25)?
            // Compaction trigger
            .set_default("compaction.enable_auto_compaction", true)?
            .set_default("compaction.min_segment_to_merge", 3)?
            .set_default("compaction.max_segment_to_merge", 30)?
            .set_default("compaction.segment_small_proportion", 0.5)?
            .set_default("compaction.segment_compactable_proportion", 0.85)?
            .set_default("compaction.single_deltalog_max_num", 200)?
            .set_default("compaction.single_ratio_threshold", 0.2)?
            .set_default("compaction.single_expired_log_max_size", 10 * 1024 * 1024)?
            .set_default("compaction.single_deltalog_max_size", 2 * 1024 * 1024)?
            .set_default("compaction.auto_upgrade_segment_index", false)?
            .set_default("compaction.global_interval_secs", 600)?
            .set_default("compaction.entity_expiration_ttl_secs", 0)?
            .set_default("compaction.plan_timeout_secs", 180)?
            // Catalog
            .set_default("catalog.url", "sqlite://strata.db")
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.segment.max_size_mb == 0 {
            return Err(ConfigError::Message(
                "segment.max_size_mb must be > 0".to_string(),
            ));
        }
        if self.segment.disk_max_size_mb < self.segment.max_size_mb {
            return Err(ConfigError::Message(
                "segment.disk_max_size_mb must be >= segment.max_size_mb".to_string(),
            ));
        }
        if self.segment.binlog_max_size == 0 {
            return Err(ConfigError::Message(
                "segment.binlog_max_size must be > 0".to_string(),
            ));
        }
        if self.segment.expansion_rate < 1.0 {
            return Err(ConfigError::Message(
                "segment.expansion_rate must be >= 1.0".to_string(),
            ));
        }
        if self.compaction.min_segment_to_merge < 2 {
            return Err(ConfigError::Message(
                "compaction.min_segment_to_merge must be >= 2".to_string(),
            ));
        }
        if self.compaction.max_segment_to_merge < self.compaction.min_segment_to_merge {
            return Err(ConfigError::Message(
                "compaction.max_segment_to_merge must be >= min_segment_to_merge".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.compaction.single_ratio_threshold) {
            return Err(ConfigError::Message(
                "compaction.single_ratio_threshold must be within [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.compaction.segment_small_proportion)
            || !(0.0..=1.0).contains(&self.compaction.segment_compactable_proportion)
        {
            return Err(ConfigError::Message(
                "compaction segment proportions must be within [0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

impl StrataConfig {
    /// The built-in defaults without touching files or the environment.
    #[must_use]
    pub fn defaults() -> Self {
        let builder = Self::set_defaults(Config::builder()).expect("defaults are valid");
        builder
            .build()
            .and_then(|c| c.try_deserialize())
            .expect("defaults deserialize")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StrataConfig::defaults();
        config.validate().unwrap();
        assert_eq!(config.segment.max_size_mb, 1024);
        assert_eq!(config.compaction.min_segment_to_merge, 3);
        assert!((config.segment.expansion_rate - 1.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validation_rejects_bad_expansion() {
        let mut config = StrataConfig::defaults();
        config.segment.expansion_rate = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_inverted_merge_bounds() {
        let mut config = StrataConfig::defaults();
        config.compaction.max_segment_to_merge = 2;
        assert!(config.validate().is_err());
    }
}
