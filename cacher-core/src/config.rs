//! Configuration types

use crate::error::{CacherResult, ConfigError};
use serde::{Deserialize, Serialize};

/// Default page size for namespace scans during `clear`.
pub const DEFAULT_SCAN_BATCH_SIZE: usize = 100;

/// Default multiplier applied to an entry TTL when refreshing the TTL of the
/// counters it references.
pub const DEFAULT_DEPENDENCY_TTL_FACTOR: u32 = 2;

/// Where the versions recorded in a stored snapshot come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotMode {
    /// Read the live counters at write time and record those (absent as 0).
    #[default]
    Live,
    /// Record the versions carried by the dependencies passed to `set`.
    Caller,
}

/// Cache configuration, fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacherConfig {
    /// Prefix for cache-entry keys.
    pub key_prefix: String,
    /// Prefix for dependency-counter keys.
    pub dependency_prefix: String,
    /// Tag attached to every log event emitted by the cache.
    #[serde(default)]
    pub log_prefix: Option<String>,
    /// Deflate-compress stored records.
    #[serde(default)]
    pub compress: bool,
    #[serde(default)]
    pub snapshot: SnapshotMode,
    /// Page size hint for namespace scans.
    #[serde(default = "default_scan_batch_size")]
    pub scan_batch_size: usize,
    /// Counters referenced by an entry get `ttl * factor`; 0 disables.
    #[serde(default = "default_dependency_ttl_factor")]
    pub dependency_ttl_factor: u32,
}

fn default_scan_batch_size() -> usize {
    DEFAULT_SCAN_BATCH_SIZE
}

fn default_dependency_ttl_factor() -> u32 {
    DEFAULT_DEPENDENCY_TTL_FACTOR
}

impl CacherConfig {
    /// Create a config with the two required namespace prefixes.
    pub fn new(key_prefix: impl Into<String>, dependency_prefix: impl Into<String>) -> Self {
        Self {
            key_prefix: key_prefix.into(),
            dependency_prefix: dependency_prefix.into(),
            log_prefix: None,
            compress: false,
            snapshot: SnapshotMode::default(),
            scan_batch_size: DEFAULT_SCAN_BATCH_SIZE,
            dependency_ttl_factor: DEFAULT_DEPENDENCY_TTL_FACTOR,
        }
    }

    /// Set the log tag.
    pub fn with_log_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.log_prefix = Some(prefix.into());
        self
    }

    /// Enable or disable record compression.
    pub fn with_compression(mut self, enabled: bool) -> Self {
        self.compress = enabled;
        self
    }

    /// Set the snapshot mode.
    pub fn with_snapshot(mut self, mode: SnapshotMode) -> Self {
        self.snapshot = mode;
        self
    }

    /// Set the scan page size.
    pub fn with_scan_batch_size(mut self, size: usize) -> Self {
        self.scan_batch_size = size;
        self
    }

    /// Set the dependency TTL multiplier.
    pub fn with_dependency_ttl_factor(mut self, factor: u32) -> Self {
        self.dependency_ttl_factor = factor;
        self
    }

    /// Log tag, empty when none is configured.
    pub fn log_tag(&self) -> &str {
        self.log_prefix.as_deref().unwrap_or("")
    }

    /// Validate the configuration.
    ///
    /// The two namespaces must be non-empty and disjoint: if one prefix starts
    /// with the other, cache keys could alias counter keys and `clear` on one
    /// namespace would sweep the other.
    pub fn validate(&self) -> CacherResult<()> {
        if self.key_prefix.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "key_prefix".to_string(),
            }
            .into());
        }

        if self.dependency_prefix.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "dependency_prefix".to_string(),
            }
            .into());
        }

        if self.key_prefix.starts_with(&self.dependency_prefix)
            || self.dependency_prefix.starts_with(&self.key_prefix)
        {
            return Err(ConfigError::IncompatibleOptions {
                option_a: format!("key_prefix={}", self.key_prefix),
                option_b: format!("dependency_prefix={}", self.dependency_prefix),
            }
            .into());
        }

        if self.scan_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scan_batch_size".to_string(),
                value: self.scan_batch_size.to_string(),
                reason: "scan_batch_size must be positive".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacherError;

    fn assert_config_error(config: &CacherConfig, expected_field: &str) {
        match config.validate() {
            Err(CacherError::Config(ConfigError::MissingRequired { field }))
            | Err(CacherError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, expected_field);
            }
            other => panic!("expected config error for {}, got {:?}", expected_field, other),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = CacherConfig::new("test-key", "test-dep");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_key_prefix_rejected() {
        assert_config_error(&CacherConfig::new("", "test-dep"), "key_prefix");
    }

    #[test]
    fn test_empty_dependency_prefix_rejected() {
        assert_config_error(&CacherConfig::new("test-key", ""), "dependency_prefix");
    }

    #[test]
    fn test_overlapping_prefixes_rejected() {
        for (key, dep) in [("c:", "c:"), ("test-", "test-dep"), ("cache:dep", "cache:")] {
            let result = CacherConfig::new(key, dep).validate();
            assert!(
                matches!(
                    result,
                    Err(CacherError::Config(ConfigError::IncompatibleOptions { .. }))
                ),
                "{} / {} should be rejected",
                key,
                dep
            );
        }
    }

    #[test]
    fn test_zero_scan_batch_rejected() {
        let config = CacherConfig::new("k:", "d:").with_scan_batch_size(0);
        assert_config_error(&config, "scan_batch_size");
    }

    #[test]
    fn test_builder() {
        let config = CacherConfig::new("k:", "d:")
            .with_log_prefix("[R]")
            .with_compression(true)
            .with_snapshot(SnapshotMode::Caller)
            .with_scan_batch_size(10)
            .with_dependency_ttl_factor(0);

        assert_eq!(config.log_tag(), "[R]");
        assert!(config.compress);
        assert_eq!(config.snapshot, SnapshotMode::Caller);
        assert_eq!(config.scan_batch_size, 10);
        assert_eq!(config.dependency_ttl_factor, 0);
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let config: CacherConfig =
            serde_json::from_str(r#"{"key_prefix":"k:","dependency_prefix":"d:"}"#)
                .expect("deserialize should succeed");

        assert_eq!(config, CacherConfig::new("k:", "d:"));
        assert_eq!(config.log_tag(), "");
        assert_eq!(config.snapshot, SnapshotMode::Live);
    }

    #[test]
    fn test_deserialize_snapshot_mode() {
        let config: CacherConfig = serde_json::from_str(
            r#"{"key_prefix":"k:","dependency_prefix":"d:","snapshot":"caller","compress":true}"#,
        )
        .expect("deserialize should succeed");

        assert_eq!(config.snapshot, SnapshotMode::Caller);
        assert!(config.compress);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        /// Any pair of non-empty prefixes where neither starts with the other validates.
        #[test]
        fn prop_disjoint_prefixes_validate(
            key in "[a-z]{1,8}",
            dep in "[a-z]{1,8}",
        ) {
            let config = CacherConfig::new(format!("k{}:", key), format!("d{}:", dep));
            prop_assert!(config.validate().is_ok());
        }

        /// Extending a prefix always yields an overlapping (rejected) pair.
        #[test]
        fn prop_nested_prefixes_rejected(base in "[a-z]{1,8}", suffix in "[a-z]{0,8}") {
            let config = CacherConfig::new(base.clone(), format!("{}{}", base, suffix));
            prop_assert!(config.validate().is_err());
        }
    }
}
