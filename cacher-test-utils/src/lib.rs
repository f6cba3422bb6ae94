//! Cacher Test Utilities
//!
//! Shared test infrastructure for the cacher workspace:
//! - A store that fails every call, for error propagation tests
//! - Proptest generators for dependencies and cached values
//! - Fixtures for a ready-to-use in-memory cache
//! - Assertions for cacher error variants

pub use cacher_core::{
    CacherConfig, CacherError, CacherResult, Dependency, DependencyTag, SnapshotMode, StoreError,
    StoreResult,
};
pub use cacher_storage::{
    Batch, CachedValue, DependencyCache, InMemoryStore, KvStore, ScanPage, TaggedCache,
};

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ============================================================================
// MOCK STORES
// ============================================================================

/// Store whose every call fails with a connection error.
#[derive(Debug, Clone)]
pub struct FailingStore {
    reason: String,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::with_reason("connection refused")
    }

    pub fn with_reason(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn error(&self) -> StoreError {
        StoreError::Connection {
            reason: self.reason.clone(),
        }
    }
}

impl Default for FailingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for FailingStore {
    async fn hget_all(&self, _key: &str) -> StoreResult<HashMap<String, Vec<u8>>> {
        Err(self.error())
    }

    async fn mget(&self, _keys: &[String]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        Err(self.error())
    }

    async fn incr(&self, _key: &str) -> StoreResult<i64> {
        Err(self.error())
    }

    async fn expire(&self, _key: &str, _ttl: Duration) -> StoreResult<bool> {
        Err(self.error())
    }

    async fn del(&self, _keys: &[String]) -> StoreResult<u64> {
        Err(self.error())
    }

    async fn scan(&self, _cursor: u64, _prefix: &str, _count: usize) -> StoreResult<ScanPage> {
        Err(self.error())
    }

    async fn exec(&self, _batch: Batch) -> StoreResult<()> {
        Err(self.error())
    }
}

/// Install a test-friendly `tracing` subscriber.
///
/// Honours `RUST_LOG`; defaults to debug output from the cache engine. Safe to
/// call from every test, only the first call installs anything.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cacher_storage=debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for dependencies and cached values.

    use super::*;
    use proptest::prelude::*;

    /// Generate a dependency name.
    pub fn arb_dependency_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9:_-]{0,15}"
    }

    /// Generate a non-negative dependency version.
    pub fn arb_version() -> impl Strategy<Value = i64> {
        0i64..10_000
    }

    /// Generate a single dependency.
    pub fn dependency_strategy() -> impl Strategy<Value = Dependency> {
        (arb_dependency_name(), arb_version()).prop_map(|(key, value)| Dependency::new(key, value))
    }

    /// Generate up to eight dependencies with distinct names.
    pub fn unique_dependencies_strategy() -> impl Strategy<Value = Vec<Dependency>> {
        prop::collection::btree_map(arb_dependency_name(), arb_version(), 0..8).prop_map(|deps| {
            deps.into_iter()
                .map(|(key, value)| Dependency::new(key, value))
                .collect()
        })
    }

    /// Generate a cached value, including empty and non-ASCII strings.
    pub fn arb_value() -> impl Strategy<Value = String> {
        prop_oneof![
            Just(String::new()),
            "[ -~]{1,64}",
            "\\PC{1,32}",
            "[a-z]{1,8}".prop_map(|s| s.repeat(256)),
        ]
    }

    /// Generate an entry key.
    pub fn arb_key() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9:/_-]{1,32}"
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common cache scenarios.

    use super::*;
    use std::sync::Arc;

    /// Config used throughout the test suites.
    pub fn test_config() -> CacherConfig {
        CacherConfig::new("test-key", "test-dep").with_log_prefix("[R]")
    }

    /// Cache over a fresh in-memory store.
    pub fn memory_cache(compress: bool) -> DependencyCache<InMemoryStore> {
        cache_with(test_config().with_compression(compress))
    }

    /// Cache over a fresh in-memory store with a custom config.
    pub fn cache_with(config: CacherConfig) -> DependencyCache<InMemoryStore> {
        DependencyCache::new(Arc::new(InMemoryStore::new()), config)
            .expect("test config should be valid")
    }

    /// Cache whose store fails every call.
    pub fn failing_cache() -> DependencyCache<FailingStore> {
        DependencyCache::new(Arc::new(FailingStore::new()), test_config())
            .expect("test config should be valid")
    }
}

pub use fixtures::{memory_cache, test_config};
pub use generators::{dependency_strategy, unique_dependencies_strategy};

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cacher-specific results.

    use super::*;

    /// Assert that a CacherResult is a Store error.
    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &CacherResult<T>) {
        match result {
            Err(CacherError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }

    /// Assert that a CacherResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &CacherResult<T>) {
        match result {
            Err(CacherError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a lookup was a hit carrying `expected`.
    #[track_caller]
    pub fn assert_hit(result: &CacherResult<Option<CachedValue>>, expected: &str) {
        match result {
            Ok(Some(cached)) => assert_eq!(cached.value, expected, "Wrong cached value"),
            other => panic!("Expected hit with {:?}, got: {:?}", expected, other),
        }
    }

    /// Assert that a lookup was a miss.
    #[track_caller]
    pub fn assert_miss(result: &CacherResult<Option<CachedValue>>) {
        match result {
            Ok(None) => {}
            other => panic!("Expected miss, got: {:?}", other),
        }
    }
}
