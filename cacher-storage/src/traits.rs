//! Caller-facing cache contract.

use std::time::Duration;

use async_trait::async_trait;
use cacher_core::{CacherResult, Dependency, DependencyTag};

use crate::codec::StoredRecord;

/// A cache hit: the stored value and the dependency snapshot it carried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedValue {
    pub value: String,
    pub dependencies: Vec<Dependency>,
}

impl From<StoredRecord> for CachedValue {
    fn from(record: StoredRecord) -> Self {
        Self {
            value: record.value,
            dependencies: record.dependencies,
        }
    }
}

/// Cache whose entries are invalidated through named dependency counters.
///
/// A value is stored together with the versions of the counters it depends
/// on. Incrementing (or overwriting) any of those counters makes the value
/// unreadable: the next `get` sees the mismatch, deletes the entry and reports
/// a miss. Nothing tracks which entries reference which counter.
///
/// # Error Semantics
///
/// Only store failures are returned as errors. A missing entry, an entry whose
/// snapshot no longer matches, and an entry that cannot be decoded are all
/// reported as `Ok(None)` from `get`.
#[async_trait]
pub trait TaggedCache: Send + Sync {
    /// Store `value` under `key`, recording a snapshot of `dependencies`.
    ///
    /// With a `ttl` the entry expires on its own. Referenced counters that
    /// already expire have their expiry pushed out; persistent counters stay
    /// persistent.
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        dependencies: &[&dyn DependencyTag],
    ) -> CacherResult<()>;

    /// Read `key`, validating its snapshot against the live counters.
    async fn get(&self, key: &str) -> CacherResult<Option<CachedValue>>;

    /// Remove `key`. Removing a missing key succeeds.
    async fn del(&self, key: &str) -> CacherResult<()>;

    /// Increment each named counter by one, invalidating every entry stored
    /// against its previous value.
    async fn incr_dependency(&self, ttl: Option<Duration>, names: &[&str]) -> CacherResult<()>;

    /// Overwrite counters with explicit values.
    async fn set_dependency(
        &self,
        ttl: Option<Duration>,
        dependencies: &[&dyn DependencyTag],
    ) -> CacherResult<()>;

    /// Current values of the named counters. Counters that do not exist are
    /// left out rather than reported as zero.
    async fn get_dependencies(&self, names: &[&str]) -> CacherResult<Vec<Dependency>>;

    /// Remove every counter and every entry in both namespaces.
    async fn clear(&self) -> CacherResult<()>;
}
