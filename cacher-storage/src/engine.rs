//! Dependency-tagged invalidation engine.
//!
//! Writes snapshot dependency versions into the stored record; reads re-fetch
//! the live versions in one multi-get and compare. Invalidation is therefore a
//! single counter increment no matter how many entries share the counter, and
//! the cost moves to readers, proportional to the number of dependencies an
//! entry carries.
//!
//! # Key Layout
//!
//! | Namespace | Store key | Value |
//! |-----------|-----------|-------|
//! | entries | `key_prefix + key` | hash, see [`crate::codec`] |
//! | counters | `dependency_prefix + name` | decimal integer |
//!
//! # Consistency
//!
//! Invalidation is eventual. A `get` that read its counters just before a
//! concurrent increment committed may still return the pre-increment value.
//! Concurrent `set` calls on one key are last-write-wins.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cacher_core::{
    CacherConfig, CacherResult, Dependency, DependencyTag, SnapshotMode, StoreError,
};
use tracing::{debug, info, warn};

use crate::codec::{decode_record, encode_record, StoredRecord};
use crate::store::{Batch, Command, KvStore};
use crate::traits::{CachedValue, TaggedCache};

/// Live state of one dependency counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Counter {
    Absent,
    Present(i64),
    /// Present but not an integer; never matches a snapshot.
    Malformed,
}

impl Counter {
    fn parse(raw: Option<&[u8]>) -> Self {
        match raw {
            None => Self::Absent,
            Some(bytes) => std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.trim().parse::<i64>().ok())
                .map_or(Self::Malformed, Self::Present),
        }
    }

    /// Whether the live counter still equals the snapshot version. A counter
    /// that was never written reads as version 0.
    fn matches(self, version: i64) -> bool {
        match self {
            Self::Absent => version == 0,
            Self::Present(current) => current == version,
            Self::Malformed => false,
        }
    }

    fn version_or_zero(self) -> i64 {
        match self {
            Self::Present(current) => current,
            Self::Absent | Self::Malformed => 0,
        }
    }
}

/// Cache engine over any [`KvStore`].
///
/// Holds no mutable state of its own; every operation is a bounded sequence
/// of store round trips, so one instance can be shared freely between tasks.
///
/// # Example
///
/// ```ignore
/// let cache = DependencyCache::new(store, CacherConfig::new("cache:", "dep:"))?;
///
/// let users = Dependency::new("users", 0);
/// cache.set_dependency(None, &[&users]).await?;
/// cache.set("user:1", "alice", Some(Duration::from_secs(300)), &[&users]).await?;
///
/// // Any write to the users table:
/// cache.incr_dependency(None, &["users"]).await?;
/// assert!(cache.get("user:1").await?.is_none());
/// ```
#[derive(Debug)]
pub struct DependencyCache<S: KvStore> {
    store: Arc<S>,
    config: CacherConfig,
}

impl<S: KvStore> DependencyCache<S> {
    /// Create a cache over `store`. Fails if the configuration is invalid.
    pub fn new(store: Arc<S>, config: CacherConfig) -> CacherResult<Self> {
        config.validate()?;
        Ok(Self { store, config })
    }

    pub fn config(&self) -> &CacherConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Store key of a cache entry.
    pub fn entry_key(&self, key: &str) -> String {
        format!("{}{}", self.config.key_prefix, key)
    }

    /// Store key of a dependency counter.
    pub fn dependency_key(&self, name: &str) -> String {
        format!("{}{}", self.config.dependency_prefix, name)
    }

    /// Store `value` under `key` with a snapshot of `dependencies`.
    ///
    /// In the default [`SnapshotMode::Live`] the snapshot holds the counters'
    /// current values, read just before the write; the versions carried by
    /// `dependencies` only matter in [`SnapshotMode::Caller`].
    ///
    /// The previous record is removed and the new one written in the same
    /// batch, so readers never see a mix of the two.
    pub async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        dependencies: &[&dyn DependencyTag],
    ) -> CacherResult<()> {
        let record = match self.config.snapshot {
            SnapshotMode::Caller => StoredRecord::new(value, dependencies),
            SnapshotMode::Live => {
                let names: Vec<&str> = dependencies.iter().map(|d| d.key()).collect();
                let counters = self.read_counters(&names).await?;
                StoredRecord {
                    value: value.to_string(),
                    dependencies: names
                        .iter()
                        .zip(counters)
                        .map(|(name, counter)| Dependency::new(*name, counter.version_or_zero()))
                        .collect(),
                }
            }
        };

        let fields = encode_record(&record, self.config.compress)?;
        let entry_key = self.entry_key(key);

        let mut batch = Batch::new()
            .del(vec![entry_key.clone()])
            .hset(entry_key.clone(), fields);
        if let Some(ttl) = ttl {
            batch = batch.expire(entry_key, ttl);
        }
        self.store.exec(batch).await?;

        debug!(
            cache = self.config.log_tag(),
            key,
            dependencies = record.dependencies.len(),
            ttl = ?ttl,
            "Stored cache entry"
        );

        if let Some(ttl) = ttl {
            self.refresh_dependency_ttl(ttl, &record.dependencies).await;
        }
        Ok(())
    }

    /// Read `key` and validate its dependency snapshot.
    pub async fn get(&self, key: &str) -> CacherResult<Option<CachedValue>> {
        let entry_key = self.entry_key(key);

        let fetched = self.store.hget_all(&entry_key).await;
        let fields = match fetched {
            Ok(fields) => fields,
            Err(StoreError::WrongType { .. }) => {
                warn!(
                    cache = self.config.log_tag(),
                    key, "Cache key holds a non-hash value, dropping it"
                );
                self.store.del(&[entry_key]).await?;
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        if fields.is_empty() {
            return Ok(None);
        }

        let record = match decode_record(&fields) {
            Ok(record) => record,
            Err(e) => {
                warn!(
                    cache = self.config.log_tag(),
                    key,
                    error = %e,
                    "Dropping unreadable cache entry"
                );
                self.store.del(&[entry_key]).await?;
                return Ok(None);
            }
        };

        if record.dependencies.is_empty() {
            return Ok(Some(record.into()));
        }

        let names: Vec<&str> = record.dependencies.iter().map(|d| d.key.as_str()).collect();
        let counters = self.read_counters(&names).await?;

        let stale = record
            .dependencies
            .iter()
            .zip(&counters)
            .find(|(dep, counter)| !counter.matches(dep.value));

        if let Some((dep, counter)) = stale {
            debug!(
                cache = self.config.log_tag(),
                key,
                dependency = %dep.key,
                snapshot = dep.value,
                current = ?counter,
                "Invalidating stale cache entry"
            );
            self.store.del(&[entry_key]).await?;
            return Ok(None);
        }

        Ok(Some(record.into()))
    }

    /// Remove `key`; a missing key is not an error.
    pub async fn del(&self, key: &str) -> CacherResult<()> {
        self.store.del(&[self.entry_key(key)]).await?;
        Ok(())
    }

    /// Increment each named counter by one.
    ///
    /// A single name without a TTL is one `INCR`; anything else goes out as
    /// one batch. Each increment is atomic on its own; the batch only bounds
    /// submission, so concurrent readers may observe some increments before
    /// others.
    pub async fn incr_dependency(&self, ttl: Option<Duration>, names: &[&str]) -> CacherResult<()> {
        match (names, ttl) {
            ([], _) => return Ok(()),
            ([name], None) => {
                self.store.incr(&self.dependency_key(name)).await?;
            }
            _ => {
                let mut batch = Batch::new();
                for name in names {
                    let key = self.dependency_key(name);
                    if let Some(ttl) = ttl {
                        batch.push(Command::Incr { key: key.clone() });
                        batch.push(Command::Expire { key, ttl });
                    } else {
                        batch.push(Command::Incr { key });
                    }
                }
                self.store.exec(batch).await?;
            }
        }

        debug!(
            cache = self.config.log_tag(),
            dependencies = ?names,
            "Incremented dependency counters"
        );
        Ok(())
    }

    /// Overwrite counters with explicit values.
    pub async fn set_dependency(
        &self,
        ttl: Option<Duration>,
        dependencies: &[&dyn DependencyTag],
    ) -> CacherResult<()> {
        if dependencies.is_empty() {
            return Ok(());
        }

        let mut batch = Batch::new();
        for dep in dependencies {
            let key = self.dependency_key(dep.key());
            batch.push(Command::Set {
                key: key.clone(),
                value: dep.value().to_string().into_bytes(),
            });
            if let Some(ttl) = ttl {
                batch.push(Command::Expire { key, ttl });
            }
        }
        self.store.exec(batch).await?;

        debug!(
            cache = self.config.log_tag(),
            count = dependencies.len(),
            "Set dependency counters"
        );
        Ok(())
    }

    /// Current values of the named counters, in request order. Missing
    /// counters are omitted; so are values that are not integers.
    pub async fn get_dependencies(&self, names: &[&str]) -> CacherResult<Vec<Dependency>> {
        let counters = self.read_counters(names).await?;

        let mut found = Vec::with_capacity(names.len());
        for (name, counter) in names.iter().zip(counters) {
            match counter {
                Counter::Present(value) => found.push(Dependency::new(*name, value)),
                Counter::Malformed => {
                    warn!(
                        cache = self.config.log_tag(),
                        dependency = *name,
                        "Dependency counter is not an integer"
                    );
                }
                Counter::Absent => {}
            }
        }
        Ok(found)
    }

    /// Remove every key in both namespaces.
    ///
    /// Counters are cleared first, then entries. The passes are independent:
    /// an entry written while `clear` runs may survive it. If that entry
    /// carries a non-zero snapshot it is invalidated on its next read (the
    /// counter is gone); an entry with no dependencies, or only version-0
    /// ones, stays readable until it expires.
    pub async fn clear(&self) -> CacherResult<()> {
        let counters = self.clear_namespace(&self.config.dependency_prefix).await?;
        let entries = self.clear_namespace(&self.config.key_prefix).await?;

        info!(
            cache = self.config.log_tag(),
            counters, entries, "Cleared cache namespaces"
        );
        Ok(())
    }

    async fn clear_namespace(&self, prefix: &str) -> CacherResult<u64> {
        let mut cursor = 0;
        let mut removed = 0;
        loop {
            let page = self
                .store
                .scan(cursor, prefix, self.config.scan_batch_size)
                .await?;
            if !page.keys.is_empty() {
                removed += self.store.del(&page.keys).await?;
            }
            cursor = page.cursor;
            if cursor == 0 {
                return Ok(removed);
            }
        }
    }

    async fn read_counters(&self, names: &[&str]) -> CacherResult<Vec<Counter>> {
        if names.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = names.iter().map(|name| self.dependency_key(name)).collect();
        let values = self.store.mget(&keys).await?;

        let mut counters: Vec<Counter> = values
            .iter()
            .map(|raw| Counter::parse(raw.as_deref()))
            .collect();
        // A short reply means the tail was not found.
        counters.resize(names.len(), Counter::Absent);
        Ok(counters)
    }

    /// Push out the expiry of referenced counters that already have one, so
    /// they outlive the entries snapshotting them. Counters without a TTL keep
    /// none: once expired a counter reads as absent, which matches version 0
    /// and would revive entries an earlier increment invalidated.
    async fn refresh_dependency_ttl(&self, ttl: Duration, dependencies: &[Dependency]) {
        if self.config.dependency_ttl_factor == 0 || dependencies.is_empty() {
            return;
        }
        let dependency_ttl = ttl
            .checked_mul(self.config.dependency_ttl_factor)
            .unwrap_or(Duration::MAX);

        let mut batch = Batch::new();
        for dep in dependencies {
            batch.push(Command::ExtendExpire {
                key: self.dependency_key(&dep.key),
                ttl: dependency_ttl,
            });
        }
        if let Err(e) = self.store.exec(batch).await {
            warn!(
                cache = self.config.log_tag(),
                error = %e,
                "Failed to refresh dependency TTL"
            );
        }
    }
}

impl<S: KvStore> Clone for DependencyCache<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: self.config.clone(),
        }
    }
}

#[async_trait]
impl<S: KvStore> TaggedCache for DependencyCache<S> {
    async fn set(
        &self,
        key: &str,
        value: &str,
        ttl: Option<Duration>,
        dependencies: &[&dyn DependencyTag],
    ) -> CacherResult<()> {
        DependencyCache::set(self, key, value, ttl, dependencies).await
    }

    async fn get(&self, key: &str) -> CacherResult<Option<CachedValue>> {
        DependencyCache::get(self, key).await
    }

    async fn del(&self, key: &str) -> CacherResult<()> {
        DependencyCache::del(self, key).await
    }

    async fn incr_dependency(&self, ttl: Option<Duration>, names: &[&str]) -> CacherResult<()> {
        DependencyCache::incr_dependency(self, ttl, names).await
    }

    async fn set_dependency(
        &self,
        ttl: Option<Duration>,
        dependencies: &[&dyn DependencyTag],
    ) -> CacherResult<()> {
        DependencyCache::set_dependency(self, ttl, dependencies).await
    }

    async fn get_dependencies(&self, names: &[&str]) -> CacherResult<Vec<Dependency>> {
        DependencyCache::get_dependencies(self, names).await
    }

    async fn clear(&self) -> CacherResult<()> {
        DependencyCache::clear(self).await
    }
}
