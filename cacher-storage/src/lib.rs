//! Cacher Storage - Dependency-Tagged Cache Engine
//!
//! Caches string values in a remote key-value store and invalidates them
//! lazily through named version counters ("dependencies").
//!
//! - [`DependencyCache`] is the engine, generic over a [`KvStore`].
//! - [`InMemoryStore`] is a process-local store with the same semantics as
//!   the remote one, used by tests and single-process deployments.
//! - `RedisStore` (feature `redis`) talks to a Redis server.

pub mod codec;
pub mod engine;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod store;
pub mod traits;

pub use codec::{decode_record, encode_record, StoredRecord, COMPRESSED_FIELD, VALUE_FIELD};
pub use engine::DependencyCache;
pub use memory::InMemoryStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisStore;
pub use store::{Batch, Command, KvStore, ScanPage};
pub use traits::{CachedValue, TaggedCache};

// Re-export the shared model so callers need a single import
pub use cacher_core::{
    as_tags, CacherConfig, CacherError, CacherResult, CodecError, ConfigError, Dependency,
    DependencyTag, SnapshotMode, StoreError, StoreResult,
};
