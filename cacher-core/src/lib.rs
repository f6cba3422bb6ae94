//! Cacher Core - Dependency Model and Shared Types
//!
//! Pure value types used by every other crate in the workspace: the
//! dependency tag contract, the engine configuration and the error taxonomy.
//! This crate performs no I/O.

pub mod config;
pub mod dependency;
pub mod error;

pub use config::{CacherConfig, SnapshotMode, DEFAULT_DEPENDENCY_TTL_FACTOR, DEFAULT_SCAN_BATCH_SIZE};
pub use dependency::{as_tags, Dependency, DependencyTag};
pub use error::{CacherError, CacherResult, CodecError, ConfigError, StoreError, StoreResult};
