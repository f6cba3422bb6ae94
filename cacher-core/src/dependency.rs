//! Dependency counters used as invalidation tags.
//!
//! A dependency is a named integer version. Cached values record the version
//! of every dependency they were computed from; bumping the counter later makes
//! those values unreadable without touching them.

use serde::{Deserialize, Serialize};

/// Anything that can name a dependency counter and report a version for it.
///
/// The engine only ever reads these two accessors, so callers can pass their
/// own domain types (or test doubles) wherever a dependency is accepted.
pub trait DependencyTag: Send + Sync {
    /// Name of the dependency counter.
    fn key(&self) -> &str;

    /// Version of the counter this tag refers to.
    fn value(&self) -> i64;
}

/// A concrete `(name, version)` pair.
///
/// Serialized with the short field names `k` and `v`; this is the layout of
/// the snapshot embedded in every stored record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dependency {
    #[serde(rename = "k")]
    pub key: String,
    #[serde(rename = "v")]
    pub value: i64,
}

impl Dependency {
    pub fn new(key: impl Into<String>, value: i64) -> Self {
        Self {
            key: key.into(),
            value,
        }
    }

    /// Capture the current accessor values of any tag.
    pub fn from_tag(tag: &dyn DependencyTag) -> Self {
        Self::new(tag.key(), tag.value())
    }
}

impl DependencyTag for Dependency {
    fn key(&self) -> &str {
        &self.key
    }

    fn value(&self) -> i64 {
        self.value
    }
}

impl DependencyTag for (String, i64) {
    fn key(&self) -> &str {
        &self.0
    }

    fn value(&self) -> i64 {
        self.1
    }
}

impl DependencyTag for (&str, i64) {
    fn key(&self) -> &str {
        self.0
    }

    fn value(&self) -> i64 {
        self.1
    }
}

impl<T: DependencyTag + ?Sized> DependencyTag for &T {
    fn key(&self) -> &str {
        (**self).key()
    }

    fn value(&self) -> i64 {
        (**self).value()
    }
}

/// Borrow a slice of concrete dependencies as trait objects.
pub fn as_tags(dependencies: &[Dependency]) -> Vec<&dyn DependencyTag> {
    dependencies
        .iter()
        .map(|d| d as &dyn DependencyTag)
        .collect()
}
