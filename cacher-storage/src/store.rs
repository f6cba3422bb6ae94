//! Key-value store command surface.
//!
//! The cache never talks to a concrete client directly. Everything it needs
//! from the store fits in this trait: hash set/get-all, multi-get, integer
//! increment, expiry, prefix scan with a resumable cursor, and a batch that is
//! submitted all at once.
//!
//! Values are raw bytes. Integer counters are stored as their decimal text,
//! the way Redis stores `INCR` targets.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use cacher_core::StoreResult;

/// A single write command inside a [`Batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Set fields on a hash, creating it if needed.
    HSet {
        key: String,
        fields: Vec<(String, Vec<u8>)>,
    },
    /// Set a plain value, replacing whatever was there.
    Set { key: String, value: Vec<u8> },
    /// Increment an integer value (absent counts as 0).
    Incr { key: String },
    /// Set a time-to-live on an existing key.
    Expire { key: String, ttl: Duration },
    /// Push an existing expiry further out (`PEXPIRE ... GT`). Keys without a
    /// TTL keep none, and a later deadline is never pulled in.
    ExtendExpire { key: String, ttl: Duration },
    /// Remove keys; missing keys are ignored.
    Del { keys: Vec<String> },
}

impl Command {
    /// Command name as the store would spell it, for error messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::HSet { .. } => "HSET",
            Self::Set { .. } => "SET",
            Self::Incr { .. } => "INCR",
            Self::Expire { .. } | Self::ExtendExpire { .. } => "PEXPIRE",
            Self::Del { .. } => "DEL",
        }
    }
}

/// Write commands submitted together.
///
/// Each command is individually atomic and the whole set is issued in one
/// round trip (MULTI/EXEC on Redis). A command that fails at runtime does not
/// roll back the others, and the batch gives no cross-key isolation to
/// concurrent readers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hset(mut self, key: impl Into<String>, fields: Vec<(String, Vec<u8>)>) -> Self {
        self.commands.push(Command::HSet {
            key: key.into(),
            fields,
        });
        self
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        self.commands.push(Command::Set {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn incr(mut self, key: impl Into<String>) -> Self {
        self.commands.push(Command::Incr { key: key.into() });
        self
    }

    pub fn expire(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.commands.push(Command::Expire {
            key: key.into(),
            ttl,
        });
        self
    }

    pub fn extend_expire(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.commands.push(Command::ExtendExpire {
            key: key.into(),
            ttl,
        });
        self
    }

    pub fn del(mut self, keys: Vec<String>) -> Self {
        self.commands.push(Command::Del { keys });
        self
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

/// One page of a prefix scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanPage {
    /// Cursor to resume from; `0` means the scan is complete.
    pub cursor: u64,
    pub keys: Vec<String>,
}

/// The store operations the cache is built on.
///
/// Any store that can provide these commands is substitutable. Implementations
/// must be safe to share between tasks; the cache holds them behind an `Arc`.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// All fields of a hash. A missing key yields an empty map.
    async fn hget_all(&self, key: &str) -> StoreResult<HashMap<String, Vec<u8>>>;

    /// Plain values for several keys, positionally. Missing keys (and keys
    /// holding non-plain values) yield `None`.
    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<Vec<u8>>>>;

    /// Increment an integer value, returning the new value.
    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Set a TTL. Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Remove keys, returning how many existed.
    async fn del(&self, keys: &[String]) -> StoreResult<u64>;

    /// Iterate keys starting with `prefix`. Start with cursor `0`; keep
    /// passing back the returned cursor until it is `0` again. `count` is a
    /// page size hint.
    async fn scan(&self, cursor: u64, prefix: &str, count: usize) -> StoreResult<ScanPage>;

    /// Submit a batch of write commands together. An error means at least one
    /// command failed; stores differ on whether the others took effect.
    async fn exec(&self, batch: Batch) -> StoreResult<()>;
}
