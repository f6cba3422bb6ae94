//! In-memory key-value store.
//!
//! Mirrors the Redis behaviour the cache relies on: plain and hash values,
//! TTL expiry, type errors when a command hits the wrong kind of value, and
//! cursor-based prefix scans. Expiry uses `tokio::time::Instant`, so tests
//! running on a paused clock can advance past a TTL without sleeping.
//!
//! Expired keys are invisible as soon as their deadline passes. They are
//! physically removed when touched, on every scan, and by a periodic sweep
//! that runs once the number of writes since the last sweep reaches the
//! number of stored keys.

use std::collections::{hash_map, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use cacher_core::{StoreError, StoreResult};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::store::{Batch, Command, KvStore, ScanPage};

/// Writes between sweeps never drop below this, so small keyspaces are not
/// swept on every call.
const MIN_WRITES_PER_SWEEP: usize = 1024;

#[derive(Debug, Clone)]
enum Value {
    Plain(Vec<u8>),
    Hash(HashMap<String, Vec<u8>>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
    /// Creation order; doubles as the scan cursor.
    seq: u64,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| at > now)
    }
}

/// What a key would hold at some point of a batch, as far as command
/// failures are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
    Missing,
    Hash,
    Counter(i64),
    Text,
}

impl Shape {
    fn of_plain(raw: &[u8]) -> Self {
        parse_counter(raw).map_or(Self::Text, Self::Counter)
    }
}

fn parse_counter(raw: &[u8]) -> Option<i64> {
    std::str::from_utf8(raw).ok()?.parse::<i64>().ok()
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
    }
}

fn not_an_integer() -> StoreError {
    StoreError::command("INCR", "value is not an integer or out of range")
}

fn increment_overflow() -> StoreError {
    StoreError::command("INCR", "increment would overflow")
}

#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
    next_seq: u64,
    writes_since_sweep: usize,
}

impl Keyspace {
    fn live(&self, key: &str, now: Instant) -> Option<&Entry> {
        self.entries.get(key).filter(|e| e.is_live(now))
    }

    /// Drop the entry if it has expired, then return it mutably.
    fn live_mut(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        if self.entries.get(key).is_some_and(|e| !e.is_live(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn shape(&self, key: &str, now: Instant) -> Shape {
        match self.live(key, now).map(|e| &e.value) {
            None => Shape::Missing,
            Some(Value::Hash(_)) => Shape::Hash,
            Some(Value::Plain(raw)) => Shape::of_plain(raw),
        }
    }

    /// Remove every expired entry, returning how many went.
    fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        self.writes_since_sweep = 0;
        before - self.entries.len()
    }

    /// Count one write and sweep once enough have accumulated. The threshold
    /// grows with the keyspace, which keeps the sweep amortised O(1).
    fn record_write(&mut self, now: Instant) {
        self.writes_since_sweep += 1;
        if self.writes_since_sweep >= self.entries.len().max(MIN_WRITES_PER_SWEEP) {
            self.sweep(now);
        }
    }

    fn insert_new(&mut self, key: &str, value: Value) -> &mut Entry {
        self.next_seq += 1;
        let entry = Entry {
            value,
            expires_at: None,
            seq: self.next_seq,
        };
        match self.entries.entry(key.to_string()) {
            hash_map::Entry::Occupied(mut slot) => {
                slot.insert(entry);
                slot.into_mut()
            }
            hash_map::Entry::Vacant(slot) => slot.insert(entry),
        }
    }

    /// Dry-run a batch against the current state, tracking only the keys it
    /// touches. Succeeds exactly when applying the batch would.
    fn check(&self, commands: &[Command], now: Instant) -> StoreResult<()> {
        let mut touched: HashMap<&str, Shape> = HashMap::new();
        for command in commands {
            match command {
                Command::HSet { key, .. } => {
                    let current = touched
                        .get(key.as_str())
                        .copied()
                        .unwrap_or_else(|| self.shape(key, now));
                    match current {
                        Shape::Missing | Shape::Hash => {
                            touched.insert(key.as_str(), Shape::Hash);
                        }
                        Shape::Counter(_) | Shape::Text => return Err(wrong_type(key)),
                    }
                }
                Command::Set { key, value } => {
                    touched.insert(key.as_str(), Shape::of_plain(value));
                }
                Command::Incr { key } => {
                    let current = touched
                        .get(key.as_str())
                        .copied()
                        .unwrap_or_else(|| self.shape(key, now));
                    let next = match current {
                        Shape::Missing => 1,
                        Shape::Counter(n) => n.checked_add(1).ok_or_else(increment_overflow)?,
                        Shape::Text => return Err(not_an_integer()),
                        Shape::Hash => return Err(wrong_type(key)),
                    };
                    touched.insert(key.as_str(), Shape::Counter(next));
                }
                Command::Expire { key, ttl } => {
                    if ttl.is_zero() {
                        touched.insert(key.as_str(), Shape::Missing);
                    }
                }
                Command::ExtendExpire { .. } => {}
                Command::Del { keys } => {
                    for key in keys {
                        touched.insert(key.as_str(), Shape::Missing);
                    }
                }
            }
        }
        Ok(())
    }

    fn apply(&mut self, command: &Command, now: Instant) -> StoreResult<()> {
        match command {
            Command::HSet { key, fields } => self.hset(key, fields, now),
            Command::Set { key, value } => {
                self.set(key, value.clone(), now);
                Ok(())
            }
            Command::Incr { key } => self.incr(key, now).map(|_| ()),
            Command::Expire { key, ttl } => {
                self.expire(key, *ttl, now);
                Ok(())
            }
            Command::ExtendExpire { key, ttl } => {
                self.extend_expire(key, *ttl, now);
                Ok(())
            }
            Command::Del { keys } => {
                self.del(keys, now);
                Ok(())
            }
        }
    }

    fn hset(&mut self, key: &str, fields: &[(String, Vec<u8>)], now: Instant) -> StoreResult<()> {
        let entry = match self.live_mut(key, now) {
            Some(entry) => entry,
            None => self.insert_new(key, Value::Hash(HashMap::new())),
        };
        match &mut entry.value {
            Value::Hash(hash) => {
                for (field, value) in fields {
                    hash.insert(field.clone(), value.clone());
                }
                Ok(())
            }
            Value::Plain(_) => Err(wrong_type(key)),
        }
    }

    fn set(&mut self, key: &str, value: Vec<u8>, now: Instant) {
        match self.live_mut(key, now) {
            Some(entry) => {
                entry.value = Value::Plain(value);
                entry.expires_at = None;
            }
            None => {
                self.insert_new(key, Value::Plain(value));
            }
        }
    }

    fn incr(&mut self, key: &str, now: Instant) -> StoreResult<i64> {
        let entry = match self.live_mut(key, now) {
            Some(entry) => entry,
            None => self.insert_new(key, Value::Plain(b"0".to_vec())),
        };
        let Value::Plain(raw) = &mut entry.value else {
            return Err(wrong_type(key));
        };
        let current = parse_counter(raw).ok_or_else(not_an_integer)?;
        let next = current.checked_add(1).ok_or_else(increment_overflow)?;
        *raw = next.to_string().into_bytes();
        Ok(next)
    }

    fn expire(&mut self, key: &str, ttl: Duration, now: Instant) -> bool {
        if self.live_mut(key, now).is_none() {
            return false;
        }
        if ttl.is_zero() {
            self.entries.remove(key);
        } else if let Some(entry) = self.entries.get_mut(key) {
            // Past the clock's range the key simply never expires.
            entry.expires_at = now.checked_add(ttl);
        }
        true
    }

    fn extend_expire(&mut self, key: &str, ttl: Duration, now: Instant) -> bool {
        let Some(entry) = self.live_mut(key, now) else {
            return false;
        };
        let Some(current) = entry.expires_at else {
            return false;
        };
        match now.checked_add(ttl) {
            Some(deadline) if deadline <= current => false,
            deadline => {
                entry.expires_at = deadline;
                true
            }
        }
    }

    fn del(&mut self, keys: &[String], now: Instant) -> u64 {
        keys.iter()
            .filter(|key| {
                self.entries
                    .remove(key.as_str())
                    .is_some_and(|e| e.is_live(now))
            })
            .count() as u64
    }
}

/// Shared in-memory store.
///
/// A batch is checked against the current keyspace before anything is
/// written, so a failing batch leaves no partial writes behind. This is
/// stricter than Redis, where `EXEC` does not roll back.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    keyspace: RwLock<Keyspace>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live key exists.
    pub async fn exists(&self, key: &str) -> bool {
        let keyspace = self.keyspace.read().await;
        keyspace.live(key, Instant::now()).is_some()
    }

    /// Remaining time to live, `None` for missing or persistent keys.
    pub async fn ttl(&self, key: &str) -> Option<Duration> {
        let keyspace = self.keyspace.read().await;
        let now = Instant::now();
        keyspace
            .live(key, now)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let keyspace = self.keyspace.read().await;
        let now = Instant::now();
        keyspace.entries.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every expired key now, returning how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let mut keyspace = self.keyspace.write().await;
        keyspace.sweep(Instant::now())
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn hget_all(&self, key: &str) -> StoreResult<HashMap<String, Vec<u8>>> {
        let keyspace = self.keyspace.read().await;
        match keyspace.live(key, Instant::now()).map(|e| &e.value) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(Value::Plain(_)) => Err(wrong_type(key)),
        }
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        let keyspace = self.keyspace.read().await;
        let now = Instant::now();
        Ok(keys
            .iter()
            .map(|key| match keyspace.live(key, now).map(|e| &e.value) {
                Some(Value::Plain(raw)) => Some(raw.clone()),
                _ => None,
            })
            .collect())
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut keyspace = self.keyspace.write().await;
        let now = Instant::now();
        keyspace.record_write(now);
        keyspace.incr(key, now)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut keyspace = self.keyspace.write().await;
        let now = Instant::now();
        keyspace.record_write(now);
        Ok(keyspace.expire(key, ttl, now))
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        let mut keyspace = self.keyspace.write().await;
        let now = Instant::now();
        keyspace.record_write(now);
        Ok(keyspace.del(keys, now))
    }

    async fn scan(&self, cursor: u64, prefix: &str, count: usize) -> StoreResult<ScanPage> {
        let mut keyspace = self.keyspace.write().await;
        let now = Instant::now();
        keyspace.sweep(now);

        let mut matching: Vec<(u64, &String)> = keyspace
            .entries
            .iter()
            .filter(|(key, entry)| entry.seq > cursor && key.starts_with(prefix))
            .map(|(key, entry)| (entry.seq, key))
            .collect();
        matching.sort_unstable_by_key(|(seq, _)| *seq);

        let page_size = count.max(1);
        let has_more = matching.len() > page_size;
        matching.truncate(page_size);

        let next_cursor = if has_more {
            matching.last().map(|(seq, _)| *seq).unwrap_or(0)
        } else {
            0
        };

        Ok(ScanPage {
            cursor: next_cursor,
            keys: matching.into_iter().map(|(_, key)| key.clone()).collect(),
        })
    }

    async fn exec(&self, batch: Batch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut keyspace = self.keyspace.write().await;
        let now = Instant::now();

        keyspace.check(batch.commands(), now)?;
        keyspace.record_write(now);
        for command in batch.commands() {
            keyspace.apply(command, now)?;
        }
        Ok(())
    }
}
