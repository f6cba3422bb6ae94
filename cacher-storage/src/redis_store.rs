//! Redis-backed store.
//!
//! Maps the [`KvStore`] surface onto Redis commands over a multiplexed
//! [`ConnectionManager`], which reconnects on its own. Batches are sent as a
//! `MULTI`/`EXEC` pipeline; Redis does not roll back a command that fails
//! inside `EXEC`, so a failed batch may be partially applied. Expiry
//! extension uses `PEXPIRE ... GT` and needs Redis 7.0 or later.
//!
//! Works against standalone, Sentinel-managed and proxied deployments; for
//! Redis Cluster all keys touched by one batch must hash to the same slot
//! (use `{tag}` prefixes).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use cacher_core::{StoreError, StoreResult};
use redis::aio::ConnectionManager;
use redis::RedisError;

use crate::store::{Batch, Command, KvStore, ScanPage};

/// [`KvStore`] over a Redis connection.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Wrap an existing connection manager.
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Open a connection manager for `url` (`redis://[:password@]host:port/db`).
    pub async fn connect(url: &str) -> StoreResult<Self> {
        let client = redis::Client::open(url).map_err(map_redis_error)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(map_redis_error)?;
        Ok(Self::new(conn))
    }
}

/// Like [`map_redis_error`], but reports `WRONGTYPE` replies against `key`.
fn map_keyed_error(key: &str, e: RedisError) -> StoreError {
    if e.code() == Some("WRONGTYPE") {
        StoreError::WrongType {
            key: key.to_string(),
        }
    } else {
        map_redis_error(e)
    }
}

fn map_redis_error(e: RedisError) -> StoreError {
    if e.is_timeout() {
        StoreError::Timeout {
            reason: e.to_string(),
        }
    } else if e.is_connection_dropped() || e.is_connection_refusal() || e.is_io_error() {
        StoreError::Connection {
            reason: e.to_string(),
        }
    } else {
        StoreError::Command {
            command: e.code().unwrap_or("redis").to_string(),
            reason: e.to_string(),
        }
    }
}

/// Escape glob metacharacters so a literal prefix can be used in `MATCH`.
fn glob_escape(prefix: &str) -> String {
    let mut out = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('*');
    out
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl KvStore for RedisStore {
    async fn hget_all(&self, key: &str) -> StoreResult<HashMap<String, Vec<u8>>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, Vec<u8>> = redis::cmd("HGETALL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_keyed_error(key, e))?;
        Ok(fields)
    }

    async fn mget(&self, keys: &[String]) -> StoreResult<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<Vec<u8>>> = redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(values)
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = redis::cmd("INCR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| map_keyed_error(key, e))?;
        Ok(value)
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn.clone();
        let applied: bool = redis::cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(applied)
    }

    async fn del(&self, keys: &[String]) -> StoreResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("DEL")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(removed)
    }

    async fn scan(&self, cursor: u64, prefix: &str, count: usize) -> StoreResult<ScanPage> {
        let mut conn = self.conn.clone();
        let (cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(glob_escape(prefix))
            .arg("COUNT")
            .arg(count.max(1))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_error)?;
        Ok(ScanPage { cursor, keys })
    }

    async fn exec(&self, batch: Batch) -> StoreResult<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for command in batch.into_commands() {
            match command {
                Command::HSet { key, fields } => {
                    let cmd = pipe.cmd("HSET").arg(key);
                    for (field, value) in fields {
                        cmd.arg(field).arg(value);
                    }
                    cmd.ignore();
                }
                Command::Set { key, value } => {
                    pipe.cmd("SET").arg(key).arg(value).ignore();
                }
                Command::Incr { key } => {
                    pipe.cmd("INCR").arg(key).ignore();
                }
                Command::Expire { key, ttl } => {
                    pipe.cmd("PEXPIRE").arg(key).arg(ttl_millis(ttl)).ignore();
                }
                Command::ExtendExpire { key, ttl } => {
                    pipe.cmd("PEXPIRE")
                        .arg(key)
                        .arg(ttl_millis(ttl))
                        .arg("GT")
                        .ignore();
                }
                Command::Del { keys } => {
                    if !keys.is_empty() {
                        pipe.cmd("DEL").arg(keys).ignore();
                    }
                }
            }
        }

        let mut conn = self.conn.clone();
        let () = pipe.query_async(&mut conn).await.map_err(map_redis_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_escape() {
        assert_eq!(glob_escape("cache:"), "cache:*");
        assert_eq!(glob_escape("a*b?[c]"), "a\\*b\\?\\[c\\]*");
        assert_eq!(glob_escape("back\\slash"), "back\\\\slash*");
    }

    #[test]
    fn test_ttl_millis() {
        assert_eq!(ttl_millis(Duration::from_secs(2)), 2000);
        assert_eq!(ttl_millis(Duration::from_micros(10)), 1);
        assert_eq!(ttl_millis(Duration::MAX), u64::MAX);
    }
}
