//! # Table Handle
//!
//! Purpose: Expose one logical table's data operations and lock over a named
//! backend connection.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: Each method resolves the key, looks up the live
//!    connection by name, issues exactly one command (or a fixed short
//!    sequence), and adapts the reply.
//! 2. **Stateless Handles**: A handle is two strings plus a registry `Arc`;
//!    create them per request, they stay valid across reconnects.
//! 3. **Verbatim Commands**: Arguments reach the backend bit-for-bit; the
//!    handle never caches or rewrites replies.
//! 4. **Fail Before the Wire**: Opening a handle on an unregistered name, or
//!    calling through one, errors without any network attempt.

use std::collections::HashMap;
use std::sync::Arc;

use tablekv_resp::RespValue;

use crate::batch::Batch;
use crate::error::{Error, Result};
use crate::keyspace::resolve_key;
use crate::lock::{LockOptions, LockToken};
use crate::registry::{Registry, DEFAULT_CONNECTION};

/// Accessor for one `(table, connection)` pair.
#[derive(Clone)]
pub struct Table {
    registry: Arc<Registry>,
    table: String,
    conn_name: String,
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("table", &self.table)
            .field("conn_name", &self.conn_name)
            .finish()
    }
}

impl Table {
    /// Opens a handle on the default `"master"` connection.
    pub fn open(registry: &Arc<Registry>, table: impl Into<String>) -> Result<Self> {
        Self::open_on(registry, table, DEFAULT_CONNECTION)
    }

    /// Opens a handle on a named connection.
    ///
    /// Fails fast when the name was never registered; the handle still looks
    /// the connection up by name on every call afterwards.
    pub fn open_on(
        registry: &Arc<Registry>,
        table: impl Into<String>,
        conn_name: impl Into<String>,
    ) -> Result<Self> {
        let conn_name = conn_name.into();
        if !registry.is_registered(&conn_name) {
            return Err(Error::NotConnected { name: conn_name });
        }
        Ok(Table {
            registry: registry.clone(),
            table: table.into(),
            conn_name,
        })
    }

    /// Logical table name.
    pub fn name(&self) -> &str {
        &self.table
    }

    /// Name of the backend connection this handle targets.
    pub fn connection_name(&self) -> &str {
        &self.conn_name
    }

    fn key(&self, user_key: Option<&str>) -> String {
        resolve_key(self.registry.namespace(), &self.table, user_key)
    }

    async fn exec(&self, key: &str, readonly: bool, args: &[&[u8]]) -> Result<RespValue> {
        self.registry
            .exec(&self.conn_name, Some(key), readonly, args)
            .await
    }

    // ---- strings ----

    /// Allocates the next row id for this table (`INCR <table>:rowid`).
    pub async fn next_rowid(&self) -> Result<i64> {
        let key = self.key(Some("rowid"));
        expect_int(self.exec(&key, false, &[b"INCR", key.as_bytes()]).await?)
    }

    /// Sets a value, with an optional time-to-live in seconds.
    pub async fn set_value(&self, user_key: &str, value: &[u8], ttl: Option<u64>) -> Result<()> {
        let key = self.key(Some(user_key));
        match ttl {
            Some(ttl) => {
                let ttl = ttl.to_string();
                expect_ok(
                    self.exec(
                        &key,
                        false,
                        &[b"SET", key.as_bytes(), value, b"EX", ttl.as_bytes()],
                    )
                    .await?,
                )
            }
            None => expect_ok(self.exec(&key, false, &[b"SET", key.as_bytes(), value]).await?),
        }
    }

    /// Fetches a value; `None` when the key is missing.
    pub async fn get_value(&self, user_key: &str) -> Result<Option<Vec<u8>>> {
        let key = self.key(Some(user_key));
        expect_bulk(self.exec(&key, true, &[b"GET", key.as_bytes()]).await?)
    }

    // ---- hashes ----

    /// Sets one hash field; a ttl additionally expires the whole hash key.
    pub async fn set_hash_value(
        &self,
        user_key: &str,
        field: &str,
        value: &[u8],
        ttl: Option<u64>,
    ) -> Result<i64> {
        let key = self.key(Some(user_key));
        let added = expect_int(
            self.exec(
                &key,
                false,
                &[b"HSET", key.as_bytes(), field.as_bytes(), value],
            )
            .await?,
        )?;
        if let Some(ttl) = ttl {
            let ttl = ttl.to_string();
            expect_bool(
                self.exec(&key, false, &[b"EXPIRE", key.as_bytes(), ttl.as_bytes()])
                    .await?,
            )?;
        }
        Ok(added)
    }

    /// Fetches one hash field.
    pub async fn get_hash_value(&self, user_key: &str, field: &str) -> Result<Option<Vec<u8>>> {
        let key = self.key(Some(user_key));
        expect_bulk(
            self.exec(&key, true, &[b"HGET", key.as_bytes(), field.as_bytes()])
                .await?,
        )
    }

    /// Removes one hash field; returns the number of fields removed.
    pub async fn remove_hash_value(&self, user_key: &str, field: &str) -> Result<i64> {
        let key = self.key(Some(user_key));
        expect_int(
            self.exec(&key, false, &[b"HDEL", key.as_bytes(), field.as_bytes()])
                .await?,
        )
    }

    /// True when the hash field exists.
    pub async fn hash_exists(&self, user_key: &str, field: &str) -> Result<bool> {
        let key = self.key(Some(user_key));
        expect_bool(
            self.exec(&key, true, &[b"HEXISTS", key.as_bytes(), field.as_bytes()])
                .await?,
        )
    }

    /// Sets several hash fields at once.
    pub async fn set_hash_map(&self, user_key: &str, pairs: &[(&str, &[u8])]) -> Result<()> {
        let key = self.key(Some(user_key));
        let mut args: Vec<&[u8]> = Vec::with_capacity(2 + pairs.len() * 2);
        args.push(b"HMSET");
        args.push(key.as_bytes());
        for (field, value) in pairs {
            args.push(field.as_bytes());
            args.push(value);
        }
        expect_ok(self.exec(&key, false, &args).await?)
    }

    /// Fetches several hash fields; order follows `fields`.
    pub async fn get_hash_map(
        &self,
        user_key: &str,
        fields: &[&str],
    ) -> Result<Vec<Option<Vec<u8>>>> {
        let key = self.key(Some(user_key));
        let mut args: Vec<&[u8]> = Vec::with_capacity(2 + fields.len());
        args.push(b"HMGET");
        args.push(key.as_bytes());
        for field in fields {
            args.push(field.as_bytes());
        }
        expect_opt_items(self.exec(&key, true, &args).await?)
    }

    /// Fetches every field of a hash.
    pub async fn hash_all(&self, user_key: &str) -> Result<HashMap<String, Vec<u8>>> {
        let key = self.key(Some(user_key));
        let items = expect_items(self.exec(&key, true, &[b"HGETALL", key.as_bytes()]).await?)?;
        if items.len() % 2 != 0 {
            return Err(Error::UnexpectedResponse);
        }
        let mut map = HashMap::with_capacity(items.len() / 2);
        let mut iter = items.into_iter();
        while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
            map.insert(String::from_utf8_lossy(&field).into_owned(), value);
        }
        Ok(map)
    }

    // ---- keys ----

    /// True when the key exists.
    pub async fn exists_key(&self, user_key: &str) -> Result<bool> {
        let key = self.key(Some(user_key));
        expect_bool(self.exec(&key, true, &[b"EXISTS", key.as_bytes()]).await?)
    }

    /// Deletes the key; returns the number of keys removed.
    pub async fn del_key(&self, user_key: &str) -> Result<i64> {
        let key = self.key(Some(user_key));
        expect_int(self.exec(&key, false, &[b"DEL", key.as_bytes()]).await?)
    }

    /// Expires the key after `ttl` seconds; false when the key is missing.
    pub async fn set_key_timeout(&self, user_key: &str, ttl: u64) -> Result<bool> {
        let key = self.key(Some(user_key));
        let ttl = ttl.to_string();
        expect_bool(
            self.exec(&key, false, &[b"EXPIRE", key.as_bytes(), ttl.as_bytes()])
                .await?,
        )
    }

    /// Iterates keys under this table's prefix.
    ///
    /// Returns the next cursor (0 when the iteration is complete) and a page
    /// of resolved keys.
    pub async fn scan(&self, cursor: u64, count: Option<u32>) -> Result<(u64, Vec<String>)> {
        let pattern = self.key(Some("*"));
        let cursor = cursor.to_string();
        let mut args: Vec<&[u8]> = vec![b"SCAN", cursor.as_bytes(), b"MATCH", pattern.as_bytes()];
        let count = count.map(|n| n.to_string());
        if let Some(count) = &count {
            args.push(b"COUNT");
            args.push(count.as_bytes());
        }
        let reply = self.registry.exec(&self.conn_name, None, true, &args).await?;

        let mut items = match reply {
            RespValue::Array(Some(items)) if items.len() == 2 => items.into_iter(),
            RespValue::Error(message) => return Err(Error::Server { message }),
            _ => return Err(Error::UnexpectedResponse),
        };
        let next = match items.next() {
            Some(RespValue::Bulk(Some(cursor))) => String::from_utf8_lossy(&cursor)
                .parse::<u64>()
                .map_err(|_| Error::UnexpectedResponse)?,
            _ => return Err(Error::UnexpectedResponse),
        };
        let keys = match items.next() {
            Some(page) => expect_items(page)?
                .into_iter()
                .map(|k| String::from_utf8_lossy(&k).into_owned())
                .collect(),
            None => Vec::new(),
        };
        Ok((next, keys))
    }

    // ---- lists ----

    /// Blocking right-pop; `None` when `timeout` seconds pass without data.
    /// A timeout of 0 waits indefinitely.
    pub async fn blocking_pop(
        &self,
        user_key: &str,
        timeout: u64,
    ) -> Result<Option<(String, Vec<u8>)>> {
        let key = self.key(Some(user_key));
        let timeout = timeout.to_string();
        let reply = self
            .exec(&key, false, &[b"BRPOP", key.as_bytes(), timeout.as_bytes()])
            .await?;
        match reply {
            RespValue::Array(None) => Ok(None),
            RespValue::Array(Some(items)) if items.len() == 2 => {
                let mut iter = items.into_iter();
                let popped_key = match iter.next() {
                    Some(RespValue::Bulk(Some(k))) => String::from_utf8_lossy(&k).into_owned(),
                    _ => return Err(Error::UnexpectedResponse),
                };
                let value = match iter.next() {
                    Some(RespValue::Bulk(Some(v))) => v,
                    _ => return Err(Error::UnexpectedResponse),
                };
                Ok(Some((popped_key, value)))
            }
            RespValue::Error(message) => Err(Error::Server { message }),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    /// List length.
    pub async fn list_count(&self, user_key: &str) -> Result<i64> {
        let key = self.key(Some(user_key));
        expect_int(self.exec(&key, true, &[b"LLEN", key.as_bytes()]).await?)
    }

    /// Appends values to the list; returns the new length.
    pub async fn list_push(&self, user_key: &str, values: &[&[u8]]) -> Result<i64> {
        let key = self.key(Some(user_key));
        let mut args: Vec<&[u8]> = Vec::with_capacity(2 + values.len());
        args.push(b"RPUSH");
        args.push(key.as_bytes());
        args.extend_from_slice(values);
        expect_int(self.exec(&key, false, &args).await?)
    }

    /// Fetches the list range `[start, stop]` (inclusive, negatives from the
    /// tail).
    pub async fn list_slice(&self, user_key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let key = self.key(Some(user_key));
        let start = start.to_string();
        let stop = stop.to_string();
        expect_items(
            self.exec(
                &key,
                true,
                &[b"LRANGE", key.as_bytes(), start.as_bytes(), stop.as_bytes()],
            )
            .await?,
        )
    }

    /// Removes `count` occurrences of `value` (sign selects direction).
    pub async fn list_remove(&self, user_key: &str, count: i64, value: &[u8]) -> Result<i64> {
        let key = self.key(Some(user_key));
        let count = count.to_string();
        expect_int(
            self.exec(
                &key,
                false,
                &[b"LREM", key.as_bytes(), count.as_bytes(), value],
            )
            .await?,
        )
    }

    /// Empties the list (`LTRIM <key> -1 0`, an always-empty range).
    pub async fn list_clear(&self, user_key: &str) -> Result<()> {
        let key = self.key(Some(user_key));
        expect_ok(
            self.exec(&key, false, &[b"LTRIM", key.as_bytes(), b"-1", b"0"])
                .await?,
        )
    }

    // ---- sets ----

    /// Adds members; returns how many were new.
    pub async fn set_add(&self, user_key: &str, members: &[&[u8]]) -> Result<i64> {
        let key = self.key(Some(user_key));
        let mut args: Vec<&[u8]> = Vec::with_capacity(2 + members.len());
        args.push(b"SADD");
        args.push(key.as_bytes());
        args.extend_from_slice(members);
        expect_int(self.exec(&key, false, &args).await?)
    }

    /// Removes members; returns how many were present.
    pub async fn set_remove(&self, user_key: &str, members: &[&[u8]]) -> Result<i64> {
        let key = self.key(Some(user_key));
        let mut args: Vec<&[u8]> = Vec::with_capacity(2 + members.len());
        args.push(b"SREM");
        args.push(key.as_bytes());
        args.extend_from_slice(members);
        expect_int(self.exec(&key, false, &args).await?)
    }

    /// Set cardinality.
    pub async fn set_count(&self, user_key: &str) -> Result<i64> {
        let key = self.key(Some(user_key));
        expect_int(self.exec(&key, true, &[b"SCARD", key.as_bytes()]).await?)
    }

    /// Every member of the set.
    pub async fn set_members(&self, user_key: &str) -> Result<Vec<Vec<u8>>> {
        let key = self.key(Some(user_key));
        expect_items(self.exec(&key, true, &[b"SMEMBERS", key.as_bytes()]).await?)
    }

    // ---- sorted sets ----

    /// Adds one scored member; returns how many were new.
    pub async fn sorted_add(&self, user_key: &str, score: f64, member: &[u8]) -> Result<i64> {
        let key = self.key(Some(user_key));
        let score = score.to_string();
        expect_int(
            self.exec(
                &key,
                false,
                &[b"ZADD", key.as_bytes(), score.as_bytes(), member],
            )
            .await?,
        )
    }

    /// Removes members; returns how many were present.
    pub async fn sorted_remove(&self, user_key: &str, members: &[&[u8]]) -> Result<i64> {
        let key = self.key(Some(user_key));
        let mut args: Vec<&[u8]> = Vec::with_capacity(2 + members.len());
        args.push(b"ZREM");
        args.push(key.as_bytes());
        args.extend_from_slice(members);
        expect_int(self.exec(&key, false, &args).await?)
    }

    /// Members by rank range `[start, stop]`.
    pub async fn sorted_range(&self, user_key: &str, start: i64, stop: i64) -> Result<Vec<Vec<u8>>> {
        let key = self.key(Some(user_key));
        let start = start.to_string();
        let stop = stop.to_string();
        expect_items(
            self.exec(
                &key,
                true,
                &[b"ZRANGE", key.as_bytes(), start.as_bytes(), stop.as_bytes()],
            )
            .await?,
        )
    }

    /// Members by score range; `min`/`max` pass through verbatim, so
    /// `-inf`, `+inf`, and exclusive `(` bounds all work.
    pub async fn sorted_range_by_score(
        &self,
        user_key: &str,
        min: &str,
        max: &str,
    ) -> Result<Vec<Vec<u8>>> {
        let key = self.key(Some(user_key));
        expect_items(
            self.exec(
                &key,
                true,
                &[
                    b"ZRANGEBYSCORE",
                    key.as_bytes(),
                    min.as_bytes(),
                    max.as_bytes(),
                ],
            )
            .await?,
        )
    }

    // ---- batches ----

    /// Starts a batch of commands against this table.
    pub fn batch(&self) -> Batch {
        Batch::new(self.clone())
    }

    pub(crate) fn resolve(&self, user_key: &str) -> String {
        self.key(Some(user_key))
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    // ---- distributed lock ----

    /// Acquires this table's lock, polling until it is free.
    ///
    /// The lock key expires after `ttl` seconds regardless of release, so a
    /// crashed holder cannot wedge the table.
    pub async fn lock(&self, ttl: u64) -> Result<LockToken> {
        self.lock_with(ttl, &LockOptions::default()).await
    }

    /// Acquires this table's lock with explicit polling bounds.
    pub async fn lock_with(&self, ttl: u64, options: &LockOptions) -> Result<LockToken> {
        let entry = self.registry.entry(&self.conn_name)?;
        let key = self.key(Some("lock"));
        entry
            .coordinator()
            .acquire(&self.registry, &self.conn_name, &key, ttl, options)
            .await
    }

    /// Releases a previously acquired lock.
    ///
    /// Returns `false`, not an error, when the token went stale (expiry or
    /// reacquisition by another process).
    pub async fn unlock(&self, token: &LockToken) -> Result<bool> {
        crate::lock::LockCoordinator::release(&self.registry, &self.conn_name, token).await
    }

    /// True while some process holds this table's lock.
    ///
    /// A snapshot only: the answer can be stale by the time it is observed.
    pub async fn has_lock(&self) -> Result<bool> {
        let key = self.key(Some("lock"));
        crate::lock::LockCoordinator::probe(&self.registry, &self.conn_name, &key).await
    }
}

// ---- reply adapters ----

pub(crate) fn expect_ok(reply: RespValue) -> Result<()> {
    match reply {
        RespValue::Simple(_) => Ok(()),
        RespValue::Error(message) => Err(Error::Server { message }),
        _ => Err(Error::UnexpectedResponse),
    }
}

pub(crate) fn expect_int(reply: RespValue) -> Result<i64> {
    match reply {
        RespValue::Integer(value) => Ok(value),
        RespValue::Error(message) => Err(Error::Server { message }),
        _ => Err(Error::UnexpectedResponse),
    }
}

pub(crate) fn expect_bool(reply: RespValue) -> Result<bool> {
    expect_int(reply).map(|value| value > 0)
}

pub(crate) fn expect_bulk(reply: RespValue) -> Result<Option<Vec<u8>>> {
    match reply {
        RespValue::Bulk(data) => Ok(data),
        RespValue::Error(message) => Err(Error::Server { message }),
        _ => Err(Error::UnexpectedResponse),
    }
}

/// Array of non-null bulk strings.
pub(crate) fn expect_items(reply: RespValue) -> Result<Vec<Vec<u8>>> {
    let items = match reply {
        RespValue::Array(Some(items)) => items,
        RespValue::Array(None) => return Ok(Vec::new()),
        RespValue::Error(message) => return Err(Error::Server { message }),
        _ => return Err(Error::UnexpectedResponse),
    };
    items
        .into_iter()
        .map(|item| match item {
            RespValue::Bulk(Some(data)) => Ok(data),
            _ => Err(Error::UnexpectedResponse),
        })
        .collect()
}

/// Array of nullable bulk strings (HMGET).
fn expect_opt_items(reply: RespValue) -> Result<Vec<Option<Vec<u8>>>> {
    let items = match reply {
        RespValue::Array(Some(items)) => items,
        RespValue::Error(message) => return Err(Error::Server { message }),
        _ => return Err(Error::UnexpectedResponse),
    };
    items
        .into_iter()
        .map(|item| match item {
            RespValue::Bulk(data) => Ok(data),
            _ => Err(Error::UnexpectedResponse),
        })
        .collect()
}
