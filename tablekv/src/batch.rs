//! # Batch Builder
//!
//! Purpose: Queue several commands against one table and run them as a plain
//! pipeline or an atomic MULTI/EXEC block, without ever exposing the raw
//! backend client.
//!
//! ## Design Principles
//! 1. **Capability, Not Client**: The builder is the only multi-command
//!    surface; callers cannot reach the underlying connection.
//! 2. **Plan Before I/O**: Keys are resolved and slot-checked while queueing;
//!    a cross-slot atomic batch fails before anything is written.
//! 3. **One Connection**: The whole sequence runs on a single pooled
//!    connection, so request-order FIFO lines replies up with commands.

use tablekv_resp::RespValue;

use crate::cluster::group_keys_by_slot;
use crate::error::{Error, Result};
use crate::table::Table;

/// Queued commands against one table, executed together.
pub struct Batch {
    table: Table,
    cmds: Vec<Vec<Vec<u8>>>,
    keys: Vec<String>,
}

impl Batch {
    pub(crate) fn new(table: Table) -> Self {
        Batch {
            table,
            cmds: Vec::new(),
            keys: Vec::new(),
        }
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    /// True when nothing has been queued.
    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }

    fn push(&mut self, key: String, mut tail: Vec<Vec<u8>>, cmd: &[u8]) -> &mut Self {
        let mut args = Vec::with_capacity(2 + tail.len());
        args.push(cmd.to_vec());
        args.push(key.clone().into_bytes());
        args.append(&mut tail);
        self.cmds.push(args);
        self.keys.push(key);
        self
    }

    /// Queues `SET` (with optional `EX` ttl).
    pub fn set_value(&mut self, user_key: &str, value: &[u8], ttl: Option<u64>) -> &mut Self {
        let key = self.table.resolve(user_key);
        let mut tail = vec![value.to_vec()];
        if let Some(ttl) = ttl {
            tail.push(b"EX".to_vec());
            tail.push(ttl.to_string().into_bytes());
        }
        self.push(key, tail, b"SET")
    }

    /// Queues `GET`.
    pub fn get_value(&mut self, user_key: &str) -> &mut Self {
        let key = self.table.resolve(user_key);
        self.push(key, Vec::new(), b"GET")
    }

    /// Queues `DEL`.
    pub fn del_key(&mut self, user_key: &str) -> &mut Self {
        let key = self.table.resolve(user_key);
        self.push(key, Vec::new(), b"DEL")
    }

    /// Queues `EXPIRE`.
    pub fn set_key_timeout(&mut self, user_key: &str, ttl: u64) -> &mut Self {
        let key = self.table.resolve(user_key);
        self.push(key, vec![ttl.to_string().into_bytes()], b"EXPIRE")
    }

    /// Queues `HSET`.
    pub fn set_hash_value(&mut self, user_key: &str, field: &str, value: &[u8]) -> &mut Self {
        let key = self.table.resolve(user_key);
        self.push(
            key,
            vec![field.as_bytes().to_vec(), value.to_vec()],
            b"HSET",
        )
    }

    /// Queues `HGET`.
    pub fn get_hash_value(&mut self, user_key: &str, field: &str) -> &mut Self {
        let key = self.table.resolve(user_key);
        self.push(key, vec![field.as_bytes().to_vec()], b"HGET")
    }

    /// Queues `HDEL`.
    pub fn remove_hash_value(&mut self, user_key: &str, field: &str) -> &mut Self {
        let key = self.table.resolve(user_key);
        self.push(key, vec![field.as_bytes().to_vec()], b"HDEL")
    }

    /// Queues `RPUSH`.
    pub fn list_push(&mut self, user_key: &str, values: &[&[u8]]) -> &mut Self {
        let key = self.table.resolve(user_key);
        let tail = values.iter().map(|v| v.to_vec()).collect();
        self.push(key, tail, b"RPUSH")
    }

    /// Queues `LRANGE`.
    pub fn list_slice(&mut self, user_key: &str, start: i64, stop: i64) -> &mut Self {
        let key = self.table.resolve(user_key);
        self.push(
            key,
            vec![start.to_string().into_bytes(), stop.to_string().into_bytes()],
            b"LRANGE",
        )
    }

    /// Queues `SADD`.
    pub fn set_add(&mut self, user_key: &str, members: &[&[u8]]) -> &mut Self {
        let key = self.table.resolve(user_key);
        let tail = members.iter().map(|m| m.to_vec()).collect();
        self.push(key, tail, b"SADD")
    }

    /// Queues `ZADD`.
    pub fn sorted_add(&mut self, user_key: &str, score: f64, member: &[u8]) -> &mut Self {
        let key = self.table.resolve(user_key);
        self.push(
            key,
            vec![score.to_string().into_bytes(), member.to_vec()],
            b"ZADD",
        )
    }

    /// Runs the queued commands back to back and returns one reply each.
    ///
    /// Individual error replies come back as `RespValue::Error` in place, as
    /// the backend reports them; only transport failures fail the call.
    pub async fn run_pipeline(self) -> Result<Vec<RespValue>> {
        if self.cmds.is_empty() {
            return Ok(Vec::new());
        }
        self.check_slots()?;
        let routing_key = self.keys[0].clone();
        self.table
            .registry()
            .exec_pipeline(
                self.table.connection_name(),
                &routing_key,
                &self.cmds,
            )
            .await
    }

    /// Runs the queued commands atomically inside MULTI/EXEC and returns the
    /// per-command replies from EXEC.
    pub async fn run_atomic(self) -> Result<Vec<RespValue>> {
        if self.cmds.is_empty() {
            return Ok(Vec::new());
        }
        self.check_slots()?;
        let routing_key = self.keys[0].clone();

        let mut framed = Vec::with_capacity(self.cmds.len() + 2);
        framed.push(vec![b"MULTI".to_vec()]);
        framed.extend(self.cmds.iter().cloned());
        framed.push(vec![b"EXEC".to_vec()]);

        let mut replies = self
            .table
            .registry()
            .exec_pipeline(self.table.connection_name(), &routing_key, &framed)
            .await?;

        // Layout: +OK, one +QUEUED per command, then the EXEC array.
        if replies.len() != self.cmds.len() + 2 {
            return Err(Error::UnexpectedResponse);
        }
        let exec = replies.pop().expect("exec reply present");
        for reply in replies {
            match reply {
                RespValue::Simple(_) => {}
                RespValue::Error(message) => return Err(Error::Server { message }),
                _ => return Err(Error::UnexpectedResponse),
            }
        }
        match exec {
            RespValue::Array(Some(results)) => Ok(results),
            RespValue::Error(message) => Err(Error::Server { message }),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    /// Atomic and pipelined batches run on one connection, so on a cluster
    /// every key must live in one slot.
    fn check_slots(&self) -> Result<()> {
        if !self.table.registry().is_cluster(self.table.connection_name())? {
            return Ok(());
        }
        let groups = group_keys_by_slot(self.keys.iter().cloned());
        if groups.len() > 1 {
            return Err(Error::CrossSlotBatch);
        }
        Ok(())
    }
}
