//! # Cluster Client and Slot Mapping
//!
//! Purpose: Route commands to the shard owning their key, and group key sets
//! by shard so multi-key batches can stay slot-local.
//!
//! ## Design Principles
//! 1. **Pure Slot Math**: `key_slot` and `group_keys_by_slot` touch no state,
//!    so callers can plan batches before any network I/O.
//! 2. **Lazy Pools**: One bounded pool per node, created on first use.
//! 3. **Topology from the Source**: Slot ranges come from `CLUSTER SLOTS`,
//!    refreshed when a node answers `MOVED`.
//! 4. **Read Scaling**: Read-only commands go to replicas when available.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tablekv_resp::RespValue;

use crate::config::{NodeConfig, PoolOptions};
use crate::conn::Pool;
use crate::error::{Error, Result};

/// Slot count of a cluster-mode backend.
pub const SLOT_COUNT: u16 = 16384;

/// Computes the shard slot owning `key`.
///
/// When the key contains a non-empty hash tag (`{...}`), only the tag is
/// hashed, so `user:{42}:a` and `user:{42}:b` co-reside.
pub fn key_slot(key: &str) -> u16 {
    let bytes = key.as_bytes();
    let hashed = match bytes.iter().position(|&b| b == b'{') {
        Some(open) => match bytes[open + 1..].iter().position(|&b| b == b'}') {
            // An empty tag `{}` hashes the whole key.
            Some(0) | None => bytes,
            Some(close) => &bytes[open + 1..open + 1 + close],
        },
        None => bytes,
    };
    crc16(hashed) % SLOT_COUNT
}

/// Groups keys by their shard slot, preserving input order within each group.
///
/// The union of all groups is exactly the input; an empty input yields an
/// empty map.
pub fn group_keys_by_slot<I, S>(keys: I) -> BTreeMap<u16, Vec<String>>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut groups: BTreeMap<u16, Vec<String>> = BTreeMap::new();
    for key in keys {
        let key = key.into();
        groups.entry(key_slot(&key)).or_default().push(key);
    }
    groups
}

/// CRC16/XMODEM (poly 0x1021, init 0), the hash cluster backends use for
/// key slots.
fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            if crc & 0x8000 != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

/// One contiguous slot range and the nodes serving it.
#[derive(Debug, Clone)]
struct SlotRange {
    start: u16,
    end: u16,
    master: String,
    replicas: Vec<String>,
}

/// Client for a sharded cluster: topology, per-node pools, slot routing.
pub(crate) struct ClusterClient {
    seeds: Vec<NodeConfig>,
    options: PoolOptions,
    auth: Option<String>,
    ranges: Mutex<Vec<SlotRange>>,
    pools: Mutex<HashMap<(String, bool), Pool>>,
    replica_cursor: AtomicUsize,
}

impl ClusterClient {
    /// Connects to the first reachable seed and learns the slot map.
    pub(crate) async fn connect(seeds: Vec<NodeConfig>, options: PoolOptions) -> Result<Self> {
        if seeds.is_empty() {
            return Err(Error::InvalidConfig {
                reason: "cluster mode requires at least one seed node".to_string(),
            });
        }
        let auth = seeds[0].auth.clone();
        let client = ClusterClient {
            seeds,
            options,
            auth,
            ranges: Mutex::new(Vec::new()),
            pools: Mutex::new(HashMap::new()),
            replica_cursor: AtomicUsize::new(0),
        };
        client.refresh_topology().await?;
        Ok(client)
    }

    /// Executes one command, routed by `key`'s slot when a key is given.
    ///
    /// A `MOVED` reply triggers one topology refresh and one retry against
    /// the node the redirect names.
    pub(crate) async fn exec(
        &self,
        key: Option<&str>,
        readonly: bool,
        args: &[&[u8]],
    ) -> Result<RespValue> {
        let (addr, on_replica) = self.route(key.map(key_slot), readonly)?;
        let reply = self.exec_at(&addr, on_replica, args).await?;

        if let Some(target) = moved_target(&reply) {
            tracing::debug!(addr = %addr, target = %target, "following MOVED redirect");
            self.refresh_topology().await?;
            return self.exec_at(&target, false, args).await;
        }
        Ok(reply)
    }

    /// Runs a command sequence on the single node owning `routing_key`.
    pub(crate) async fn exec_pipeline(
        &self,
        routing_key: &str,
        cmds: &[Vec<Vec<u8>>],
    ) -> Result<Vec<RespValue>> {
        let (addr, _) = self.route(Some(key_slot(routing_key)), false)?;
        let mut conn = self.pool_for(&addr, false).acquire().await?;
        conn.exec_pipeline(cmds).await
    }

    async fn exec_at(&self, addr: &str, on_replica: bool, args: &[&[u8]]) -> Result<RespValue> {
        let mut conn = self.pool_for(addr, on_replica).acquire().await?;
        conn.exec(args).await
    }

    /// Picks the node for a slot. Keyless commands go to the first master.
    fn route(&self, slot: Option<u16>, readonly: bool) -> Result<(String, bool)> {
        let ranges = self.ranges.lock().expect("topology mutex poisoned");
        let range = match slot {
            Some(slot) => ranges
                .iter()
                .find(|r| r.start <= slot && slot <= r.end)
                .ok_or_else(|| Error::ClusterDown {
                    reason: format!("no node owns slot {slot}"),
                })?,
            None => ranges.first().ok_or_else(|| Error::ClusterDown {
                reason: "slot map is empty".to_string(),
            })?,
        };

        if readonly && !range.replicas.is_empty() {
            let idx = self.replica_cursor.fetch_add(1, Ordering::Relaxed) % range.replicas.len();
            return Ok((range.replicas[idx].clone(), true));
        }
        Ok((range.master.clone(), false))
    }

    fn pool_for(&self, addr: &str, readonly: bool) -> Pool {
        let mut pools = self.pools.lock().expect("pools mutex poisoned");
        pools
            .entry((addr.to_string(), readonly))
            .or_insert_with(|| {
                let node = node_for_addr(addr, self.auth.clone());
                Pool::new(node, self.options.clone(), readonly)
            })
            .clone()
    }

    /// Re-reads the slot map from the first seed that answers.
    async fn refresh_topology(&self) -> Result<()> {
        let mut last_err = Error::ClusterDown {
            reason: "no seed nodes configured".to_string(),
        };
        for seed in &self.seeds {
            let seed = seed.effective()?;
            let pool = self.pool_for(&seed.addr(), false);
            let reply = match pool.acquire().await {
                Ok(mut conn) => conn.exec(&[b"CLUSTER", b"SLOTS"]).await,
                Err(err) => Err(err),
            };
            match reply.and_then(parse_slot_ranges) {
                Ok(ranges) => {
                    tracing::debug!(ranges = ranges.len(), seed = %seed.addr(), "slot map refreshed");
                    *self.ranges.lock().expect("topology mutex poisoned") = ranges;
                    return Ok(());
                }
                Err(err) => last_err = err,
            }
        }
        tracing::warn!(error = %last_err, "cluster topology refresh failed on every seed");
        Err(last_err)
    }
}

fn node_for_addr(addr: &str, auth: Option<String>) -> NodeConfig {
    let (host, port) = match addr.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().unwrap_or(6379)),
        None => (addr, 6379),
    };
    NodeConfig {
        host: host.to_string(),
        port,
        db: 0,
        auth,
        uri: None,
    }
}

/// Extracts the `host:port` target from a `MOVED <slot> <addr>` error reply.
fn moved_target(reply: &RespValue) -> Option<String> {
    let message = match reply {
        RespValue::Error(message) => message,
        _ => return None,
    };
    let text = std::str::from_utf8(message).ok()?;
    let mut parts = text.split_whitespace();
    if parts.next()? != "MOVED" {
        return None;
    }
    let _slot = parts.next()?;
    parts.next().map(|addr| addr.to_string())
}

/// Parses a `CLUSTER SLOTS` reply: an array of
/// `[start, end, [host, port, ...], replica...]` entries.
fn parse_slot_ranges(reply: RespValue) -> Result<Vec<SlotRange>> {
    let entries = match reply {
        RespValue::Array(Some(entries)) => entries,
        RespValue::Error(message) => return Err(Error::Server { message }),
        _ => return Err(Error::UnexpectedResponse),
    };

    let mut ranges = Vec::with_capacity(entries.len());
    for entry in entries {
        let items = match entry {
            RespValue::Array(Some(items)) if items.len() >= 3 => items,
            _ => return Err(Error::UnexpectedResponse),
        };
        let start = slot_bound(&items[0])?;
        let end = slot_bound(&items[1])?;
        let master = endpoint(&items[2])?;
        let mut replicas = Vec::new();
        for item in &items[3..] {
            replicas.push(endpoint(item)?);
        }
        ranges.push(SlotRange {
            start,
            end,
            master,
            replicas,
        });
    }
    Ok(ranges)
}

fn slot_bound(value: &RespValue) -> Result<u16> {
    match value {
        RespValue::Integer(n) if (0..SLOT_COUNT as i64).contains(n) => Ok(*n as u16),
        _ => Err(Error::UnexpectedResponse),
    }
}

fn endpoint(value: &RespValue) -> Result<String> {
    let items = match value {
        RespValue::Array(Some(items)) if items.len() >= 2 => items,
        _ => return Err(Error::UnexpectedResponse),
    };
    let host = match &items[0] {
        RespValue::Bulk(Some(host)) => String::from_utf8_lossy(host).into_owned(),
        _ => return Err(Error::UnexpectedResponse),
    };
    let port = match &items[1] {
        RespValue::Integer(port) if (0..=u16::MAX as i64).contains(port) => *port,
        _ => return Err(Error::UnexpectedResponse),
    };
    Ok(format!("{host}:{port}"))
}
