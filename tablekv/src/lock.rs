//! # Distributed Lock
//!
//! Purpose: Cooperative cross-process mutual exclusion over a table's key
//! namespace, using the backend's SET-if-absent-with-expiry primitive and a
//! fixed-interval poll.
//!
//! ## Design Principles
//! 1. **Atomic Arbiter**: `SET <key> <id> NX EX <ttl>` alone decides who
//!    holds the lock; there is no read-then-set window in the loop.
//! 2. **Iterative Polling**: Contention retries in a plain loop with an
//!    optional caller-supplied bound, never by recursion.
//! 3. **Self-Expiry**: The lock key always carries the acquisition TTL, so a
//!    crashed holder's lock frees itself without a watchdog.
//! 4. **Owned Release**: Tokens carry a unique id compared against the stored
//!    value before deletion, so a stale holder cannot free a successor's lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tablekv_resp::RespValue;

use crate::error::{Error, Result};
use crate::registry::Registry;

/// Opaque handle identifying one successful lock acquisition.
///
/// Required to release the lock; it identifies the acquisition instance, not
/// the value stored in the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    key: String,
    id: String,
}

impl LockToken {
    /// The fully-qualified lock key this token guards.
    pub fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn id(&self) -> &str {
        &self.id
    }
}

/// Acquisition tuning.
#[derive(Debug, Clone)]
pub struct LockOptions {
    /// Sleep between contention retries.
    pub poll_interval: Duration,
    /// Upper bound on total waiting; `None` polls until acquired.
    pub max_wait: Option<Duration>,
}

impl Default for LockOptions {
    fn default() -> Self {
        LockOptions {
            poll_interval: Duration::from_millis(20),
            max_wait: None,
        }
    }
}

/// Per-connection lock coordinator.
///
/// Each registry entry owns one, keyed like the registry itself, so locking
/// through differently named connections can never collide on shared state.
pub(crate) struct LockCoordinator {
    epoch_nanos: u64,
    counter: AtomicU64,
}

impl LockCoordinator {
    pub(crate) fn new() -> Self {
        let epoch_nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        LockCoordinator {
            epoch_nanos,
            counter: AtomicU64::new(0),
        }
    }

    /// Unique id per acquisition attempt: process identity, coordinator
    /// birth time, and a running counter.
    fn next_id(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}-{}", std::process::id(), self.epoch_nanos, seq)
    }

    /// Acquires the lock at `key` on the named connection.
    ///
    /// Loops on `SET NX EX`: success returns a token, contention sleeps
    /// `poll_interval` and retries. With `max_wait` set, an unexpired foreign
    /// lock eventually surfaces as `LockWaitExceeded`; without it the loop
    /// polls until the holder releases or the key expires.
    pub(crate) async fn acquire(
        &self,
        registry: &Registry,
        conn_name: &str,
        key: &str,
        ttl_secs: u64,
        options: &LockOptions,
    ) -> Result<LockToken> {
        let id = self.next_id();
        let ttl = ttl_secs.to_string();
        let started = Instant::now();

        loop {
            let reply = registry
                .exec(
                    conn_name,
                    Some(key),
                    false,
                    &[
                        b"SET",
                        key.as_bytes(),
                        id.as_bytes(),
                        b"NX",
                        b"EX",
                        ttl.as_bytes(),
                    ],
                )
                .await?;

            match reply {
                // +OK: the conditional set won.
                RespValue::Simple(_) => {
                    return Ok(LockToken {
                        key: key.to_string(),
                        id,
                    });
                }
                // Null bulk: somebody else holds the key.
                RespValue::Bulk(None) => {}
                RespValue::Error(message) => return Err(Error::Server { message }),
                _ => return Err(Error::UnexpectedResponse),
            }

            if let Some(max_wait) = options.max_wait {
                if started.elapsed() + options.poll_interval > max_wait {
                    return Err(Error::LockWaitExceeded);
                }
            }
            tracing::debug!(key, "lock contended, polling");
            tokio::time::sleep(options.poll_interval).await;
        }
    }

    /// Releases the lock identified by `token`.
    ///
    /// Compare-and-delete: the key is removed only while it still stores the
    /// token's id. Returns `false` for stale or expired tokens, never an
    /// error.
    ///
    /// The compare and the delete are separate commands, so a narrow window
    /// remains: if the key expires and a successor acquires between the
    /// matching GET and the DEL, the DEL removes the successor's lock.
    /// Closing it needs a server-side script, which the forwarded command
    /// set does not include; holders should release well inside their TTL.
    pub(crate) async fn release(
        registry: &Registry,
        conn_name: &str,
        token: &LockToken,
    ) -> Result<bool> {
        let key = token.key();
        let reply = registry
            .exec(conn_name, Some(key), false, &[b"GET", key.as_bytes()])
            .await?;

        match reply {
            RespValue::Bulk(Some(stored)) if stored == token.id().as_bytes() => {}
            // Expired, or reacquired by someone else: nothing to release.
            RespValue::Bulk(_) => return Ok(false),
            RespValue::Error(message) => return Err(Error::Server { message }),
            _ => return Err(Error::UnexpectedResponse),
        }

        let reply = registry
            .exec(conn_name, Some(key), false, &[b"DEL", key.as_bytes()])
            .await?;
        match reply {
            RespValue::Integer(removed) => Ok(removed > 0),
            RespValue::Error(message) => Err(Error::Server { message }),
            _ => Err(Error::UnexpectedResponse),
        }
    }

    /// Existence probe on the lock key.
    ///
    /// Inherently racy against concurrent acquisition; it reports, it does
    /// not arbitrate.
    pub(crate) async fn probe(registry: &Registry, conn_name: &str, key: &str) -> Result<bool> {
        let reply = registry
            .exec(conn_name, Some(key), true, &[b"EXISTS", key.as_bytes()])
            .await?;
        match reply {
            RespValue::Integer(found) => Ok(found > 0),
            RespValue::Error(message) => Err(Error::Server { message }),
            _ => Err(Error::UnexpectedResponse),
        }
    }
}
