//! # TableKV
//!
//! Purpose: A table-scoped access layer over a shared Redis-protocol store.
//! Application modules open a [`Table`] handle bound to a logical table name
//! and a named backend connection, read and write values, hashes, lists,
//! sets, and sorted sets under the table's key namespace, and coordinate
//! exclusive access across processes with a polling distributed lock.
//!
//! ## Design Principles
//! 1. **Name Indirection**: Handles reference connections by registry name,
//!    never by pointer, so they survive reconnects and entry replacement.
//! 2. **Deterministic Keyspace**: `namespace:table:key` resolution is a pure
//!    function; every handle sharing a table resolves identically, which is
//!    what keeps data and locks consistent.
//! 3. **Thin Forwarding**: Data methods pass commands to the backend
//!    bit-for-bit and adapt replies; nothing is cached or retried.
//! 4. **Delegated Exclusivity**: The lock leans entirely on the store's
//!    SET-if-absent-with-expiry primitive plus a bounded poll loop.
//!
//! ## Quick Start
//!
//! ```no_run
//! use tablekv::{ConnectOptions, NodeConfig, Registry, RegistryConfig, Table};
//!
//! # async fn demo() -> tablekv::Result<()> {
//! let registry = Registry::with_config(RegistryConfig {
//!     namespace: Some("shop".to_string()),
//!     ..RegistryConfig::default()
//! });
//! registry
//!     .connect("master", ConnectOptions::Single(NodeConfig::new("127.0.0.1", 6379)))
//!     .await?;
//!
//! let orders = Table::open(&registry, "orders")?;
//! orders.set_value("42", b"paid", None).await?;
//!
//! let token = orders.lock(1).await?;
//! // ... critical section over the orders table ...
//! orders.unlock(&token).await?;
//! # Ok(())
//! # }
//! ```

mod batch;
mod cluster;
mod config;
mod conn;
mod error;
mod keyspace;
mod lock;
mod registry;
mod table;

pub use batch::Batch;
pub use cluster::{group_keys_by_slot, key_slot, SLOT_COUNT};
pub use config::{ConnectOptions, NodeConfig, PoolOptions};
pub use error::{Error, Result};
pub use keyspace::resolve_key;
pub use lock::{LockOptions, LockToken};
pub use registry::{
    ErrorHook, Liveness, ReadyHook, Registry, RegistryConfig, DEFAULT_CONNECTION,
};
pub use table::Table;

pub use tablekv_resp::RespValue;
