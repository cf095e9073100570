//! # Connection Registry
//!
//! Purpose: Own every named backend connection — single-node or cluster —
//! and hand table handles a live client looked up by name at call time.
//!
//! ## Design Principles
//! 1. **Name Indirection**: Handles keep a name, never a client pointer, so
//!    they survive reconnects and entry replacement.
//! 2. **Replace, Don't Close**: Re-connecting a name swaps the entry; the
//!    displaced client drains as its in-flight guards drop.
//! 3. **Errors Stay Local**: Transport failures mark the entry errored, log,
//!    and fire the error hook; they never take the process down.
//! 4. **One Coordinator per Name**: Each entry carries its own lock
//!    coordinator, so locks on different connections cannot collide.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use tablekv_resp::RespValue;

use crate::cluster::ClusterClient;
use crate::config::{ConnectOptions, PoolOptions};
use crate::conn::Pool;
use crate::error::{Error, Result};
use crate::lock::LockCoordinator;

/// Default connection name, matching the conventional single-backend setup.
pub const DEFAULT_CONNECTION: &str = "master";

/// Liveness of a named connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// Registered, transport not yet verified.
    Connecting,
    /// Last transport interaction succeeded.
    Connected,
    /// Last transport interaction failed.
    Errored,
}

/// Invoked once a connection's transport is verified.
pub type ReadyHook = Arc<dyn Fn(&str) + Send + Sync>;
/// Invoked on transport-level errors, with the connection name and error.
pub type ErrorHook = Arc<dyn Fn(&str, &Error) + Send + Sync>;

/// Registry-wide settings.
#[derive(Clone, Default)]
pub struct RegistryConfig {
    /// Deployment namespace prefixed to every resolved key.
    pub namespace: Option<String>,
    /// Pool sizing applied to every connection.
    pub pool: PoolOptions,
    /// Ready callback.
    pub on_ready: Option<ReadyHook>,
    /// Transport-error callback.
    pub on_error: Option<ErrorHook>,
}

enum Backend {
    Single(Pool),
    Cluster(ClusterClient),
}

pub(crate) struct Entry {
    backend: Backend,
    liveness: Mutex<Liveness>,
    coordinator: LockCoordinator,
}

impl Entry {
    pub(crate) fn coordinator(&self) -> &LockCoordinator {
        &self.coordinator
    }
}

/// Named-connection registry; process-wide shared state behind an `Arc`.
pub struct Registry {
    config: RegistryConfig,
    entries: RwLock<HashMap<String, Arc<Entry>>>,
}

impl Registry {
    /// Creates an empty registry with default settings.
    pub fn new() -> Arc<Self> {
        Self::with_config(RegistryConfig::default())
    }

    /// Creates an empty registry with the given settings.
    pub fn with_config(config: RegistryConfig) -> Arc<Self> {
        Arc::new(Registry {
            config,
            entries: RwLock::new(HashMap::new()),
        })
    }

    /// Registers every `(name, options)` pair of a configuration mapping.
    ///
    /// This is the startup registration surface: the host app deserializes
    /// its connection section into the map and hands it over.
    pub async fn from_config(
        config: RegistryConfig,
        connections: HashMap<String, ConnectOptions>,
    ) -> Result<Arc<Self>> {
        let registry = Self::with_config(config);
        for (name, options) in connections {
            registry.connect(&name, options).await?;
        }
        Ok(registry)
    }

    /// Deployment namespace used in key resolution.
    pub fn namespace(&self) -> Option<&str> {
        self.config.namespace.as_deref()
    }

    /// Connects a named backend and registers it, replacing any prior entry.
    ///
    /// Connectivity is verified before registration: a PING for a single
    /// node, a slot-map fetch for a cluster. On success the ready hook fires;
    /// on failure the error hook fires and nothing is registered.
    pub async fn connect(&self, name: &str, options: ConnectOptions) -> Result<()> {
        let backend = match self.open_backend(options).await {
            Ok(backend) => backend,
            Err(err) => {
                tracing::warn!(name, error = %err, "connection failed");
                if let Some(hook) = &self.config.on_error {
                    hook(name, &err);
                }
                return Err(err);
            }
        };

        let entry = Arc::new(Entry {
            backend,
            liveness: Mutex::new(Liveness::Connected),
            coordinator: LockCoordinator::new(),
        });
        let replaced = self
            .entries
            .write()
            .expect("registry lock poisoned")
            .insert(name.to_string(), entry)
            .is_some();

        tracing::info!(name, replaced, "connection ready");
        if let Some(hook) = &self.config.on_ready {
            hook(name);
        }
        Ok(())
    }

    async fn open_backend(&self, options: ConnectOptions) -> Result<Backend> {
        match options {
            ConnectOptions::Single(node) => {
                let node = node.effective()?;
                let pool = Pool::new(node, self.config.pool.clone(), false);
                let mut conn = pool.acquire().await?;
                match conn.exec(&[b"PING"]).await? {
                    RespValue::Simple(_) => {}
                    RespValue::Error(message) => return Err(Error::Server { message }),
                    _ => return Err(Error::UnexpectedResponse),
                }
                Ok(Backend::Single(pool))
            }
            ConnectOptions::Cluster(seeds) => {
                let client = ClusterClient::connect(seeds, self.config.pool.clone()).await?;
                Ok(Backend::Cluster(client))
            }
        }
    }

    /// True when `name` currently maps to a live entry.
    pub fn is_registered(&self, name: &str) -> bool {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .contains_key(name)
    }

    /// Liveness of the named connection.
    pub fn liveness(&self, name: &str) -> Result<Liveness> {
        let entry = self.entry(name)?;
        let liveness = *entry.liveness.lock().expect("liveness lock poisoned");
        Ok(liveness)
    }

    /// Removes the named connection; its sockets close as guards drop.
    pub fn close(&self, name: &str) -> Result<()> {
        let removed = self
            .entries
            .write()
            .expect("registry lock poisoned")
            .remove(name);
        match removed {
            Some(_) => {
                tracing::info!(name, "connection closed");
                Ok(())
            }
            None => Err(Error::NotConnected {
                name: name.to_string(),
            }),
        }
    }

    /// True when the named connection targets a sharded cluster.
    pub(crate) fn is_cluster(&self, name: &str) -> Result<bool> {
        let entry = self.entry(name)?;
        Ok(matches!(entry.backend, Backend::Cluster(_)))
    }

    pub(crate) fn entry(&self, name: &str) -> Result<Arc<Entry>> {
        self.entries
            .read()
            .expect("registry lock poisoned")
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotConnected {
                name: name.to_string(),
            })
    }

    /// Executes one command on the named connection.
    ///
    /// `key` routes cluster commands by slot; `readonly` lets the cluster
    /// client scale the read to a replica.
    pub(crate) async fn exec(
        &self,
        name: &str,
        key: Option<&str>,
        readonly: bool,
        args: &[&[u8]],
    ) -> Result<RespValue> {
        let entry = self.entry(name)?;
        let result = match &entry.backend {
            Backend::Single(pool) => match pool.acquire().await {
                Ok(mut conn) => conn.exec(args).await,
                Err(err) => Err(err),
            },
            Backend::Cluster(client) => client.exec(key, readonly, args).await,
        };
        self.observe(name, &entry, result)
    }

    /// Executes a command sequence on one connection of the named backend.
    pub(crate) async fn exec_pipeline(
        &self,
        name: &str,
        routing_key: &str,
        cmds: &[Vec<Vec<u8>>],
    ) -> Result<Vec<RespValue>> {
        let entry = self.entry(name)?;
        let result = match &entry.backend {
            Backend::Single(pool) => match pool.acquire().await {
                Ok(mut conn) => conn.exec_pipeline(cmds).await,
                Err(err) => Err(err),
            },
            Backend::Cluster(client) => client.exec_pipeline(routing_key, cmds).await,
        };
        self.observe(name, &entry, result)
    }

    /// Updates liveness and fires the error hook for transport failures.
    fn observe<T>(&self, name: &str, entry: &Entry, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => {
                *entry.liveness.lock().expect("liveness lock poisoned") = Liveness::Connected;
            }
            Err(err) if err.is_transport() => {
                *entry.liveness.lock().expect("liveness lock poisoned") = Liveness::Errored;
                tracing::warn!(name, error = %err, "transport error");
                if let Some(hook) = &self.config.on_error {
                    hook(name, err);
                }
            }
            Err(_) => {}
        }
        result
    }
}
