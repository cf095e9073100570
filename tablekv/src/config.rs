//! # Connection Configuration
//!
//! Purpose: Describe named backend connections the way host applications
//! configure them: a single node (host/port/auth/db or a `redis://` URI) or
//! an ordered list of cluster seed nodes.
//!
//! ## Design Principles
//! 1. **Config as Data**: Plain serde structs deserialize straight from the
//!    host app's configuration mapping.
//! 2. **Defaults First**: Every field has a sensible default; an empty object
//!    means `127.0.0.1:6379`, db 0, no auth.
//! 3. **URI Wins**: When `uri` is set it overrides the individual fields.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};

/// One backend endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Backend host.
    pub host: String,
    /// Backend port.
    pub port: u16,
    /// Logical database index, selected after connect. Ignored in cluster mode.
    pub db: u32,
    /// Password sent via AUTH when present.
    pub auth: Option<String>,
    /// Full connection URI, e.g. `redis://:secret@127.0.0.1:6380/4`.
    /// Overrides the fields above when set.
    pub uri: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        NodeConfig {
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            auth: None,
            uri: None,
        }
    }
}

impl NodeConfig {
    /// Builds a node config from host and port, keeping the other defaults.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        NodeConfig {
            host: host.into(),
            port,
            ..NodeConfig::default()
        }
    }

    /// Parses a `redis://[:password@]host[:port][/db]` URI.
    pub fn from_uri(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("redis://")
            .ok_or_else(|| Error::InvalidConfig {
                reason: format!("unsupported uri scheme: {uri}"),
            })?;

        let (auth, rest) = match rest.rsplit_once('@') {
            Some((cred, tail)) => {
                // `:password@` is the common form; `user:password@` keeps
                // only the password since the backend has no user names here.
                let pass = cred.rsplit_once(':').map(|(_, p)| p).unwrap_or(cred);
                (Some(pass.to_string()), tail)
            }
            None => (None, rest),
        };

        let (hostport, db) = match rest.split_once('/') {
            Some((hp, db)) if !db.is_empty() => {
                let db = db.parse::<u32>().map_err(|_| Error::InvalidConfig {
                    reason: format!("invalid db index in uri: {uri}"),
                })?;
                (hp, db)
            }
            Some((hp, _)) => (hp, 0),
            None => (rest, 0),
        };

        let (host, port) = match hostport.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| Error::InvalidAddress {
                    addr: hostport.to_string(),
                })?;
                (host, port)
            }
            None => (hostport, 6379),
        };
        if host.is_empty() {
            return Err(Error::InvalidAddress {
                addr: hostport.to_string(),
            });
        }

        Ok(NodeConfig {
            host: host.to_string(),
            port,
            db,
            auth,
            uri: None,
        })
    }

    /// The `host:port` endpoint string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Applies the `uri` field when present, yielding the effective config.
    pub(crate) fn effective(&self) -> Result<NodeConfig> {
        match &self.uri {
            Some(uri) => NodeConfig::from_uri(uri),
            None => Ok(self.clone()),
        }
    }
}

/// Options for one named connection.
///
/// A list of node descriptors selects cluster mode, anything else a single
/// node, mirroring how the configuration mapping distinguishes the two.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ConnectOptions {
    /// Ordered seed nodes for a sharded cluster. Reads scale to replicas.
    Cluster(Vec<NodeConfig>),
    /// One backend node.
    Single(NodeConfig),
}

/// Pool sizing shared by every connection a registry creates.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Maximum idle connections kept per node.
    pub max_idle: usize,
    /// Maximum total connections per node (idle + in-use).
    pub max_total: usize,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        PoolOptions {
            max_idle: 8,
            max_total: 16,
            connect_timeout: Some(Duration::from_secs(5)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_full_form() {
        let node = NodeConfig::from_uri("redis://:authpassword@127.0.0.1:6380/4").unwrap();
        assert_eq!(node.host, "127.0.0.1");
        assert_eq!(node.port, 6380);
        assert_eq!(node.db, 4);
        assert_eq!(node.auth.as_deref(), Some("authpassword"));
    }

    #[test]
    fn uri_minimal_form() {
        let node = NodeConfig::from_uri("redis://example.internal").unwrap();
        assert_eq!(node.host, "example.internal");
        assert_eq!(node.port, 6379);
        assert_eq!(node.db, 0);
        assert!(node.auth.is_none());
    }

    #[test]
    fn uri_rejects_other_schemes() {
        assert!(NodeConfig::from_uri("http://127.0.0.1").is_err());
    }

    #[test]
    fn uri_rejects_bad_port() {
        assert!(NodeConfig::from_uri("redis://host:notaport").is_err());
    }

    #[test]
    fn options_mapping_distinguishes_modes() {
        let raw = r#"{
            "master": {"host": "10.0.0.1", "port": 6379},
            "shards": [{"host": "10.0.0.2"}, {"host": "10.0.0.3", "port": 7000}]
        }"#;
        let map: std::collections::HashMap<String, ConnectOptions> =
            serde_json::from_str(raw).unwrap();
        assert!(matches!(map["master"], ConnectOptions::Single(_)));
        match &map["shards"] {
            ConnectOptions::Cluster(nodes) => {
                assert_eq!(nodes.len(), 2);
                assert_eq!(nodes[1].port, 7000);
            }
            _ => panic!("expected cluster options"),
        }
    }

    #[test]
    fn effective_prefers_uri() {
        let node = NodeConfig {
            uri: Some("redis://:pw@10.1.1.1:7001/2".to_string()),
            ..NodeConfig::default()
        };
        let effective = node.effective().unwrap();
        assert_eq!(effective.addr(), "10.1.1.1:7001");
        assert_eq!(effective.db, 2);
        assert_eq!(effective.auth.as_deref(), Some("pw"));
    }
}
