//! Configuration for minidfs components

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides (`MINIDFS_WORKER_POOL_SIZE=32`, ...)
const ENV_PREFIX: &str = "MINIDFS";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address every node listens on (and the client dials)
    pub host: IpAddr,

    /// Worker pool capacity shared by all nodes
    pub worker_pool_size: usize,

    /// Client-side reachability probe timeout
    pub probe_timeout_ms: u64,

    /// Logging level
    pub log_level: String,

    /// Node roster, in operator order (node 1 first)
    pub nodes: Vec<NodeConfig>,
}

/// A single storage node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// TCP port the node listens on
    pub port: u16,

    /// Flat storage directory owned by the node
    pub directory: PathBuf,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}
fn default_worker_pool_size() -> usize {
    10
}
fn default_probe_timeout() -> u64 {
    1000
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_nodes() -> Vec<NodeConfig> {
    (1..=3)
        .map(|n| NodeConfig {
            port: 5000 + n,
            directory: PathBuf::from(format!("server_files{}", n)),
        })
        .collect()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            worker_pool_size: default_worker_pool_size(),
            probe_timeout_ms: default_probe_timeout(),
            log_level: default_log_level(),
            nodes: default_nodes(),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then apply
    /// `MINIDFS_*` environment overrides. Missing keys fall back to defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject rosters the node manager cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::InvalidConfig("at least one node is required".into()));
        }
        if self.worker_pool_size == 0 {
            return Err(Error::InvalidConfig(
                "worker_pool_size must be greater than zero".into(),
            ));
        }

        let mut ports = HashSet::new();
        for node in &self.nodes {
            if node.port == 0 {
                return Err(Error::InvalidConfig("node port cannot be 0".into()));
            }
            if !ports.insert(node.port) {
                return Err(Error::InvalidConfig(format!(
                    "port {} is assigned to more than one node",
                    node.port
                )));
            }
        }
        Ok(())
    }

    /// Socket address of a node on the configured host
    pub fn node_addr(&self, node: &NodeConfig) -> SocketAddr {
        SocketAddr::new(self.host, node.port)
    }

    /// Addresses of every node, in roster order
    pub fn node_addrs(&self) -> Vec<SocketAddr> {
        self.nodes.iter().map(|n| self.node_addr(n)).collect()
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
