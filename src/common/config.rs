//! Configuration for peercache nodes
//!
//! Sources, lowest priority first:
//! 1. `peercache.toml` in the working directory (or the file named by
//!    `PEERCACHE_CONFIG`), optional
//! 2. `PEERCACHE__*` environment variables (`__` separates nesting levels,
//!    e.g. `PEERCACHE__NODE__REPLICAS=100`)
//!
//! The binary applies CLI flags on top of the loaded config.

use crate::common::hash::DEFAULT_REPLICAS;
use crate::common::utils::{normalize_peer_url, validate_group_name};
use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::Path;

/// Default path prefix of the peer protocol
pub const DEFAULT_BASE_PATH: &str = "/_cache";

/// Environment variable naming an explicit config file
pub const CONFIG_PATH_ENV: &str = "PEERCACHE_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "peercache";
const ENV_PREFIX: &str = "PEERCACHE";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,

    /// Groups hosted by this node
    #[serde(default = "default_groups")]
    pub groups: Vec<GroupConfig>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_groups() -> Vec<GroupConfig> {
    vec![GroupConfig::default()]
}

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's own base URL, as it appears in `peers`
    #[serde(default = "default_self_url")]
    pub self_url: String,

    /// Bind address for the peer protocol
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Bind address for the public API (disabled when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_addr: Option<SocketAddr>,

    /// Base URLs of every node in the cluster, including this one
    #[serde(default)]
    pub peers: Vec<String>,

    /// Path prefix of the peer protocol
    #[serde(default = "default_base_path")]
    pub base_path: String,

    /// Virtual nodes per peer on the hash ring
    #[serde(default = "default_replicas")]
    pub replicas: usize,

    /// Timeout for a single peer fetch
    #[serde(default = "default_peer_timeout")]
    pub peer_timeout_ms: u64,
}

fn default_self_url() -> String {
    "http://localhost:8001".to_string()
}
fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8001))
}
fn default_base_path() -> String {
    DEFAULT_BASE_PATH.to_string()
}
fn default_replicas() -> usize {
    DEFAULT_REPLICAS
}
fn default_peer_timeout() -> u64 {
    3_000
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            self_url: default_self_url(),
            bind_addr: default_bind_addr(),
            api_addr: None,
            peers: Vec::new(),
            base_path: default_base_path(),
            replicas: default_replicas(),
            peer_timeout_ms: default_peer_timeout(),
        }
    }
}

/// Group configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,

    /// Cache capacity in bytes (<= 0 means unlimited)
    #[serde(default = "default_cache_bytes")]
    pub cache_bytes: i64,

    /// Bloom filter for fast negative lookups (disabled when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<FilterConfig>,
}

fn default_cache_bytes() -> i64 {
    2 << 10
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            name: "scores".to_string(),
            cache_bytes: default_cache_bytes(),
            filter: None,
        }
    }
}

/// Bloom filter sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    #[serde(default = "default_expected_keys")]
    pub expected_keys: u64,

    #[serde(default = "default_bits_per_key")]
    pub bits_per_key: u64,
}

fn default_expected_keys() -> u64 {
    10_000_000
}
fn default_bits_per_key() -> u64 {
    10
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            expected_keys: default_expected_keys(),
            bits_per_key: default_bits_per_key(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            node: NodeConfig::default(),
            groups: default_groups(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load config from the default file (if any) and the environment
    pub fn load() -> Result<Self> {
        let file = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.into());
        Self::build(config::File::with_name(&file).required(false), ENV_PREFIX)
    }

    /// Load config from an explicit file (must exist), then the environment
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::build(config::File::from(path.as_ref()).required(true), ENV_PREFIX)
    }

    fn build<S>(file: S, env_prefix: &str) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config: Config = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("node.peers")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot form a working node
    pub fn validate(&self) -> Result<()> {
        let base = &self.node.base_path;
        if !base.starts_with('/') || (base.len() > 1 && base.ends_with('/')) || base == "/" {
            return Err(Error::InvalidConfig(format!(
                "base path {:?} must start with '/' and not end with '/'",
                base
            )));
        }

        if self.node.replicas == 0 {
            return Err(Error::InvalidConfig("replicas must be at least 1".into()));
        }

        let mut seen = HashSet::new();
        for group in &self.groups {
            validate_group_name(&group.name)?;
            if !seen.insert(group.name.as_str()) {
                return Err(Error::InvalidConfig(format!(
                    "duplicate group {:?}",
                    group.name
                )));
            }
            if let Some(filter) = group.filter {
                if filter.expected_keys == 0 || filter.bits_per_key == 0 {
                    return Err(Error::InvalidConfig(format!(
                        "filter of group {:?} must have non-zero expected_keys and bits_per_key",
                        group.name
                    )));
                }
            }
        }

        Ok(())
    }

    /// Peer list with normalised URLs, always including this node
    pub fn peer_urls(&self) -> Vec<String> {
        let self_url = normalize_peer_url(&self.node.self_url);
        let mut peers: Vec<String> = self
            .node
            .peers
            .iter()
            .map(|p| normalize_peer_url(p))
            .filter(|p| !p.is_empty())
            .collect();
        if !peers.contains(&self_url) {
            peers.push(self_url);
        }
        peers.sort();
        peers.dedup();
        peers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.node.base_path, "/_cache");
        assert_eq!(config.node.replicas, 50);
        assert_eq!(config.groups.len(), 1);
        assert_eq!(config.groups[0].cache_bytes, 2048);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
log_level = "debug"

[node]
self_url = "http://localhost:8002"
bind_addr = "127.0.0.1:8002"
peers = ["http://localhost:8001", "http://localhost:8002/"]
replicas = 10

[[groups]]
name = "scores"
cache_bytes = 4096

[groups.filter]
expected_keys = 1000
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.node.replicas, 10);
        assert_eq!(config.node.base_path, DEFAULT_BASE_PATH);
        assert_eq!(config.groups[0].cache_bytes, 4096);
        assert_eq!(
            config.groups[0].filter,
            Some(FilterConfig {
                expected_keys: 1000,
                bits_per_key: 10
            })
        );
        assert_eq!(
            config.peer_urls(),
            vec![
                "http://localhost:8001".to_string(),
                "http://localhost:8002".to_string()
            ]
        );
    }

    #[test]
    fn test_env_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[node]
bind_addr = "127.0.0.1:8003"
peers = ["http://localhost:8001"]
replicas = 10
"#
        )
        .unwrap();

        // own prefix, so parallel tests reading PEERCACHE__* are unaffected
        std::env::set_var("PCENVTEST__NODE__REPLICAS", "7");
        std::env::set_var("PCENVTEST__NODE__PEERS", "http://a:1,http://b:2");
        std::env::set_var("PCENVTEST__LOG_LEVEL", "warn");

        let config = Config::build(
            config::File::from(file.path()).required(true),
            "PCENVTEST",
        );

        std::env::remove_var("PCENVTEST__NODE__REPLICAS");
        std::env::remove_var("PCENVTEST__NODE__PEERS");
        std::env::remove_var("PCENVTEST__LOG_LEVEL");

        let config = config.unwrap();
        assert_eq!(config.node.replicas, 7);
        assert_eq!(
            config.node.peers,
            vec!["http://a:1".to_string(), "http://b:2".to_string()]
        );
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.node.bind_addr, "127.0.0.1:8003".parse().unwrap());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(Config::from_file("/nonexistent/peercache.toml").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_base_path() {
        let mut config = Config::default();
        config.node.base_path = "_cache".into();
        assert!(config.validate().is_err());
        config.node.base_path = "/_cache/".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_groups() {
        let mut config = Config::default();
        config.groups.push(GroupConfig::default());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_replicas() {
        let mut config = Config::default();
        config.node.replicas = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_peer_urls_include_self() {
        let mut config = Config::default();
        config.node.peers = vec!["http://localhost:8002".into()];
        assert_eq!(
            config.peer_urls(),
            vec![
                "http://localhost:8001".to_string(),
                "http://localhost:8002".to_string()
            ]
        );
    }
}
