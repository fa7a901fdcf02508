//! Common utilities and types shared across peercache

pub mod config;
pub mod error;
pub mod hash;
pub mod metrics;
pub mod tracing_middleware;
pub mod utils;

pub use config::{Config, FilterConfig, GroupConfig, NodeConfig, DEFAULT_BASE_PATH};
pub use error::{Error, PeerError, Result};
pub use hash::{ConsistentHashRing, RingHash, DEFAULT_REPLICAS};
pub use metrics::{Counter, GroupStats, StatsSnapshot};
pub use utils::{decode_key, encode_key, normalize_peer_url, validate_group_name};
