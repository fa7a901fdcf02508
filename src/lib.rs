//! # peercache
//!
//! A distributed read-through cache:
//! - Named groups, each backed by a loader that reads the source of truth
//! - Size-bounded LRU per group, with eviction callbacks
//! - Per-key request coalescing: one load per burst of concurrent misses
//! - Optional bloom filter that fast-rejects keys known not to exist
//! - Consistent-hash routing of keys to their owning peer over HTTP
//!
//! ## Architecture
//!
//! ```text
//!            GET /api?key=Tom
//!                  │
//! ┌────────────────▼───────────────┐       GET /_cache/scores/Tom
//! │ Node A                         │ ────────────────────────────────┐
//! │  Group "scores"                │                                 │
//! │   filter → LRU → singleflight  │                  ┌──────────────▼─┐
//! │   → ring: owner of "Tom"? ─────┼── Node B ──────▶ │ Node B         │
//! │   → loader (if self / failed)  │                  │  Group "scores"│
//! └────────────────────────────────┘                  │  LRU → loader  │
//!                                                     └────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```no_run
//! use peercache::{CacheServer, Config, GetterFn, GroupBuilder, GroupRegistry, HttpPool};
//! use std::sync::Arc;
//!
//! # async fn run() -> peercache::Result<()> {
//! let config = Config::load()?;
//! let registry = Arc::new(GroupRegistry::new());
//! let scores = registry.register(
//!     GroupBuilder::new(
//!         "scores",
//!         GetterFn::new(|key: &str| match key {
//!             "Tom" => Ok(b"630".to_vec()),
//!             _ => Err(anyhow::anyhow!("{} not exist", key)),
//!         }),
//!     )
//!     .cache_bytes(2 << 10)
//!     .build()?,
//! )?;
//! scores.register_peers(Arc::new(HttpPool::from_config(&config)))?;
//!
//! let value = scores.get("Tom").await?;
//! assert_eq!(value.as_slice(), b"630");
//!
//! CacheServer::new(registry, &config).serve().await
//! # }
//! ```
//!
//! ### Start a node
//! ```bash
//! peercache serve --port 8001 --api \
//!   --peers http://localhost:8001,http://localhost:8002,http://localhost:8003
//! curl "http://localhost:9999/api?key=Tom"
//! ```

pub mod cache;
pub mod common;
pub mod group;
pub mod peer;

// Re-export commonly used types
pub use cache::ByteView;
pub use common::{Config, Error, PeerError, Result};
pub use group::{Getter, GetterFn, Group, GroupBuilder, GroupRegistry};
pub use peer::{CacheServer, HttpGetter, HttpPool};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
