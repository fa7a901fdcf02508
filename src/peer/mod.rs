//! Peer routing and the HTTP peer protocol
//!
//! A group asks its [`PeerPicker`] who owns a key; if the owner is another
//! node, the returned [`PeerGetter`] fetches the value from it. [`HttpPool`]
//! is the consistent-hash, HTTP-backed picker; [`http::create_router`]
//! serves the other side of the protocol:
//!
//! ```text
//! GET {base_path}/{group}/{key}   (group and key percent-encoded)
//!   200  raw value, application/octet-stream
//!   204  group unknown on this node
//!   400  path is not exactly {group}/{key}
//!   404  path outside base_path
//!   500  plain-text error from the group
//! ```

pub mod client;
pub mod http;
pub mod pool;
pub mod server;

use crate::common::PeerError;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use std::sync::Arc;

pub use client::HttpGetter;
pub use pool::HttpPool;
pub use server::CacheServer;

/// Locates the peer that owns a key
pub trait PeerPicker: Send + Sync + 'static {
    /// `None` when there are no peers or this node owns the key
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>>;
}

/// Fetches values from one remote peer
pub trait PeerGetter: Send + Sync + 'static {
    fn get<'a>(&'a self, group: &'a str, key: &'a str)
        -> BoxFuture<'a, Result<Bytes, PeerError>>;

    /// Base URL of the peer, for logs
    fn url(&self) -> &str;
}
