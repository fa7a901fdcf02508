//! Consistent-hash peer pool

use crate::common::hash::crc32;
use crate::common::{
    normalize_peer_url, Config, ConsistentHashRing, RingHash, DEFAULT_BASE_PATH, DEFAULT_REPLICAS,
};
use crate::peer::client::{HttpGetter, DEFAULT_PEER_TIMEOUT};
use crate::peer::{PeerGetter, PeerPicker};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Routes keys to peers over a consistent-hash ring and fetches from them
/// over HTTP
///
/// ```
/// use peercache::HttpPool;
/// use peercache::peer::PeerPicker;
///
/// let pool = HttpPool::new("http://localhost:8001");
/// pool.set_peers(["http://localhost:8001", "http://localhost:8002"]);
/// // `None` means this node owns the key
/// let owner = pool.pick_peer("Tom");
/// # let _ = owner;
/// ```
pub struct HttpPool {
    self_url: String,
    base_path: String,
    replicas: usize,
    hash: RingHash,
    timeout: Duration,
    client: reqwest::Client,
    state: RwLock<PoolState>,
}

struct PoolState {
    ring: ConsistentHashRing,
    getters: HashMap<String, Arc<HttpGetter>>,
}

impl HttpPool {
    pub fn new(self_url: impl AsRef<str>) -> Self {
        let mut pool = Self {
            self_url: normalize_peer_url(self_url.as_ref()),
            base_path: DEFAULT_BASE_PATH.to_string(),
            replicas: DEFAULT_REPLICAS,
            hash: crc32,
            timeout: DEFAULT_PEER_TIMEOUT,
            client: reqwest::Client::new(),
            state: RwLock::new(PoolState {
                ring: ConsistentHashRing::default(),
                getters: HashMap::new(),
            }),
        };
        pool.reset();
        pool
    }

    /// Pool configured from the node section, with its peers already set
    pub fn from_config(config: &Config) -> Self {
        let pool = Self::new(&config.node.self_url)
            .with_base_path(&config.node.base_path)
            .with_replicas(config.node.replicas)
            .with_timeout(Duration::from_millis(config.node.peer_timeout_ms));
        pool.set_peers(config.peer_urls());
        pool
    }

    // Builder methods drop any peers already added.

    pub fn with_base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self.reset();
        self
    }

    /// Virtual nodes per peer
    pub fn with_replicas(mut self, replicas: usize) -> Self {
        self.replicas = replicas;
        self.reset();
        self
    }

    pub fn with_hash(mut self, hash: RingHash) -> Self {
        self.hash = hash;
        self.reset();
        self
    }

    /// Per-request timeout for peer fetches
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.reset();
        self
    }

    pub fn self_url(&self) -> &str {
        &self.self_url
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Replace the topology with `peers`. Include this node's own URL so
    /// that it owns its share of the keys.
    pub fn set_peers<I, S>(&self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state.write();
        state.ring = ConsistentHashRing::with_hash(self.replicas, self.hash);
        state.getters.clear();
        self.insert_peers(&mut state, peers);
        info!(self_url = %self.self_url, peers = ?state.ring.peers(), "peer set replaced");
    }

    /// Add peers to the current topology
    pub fn add_peers<I, S>(&self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.state.write();
        self.insert_peers(&mut state, peers);
    }

    /// Take `peer` out of the ring; its keys move to the remaining peers
    pub fn remove_peer(&self, peer: &str) {
        let peer = normalize_peer_url(peer);
        let mut state = self.state.write();
        state.ring.remove(&peer);
        if state.getters.remove(&peer).is_some() {
            info!(peer = %peer, "peer removed");
        }
    }

    /// Peers currently in the ring, sorted
    pub fn peers(&self) -> Vec<String> {
        self.state.read().ring.peers()
    }

    /// Peer that owns `key`, if any, including this node
    pub fn owner(&self, key: &str) -> Option<String> {
        self.state.read().ring.get(key).map(str::to_string)
    }

    fn insert_peers<I, S>(&self, state: &mut PoolState, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let peers: Vec<String> = peers
            .into_iter()
            .map(|p| normalize_peer_url(p.as_ref()))
            .filter(|p| !p.is_empty() && !state.getters.contains_key(p))
            .collect();

        for peer in &peers {
            let getter = HttpGetter::with_client(
                format!("{}{}", peer, self.base_path),
                self.client.clone(),
                self.timeout,
            );
            state.getters.insert(peer.clone(), Arc::new(getter));
        }
        state.ring.add(&peers);
    }

    fn reset(&mut self) {
        let state = self.state.get_mut();
        state.ring = ConsistentHashRing::with_hash(self.replicas, self.hash);
        state.getters.clear();
    }
}

impl PeerPicker for HttpPool {
    fn pick_peer(&self, key: &str) -> Option<Arc<dyn PeerGetter>> {
        let state = self.state.read();
        let peer = state.ring.get(key)?;
        if peer == self.self_url {
            return None;
        }
        debug!(peer, key, "picked peer");
        let getter = state.getters.get(peer)?;
        Some(Arc::clone(getter) as Arc<dyn PeerGetter>)
    }
}

impl std::fmt::Debug for HttpPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPool")
            .field("self_url", &self.self_url)
            .field("base_path", &self.base_path)
            .field("replicas", &self.replicas)
            .field("peers", &self.peers())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SELF: &str = "http://localhost:8001";
    const OTHERS: [&str; 2] = ["http://localhost:8002", "http://localhost:8003"];

    fn cluster() -> HttpPool {
        let pool = HttpPool::new(SELF);
        pool.set_peers([SELF, OTHERS[0], OTHERS[1]]);
        pool
    }

    #[test]
    fn test_empty_pool_picks_nobody() {
        let pool = HttpPool::new(SELF);
        assert!(pool.pick_peer("Tom").is_none());
        assert!(pool.owner("Tom").is_none());
    }

    #[test]
    fn test_self_owned_keys_are_not_picked() {
        let pool = cluster();
        let mut remote = 0;
        for i in 0..200 {
            let key = format!("key-{}", i);
            let owner = pool.owner(&key).unwrap();
            match pool.pick_peer(&key) {
                Some(peer) => {
                    assert_ne!(owner, SELF);
                    assert_eq!(peer.url(), format!("{}{}", owner, DEFAULT_BASE_PATH));
                    remote += 1;
                }
                None => assert_eq!(owner, SELF),
            }
        }
        // three peers at 50 replicas each: both outcomes occur
        assert!(remote > 0 && remote < 200);
    }

    #[test]
    fn test_only_self_means_always_local() {
        let pool = HttpPool::new(SELF);
        pool.set_peers([SELF]);
        assert!((0..50).all(|i| pool.pick_peer(&format!("k{}", i)).is_none()));
    }

    #[test]
    fn test_set_peers_replaces_topology() {
        let pool = cluster();
        pool.set_peers([OTHERS[0]]);
        assert_eq!(pool.peers(), vec![OTHERS[0].to_string()]);
        assert_eq!(pool.owner("Tom").unwrap(), OTHERS[0]);
    }

    #[test]
    fn test_add_and_remove_peers() {
        let pool = HttpPool::new(SELF);
        pool.add_peers([SELF]);
        pool.add_peers([OTHERS[0], OTHERS[0], "http://localhost:8003/"]);
        assert_eq!(pool.peers().len(), 3);

        pool.remove_peer(OTHERS[0]);
        pool.remove_peer(OTHERS[1]);
        assert_eq!(pool.peers(), vec![SELF.to_string()]);
        assert!(pool.pick_peer("Tom").is_none());
    }

    #[test]
    fn test_same_topology_same_owner() {
        let a = cluster();
        let b = HttpPool::new(OTHERS[0]);
        b.set_peers([OTHERS[1], OTHERS[0], SELF]);
        for i in 0..100 {
            let key = format!("key-{}", i);
            assert_eq!(a.owner(&key), b.owner(&key));
        }
    }

    #[test]
    fn test_custom_base_path_and_replicas() {
        let pool = HttpPool::new(SELF)
            .with_base_path("/_geecache")
            .with_replicas(3);
        pool.set_peers([OTHERS[0]]);
        let peer = pool.pick_peer("Tom").unwrap();
        assert_eq!(peer.url(), "http://localhost:8002/_geecache");
    }
}
