//! The group: one named, cached dataset
//!
//! Request path of [`Group::get`]:
//!
//! ```text
//! empty key? ── yes ──> EmptyKey
//! filter says absent? ── yes ──> FilteredAbsent
//! cached (and not marked stale)? ── yes ──> value
//! coalesce per key:
//!     stale hint set? ── yes ──> load locally (clears the hint)
//!     cached now? ── yes ──> value
//!     owned by a peer? ── yes ──> fetch from peer ── ok ──> value
//!                                     └── error ──> load locally
//!     load locally ──> add to filter + cache ──> value
//! ```
//!
//! Only the node that loads a value from the source caches it; values
//! fetched from peers are returned but not stored.

use crate::cache::{BloomFilter, ByteView, LruCache, OnEvicted, SingleFlight};
use crate::common::{validate_group_name, Error, GroupStats, Result, StatsSnapshot};
use crate::group::Getter;
use crate::peer::{PeerGetter, PeerPicker};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tracing::{debug, warn};

/// A named cache namespace backed by one loader
pub struct Group {
    name: String,
    getter: Box<dyn Getter>,
    main_cache: Mutex<LruCache<ByteView>>,
    peers: OnceLock<Arc<dyn PeerPicker>>,
    loader: SingleFlight<ByteView>,
    filter: OnceLock<BloomFilter>,
    stale: Mutex<HashSet<String>>,
    stats: Arc<GroupStats>,
}

/// Builder for [`Group`]
pub struct GroupBuilder {
    name: String,
    getter: Box<dyn Getter>,
    cache_bytes: i64,
    filter: Option<(u64, u64)>,
    on_evicted: Option<OnEvicted<ByteView>>,
}

impl GroupBuilder {
    pub fn new(name: impl Into<String>, getter: impl Getter) -> Self {
        Self {
            name: name.into(),
            getter: Box::new(getter),
            cache_bytes: 0,
            filter: None,
            on_evicted: None,
        }
    }

    /// Cache capacity in bytes; <= 0 means unlimited
    pub fn cache_bytes(mut self, cache_bytes: i64) -> Self {
        self.cache_bytes = cache_bytes;
        self
    }

    /// Attach a bloom filter at construction
    pub fn filter(mut self, expected_keys: u64, bits_per_key: u64) -> Self {
        self.filter = Some((expected_keys, bits_per_key));
        self
    }

    /// Observe entries evicted from the cache
    pub fn on_evicted(mut self, f: impl FnMut(&str, &ByteView) + Send + 'static) -> Self {
        self.on_evicted = Some(Box::new(f));
        self
    }

    pub fn build(self) -> Result<Group> {
        validate_group_name(&self.name)?;

        let stats = Arc::new(GroupStats::new());
        let evictions = Arc::clone(&stats);
        let mut observer = self.on_evicted;
        let main_cache =
            LruCache::new(self.cache_bytes).with_on_evicted(move |key: &str, value: &ByteView| {
                evictions.evictions.inc();
                if let Some(observer) = observer.as_mut() {
                    observer(key, value);
                }
            });

        let filter = OnceLock::new();
        if let Some((expected_keys, bits_per_key)) = self.filter {
            let _ = filter.set(BloomFilter::new(expected_keys, bits_per_key));
        }

        Ok(Group {
            name: self.name,
            getter: self.getter,
            main_cache: Mutex::new(main_cache),
            peers: OnceLock::new(),
            loader: SingleFlight::new(),
            filter,
            stale: Mutex::new(HashSet::new()),
            stats,
        })
    }
}

impl Group {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Route cache misses through `picker`. Only the first registration
    /// takes effect.
    pub fn register_peers(&self, picker: Arc<dyn PeerPicker>) -> Result<()> {
        self.peers.set(picker).map_err(|_| {
            Error::InvalidConfig(format!(
                "peer picker for group {:?} registered more than once",
                self.name
            ))
        })
    }

    /// Attach a bloom filter after construction. Returns false if the group
    /// already has one.
    pub fn enable_filter(&self, expected_keys: u64, bits_per_key: u64) -> bool {
        if self.filter.get().is_some() {
            return false;
        }
        self.filter
            .set(BloomFilter::new(expected_keys, bits_per_key))
            .is_ok()
    }

    pub fn has_filter(&self) -> bool {
        self.filter.get().is_some()
    }

    /// Tell the filter which keys exist in the backing store, so requests for
    /// them are let through. Returns how many keys were added (0 without a
    /// filter).
    pub fn register_keys<I, S>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let Some(filter) = self.filter.get() else {
            return 0;
        };
        let mut added = 0;
        for key in keys {
            filter.add(key.as_ref());
            added += 1;
        }
        added
    }

    /// Mark `key` stale: the next `get` skips the cache and reloads it from
    /// the loader exactly once. The hint is dropped by that `get` whatever
    /// its outcome.
    pub fn mark_stale(&self, key: &str) {
        self.stale.lock().insert(key.to_string());
    }

    /// Look up `key`, loading it on a miss
    pub async fn get(self: &Arc<Self>, key: &str) -> Result<ByteView> {
        self.stats.gets.inc();

        if key.is_empty() {
            return Err(Error::EmptyKey);
        }

        if let Some(filter) = self.filter.get() {
            if !filter.might_contain(key) {
                self.stats.filtered.inc();
                self.stale.lock().remove(key);
                debug!(group = %self.name, key, "rejected by bloom filter");
                return Err(Error::FilteredAbsent(key.to_string()));
            }
        }

        if !self.is_stale(key) {
            if let Some(value) = self.lookup_cache(key) {
                self.stats.cache_hits.inc();
                debug!(group = %self.name, key, "cache hit");
                return Ok(value);
            }
        }

        self.load(key).await
    }

    /// Count a request that arrived from another node
    pub fn record_server_request(&self) {
        self.stats.server_requests.inc();
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Number of cached entries
    pub fn cache_len(&self) -> usize {
        self.main_cache.lock().len()
    }

    /// Bytes currently held by the cache
    pub fn cache_used_bytes(&self) -> i64 {
        self.main_cache.lock().used_bytes()
    }

    async fn load(self: &Arc<Self>, key: &str) -> Result<ByteView> {
        let group = Arc::clone(self);
        let owned_key = key.to_string();
        self.loader
            .run(key, async move { group.load_coalesced(&owned_key).await })
            .await
    }

    /// Runs once per burst of concurrent misses for `key`
    async fn load_coalesced(&self, key: &str) -> Result<ByteView> {
        if self.take_stale(key) {
            debug!(group = %self.name, key, "stale, reloading from source");
            return self.get_locally(key).await;
        }

        if let Some(value) = self.lookup_cache(key) {
            self.stats.cache_hits.inc();
            return Ok(value);
        }

        if let Some(picker) = self.peers.get() {
            if let Some(peer) = picker.pick_peer(key) {
                match self.get_from_peer(peer.as_ref(), key).await {
                    Ok(value) => {
                        self.stats.peer_loads.inc();
                        return Ok(value);
                    }
                    Err(e) => {
                        self.stats.peer_errors.inc();
                        warn!(
                            group = %self.name,
                            key,
                            peer = %peer.url(),
                            error = %e,
                            "peer fetch failed, loading locally"
                        );
                    }
                }
            }
        }

        self.get_locally(key).await
    }

    async fn get_from_peer(&self, peer: &dyn PeerGetter, key: &str) -> Result<ByteView> {
        let bytes = peer.get(&self.name, key).await?;
        Ok(ByteView::from(bytes))
    }

    async fn get_locally(&self, key: &str) -> Result<ByteView> {
        self.stats.local_loads.inc();

        let bytes = match self.getter.get(key).await {
            Ok(bytes) => bytes,
            Err(e) => {
                self.stats.local_load_errs.inc();
                debug!(group = %self.name, key, error = %e, "loader failed");
                return Err(Error::loader(e));
            }
        };

        let value = ByteView::from(bytes);
        self.populate_cache(key, value.clone());
        Ok(value)
    }

    fn populate_cache(&self, key: &str, value: ByteView) {
        if let Some(filter) = self.filter.get() {
            filter.add(key);
        }
        self.main_cache.lock().add(key, value);
    }

    fn lookup_cache(&self, key: &str) -> Option<ByteView> {
        self.main_cache.lock().get(key).cloned()
    }

    fn is_stale(&self, key: &str) -> bool {
        self.stale.lock().contains(key)
    }

    fn take_stale(&self, key: &str) -> bool {
        self.stale.lock().remove(key)
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("name", &self.name)
            .field("cache", &*self.main_cache.lock())
            .field("filter", &self.filter.get())
            .field("peers", &self.peers.get().is_some())
            .finish()
    }
}
