//! Consistent hashing for peer routing
//!
//! Every physical peer is placed on a 32-bit ring `replicas` times
//! (at `hash(i ++ peer)`), and a key belongs to the first virtual node at or
//! after `hash(key)`, wrapping around to the start of the ring.
//!
//! All nodes of a cluster must agree on the hash function and the replica
//! count, otherwise they route the same key to different owners.

use std::collections::HashMap;

/// Hash function used to place peers and keys on the ring
pub type RingHash = fn(&[u8]) -> u32;

/// Default number of virtual nodes per peer
pub const DEFAULT_REPLICAS: usize = 50;

/// Default ring hash (CRC32, IEEE polynomial)
pub fn crc32(data: &[u8]) -> u32 {
    crc32fast::hash(data)
}

/// Consistent hash ring mapping keys to peer identities
#[derive(Debug, Clone)]
pub struct ConsistentHashRing {
    hash: RingHash,
    replicas: usize,
    /// Virtual node hashes, ascending
    keys: Vec<u32>,
    hash_map: HashMap<u32, String>,
}

impl ConsistentHashRing {
    pub fn new(replicas: usize) -> Self {
        Self::with_hash(replicas, crc32)
    }

    pub fn with_hash(replicas: usize, hash: RingHash) -> Self {
        Self {
            hash,
            replicas,
            keys: Vec::new(),
            hash_map: HashMap::new(),
        }
    }

    fn virtual_hash(&self, replica: usize, peer: &str) -> u32 {
        (self.hash)(format!("{}{}", replica, peer).as_bytes())
    }

    /// Add peers, `replicas` virtual nodes each
    pub fn add<I, S>(&mut self, peers: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for peer in peers {
            let peer = peer.as_ref();
            for i in 0..self.replicas {
                let hash = self.virtual_hash(i, peer);
                // first claim on a position wins
                if self.hash_map.contains_key(&hash) {
                    continue;
                }
                let pos = self.keys.partition_point(|&h| h < hash);
                self.keys.insert(pos, hash);
                self.hash_map.insert(hash, peer.to_string());
            }
        }
    }

    /// Remove every virtual node owned by `peer`
    pub fn remove(&mut self, peer: &str) {
        for i in 0..self.replicas {
            let hash = self.virtual_hash(i, peer);
            // A colliding virtual node belongs to the peer that claimed it first.
            if self.hash_map.get(&hash).map(String::as_str) != Some(peer) {
                continue;
            }
            self.hash_map.remove(&hash);
            let start = self.keys.partition_point(|&h| h < hash);
            let end = self.keys.partition_point(|&h| h <= hash);
            self.keys.drain(start..end);
        }
    }

    /// Owner of `key`, or `None` if the ring is empty
    pub fn get(&self, key: &str) -> Option<&str> {
        if self.keys.is_empty() {
            return None;
        }

        let hash = (self.hash)(key.as_bytes());
        let idx = self.keys.partition_point(|&h| h < hash);
        let owner = self.keys[idx % self.keys.len()];
        self.hash_map.get(&owner).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Number of virtual nodes on the ring
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Distinct peers currently on the ring
    pub fn peers(&self) -> Vec<String> {
        let mut peers: Vec<String> = self.hash_map.values().cloned().collect();
        peers.sort();
        peers.dedup();
        peers
    }
}

impl Default for ConsistentHashRing {
    fn default() -> Self {
        Self::new(DEFAULT_REPLICAS)
    }
}
