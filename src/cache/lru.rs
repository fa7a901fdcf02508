//! Size-bounded LRU cache
//!
//! Entries live in a slab (`Vec<Option<Node>>`) threaded into a doubly
//! linked recency list by index, with a `HashMap` from key to slot. Every
//! operation is O(1) apart from the evictions an insert triggers.
//!
//! The cache is not synchronised; owners wrap it in a mutex. `get` reorders
//! the recency list, so reads need exclusive access too.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Values that report how many bytes they occupy
pub trait Weighted {
    fn weight(&self) -> usize;
}

impl Weighted for crate::cache::ByteView {
    fn weight(&self) -> usize {
        self.len()
    }
}

impl Weighted for String {
    fn weight(&self) -> usize {
        self.len()
    }
}

impl Weighted for Vec<u8> {
    fn weight(&self) -> usize {
        self.len()
    }
}

/// Observer invoked with every evicted entry
pub type OnEvicted<V> = Box<dyn FnMut(&str, &V) + Send>;

struct Node<V> {
    key: String,
    value: V,
    prev: Option<usize>,
    next: Option<usize>,
}

/// LRU cache bounded by the total weight of its values
pub struct LruCache<V> {
    /// <= 0 means unlimited
    max_bytes: i64,
    used_bytes: i64,
    index: HashMap<String, usize>,
    nodes: Vec<Option<Node<V>>>,
    free: Vec<usize>,
    /// Most recently used
    head: Option<usize>,
    /// Least recently used
    tail: Option<usize>,
    on_evicted: Option<OnEvicted<V>>,
}

impl<V: Weighted> LruCache<V> {
    pub fn new(max_bytes: i64) -> Self {
        Self {
            max_bytes,
            used_bytes: 0,
            index: HashMap::new(),
            nodes: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            on_evicted: None,
        }
    }

    /// Install an eviction observer
    pub fn with_on_evicted(mut self, f: impl FnMut(&str, &V) + Send + 'static) -> Self {
        self.on_evicted = Some(Box::new(f));
        self
    }

    /// Look up `key` and mark it most recently used
    pub fn get(&mut self, key: &str) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.move_to_front(idx);
        self.nodes[idx].as_ref().map(|n| &n.value)
    }

    /// Look up `key` without touching recency
    pub fn peek(&self, key: &str) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.nodes[idx].as_ref().map(|n| &n.value)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or replace `key`, then evict from the cold end until the cache
    /// fits. The entry just inserted is not exempt.
    pub fn add(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        let weight = value.weight() as i64;

        if let Some(&idx) = self.index.get(&key) {
            if let Some(node) = self.nodes[idx].as_mut() {
                self.used_bytes += weight - node.value.weight() as i64;
                node.value = value;
            }
            self.move_to_front(idx);
        } else {
            let node = Node {
                key: key.clone(),
                value,
                prev: None,
                next: None,
            };
            let idx = match self.free.pop() {
                Some(idx) => {
                    self.nodes[idx] = Some(node);
                    idx
                }
                None => {
                    self.nodes.push(Some(node));
                    self.nodes.len() - 1
                }
            };
            self.push_front(idx);
            self.index.insert(key, idx);
            self.used_bytes += weight;
        }

        while self.max_bytes > 0 && self.used_bytes > self.max_bytes {
            if !self.remove_oldest() {
                break;
            }
        }
    }

    /// Evict the least recently used entry. Returns false on an empty cache.
    pub fn remove_oldest(&mut self) -> bool {
        let Some(idx) = self.tail else {
            return false;
        };
        let Some(node) = self.take(idx) else {
            return false;
        };

        if let Some(on_evicted) = self.on_evicted.as_mut() {
            // The entry is fully unlinked by now, so a panicking observer
            // cannot leave the cache half-updated.
            let result = catch_unwind(AssertUnwindSafe(|| on_evicted(&node.key, &node.value)));
            if result.is_err() {
                tracing::warn!(key = %node.key, "eviction callback panicked");
            }
        }
        true
    }

    /// Drop `key` without notifying the eviction observer
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let idx = *self.index.get(key)?;
        self.take(idx).map(|node| node.value)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Total weight of the entries currently held
    pub fn used_bytes(&self) -> i64 {
        self.used_bytes
    }

    pub fn max_bytes(&self) -> i64 {
        self.max_bytes
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> Vec<&str> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while let Some(idx) = cursor {
            match self.nodes[idx].as_ref() {
                Some(node) => {
                    keys.push(node.key.as_str());
                    cursor = node.next;
                }
                None => break,
            }
        }
        keys
    }

    /// Unlink slot `idx` and release it
    fn take(&mut self, idx: usize) -> Option<Node<V>> {
        self.unlink(idx);
        let node = self.nodes[idx].take()?;
        self.free.push(idx);
        self.index.remove(&node.key);
        self.used_bytes -= node.value.weight() as i64;
        Some(node)
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.nodes[idx].as_ref() {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.nodes[p].as_mut() {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.nodes[n].as_mut() {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }

        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(node) = self.nodes[h].as_mut() {
                node.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }
}

impl<V> std::fmt::Debug for LruCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruCache")
            .field("max_bytes", &self.max_bytes)
            .field("used_bytes", &self.used_bytes)
            .field("len", &self.index.len())
            .finish()
    }
}
