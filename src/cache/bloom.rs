//! Bloom filter for fast negative lookups
//!
//! `might_contain` never returns false for a key that went through `add`;
//! it may return true for keys that never did. There is no removal.
//!
//! Bits live in `AtomicU64` words, so concurrent `add`s cannot lose updates
//! and the filter needs no outer lock.

use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lower bound on the filter size in bits
pub const MIN_BITS: u64 = 64;
/// Bounds on the number of hash functions
pub const MIN_HASHES: usize = 1;
pub const MAX_HASHES: usize = 30;

/// Index past the end of a [`BitSet`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("bit index {index} out of range (capacity {capacity})")]
pub struct OutOfRange {
    pub index: u64,
    pub capacity: u64,
}

/// Fixed-capacity set of bits
pub struct BitSet {
    words: Vec<AtomicU64>,
}

impl BitSet {
    /// Capacity is rounded up to a whole number of 64-bit words
    pub fn with_capacity(bits: u64) -> Self {
        let words = bits.div_ceil(64) as usize;
        Self {
            words: (0..words).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Capacity in bits
    pub fn capacity(&self) -> u64 {
        self.words.len() as u64 * 64
    }

    pub fn set(&self, index: u64) -> Result<(), OutOfRange> {
        let (word, mask) = self.locate(index)?;
        word.fetch_or(mask, Ordering::Relaxed);
        Ok(())
    }

    pub fn check(&self, index: u64) -> Result<bool, OutOfRange> {
        let (word, mask) = self.locate(index)?;
        Ok(word.load(Ordering::Relaxed) & mask != 0)
    }

    /// Number of bits set
    pub fn count_ones(&self) -> u64 {
        self.words
            .iter()
            .map(|w| u64::from(w.load(Ordering::Relaxed).count_ones()))
            .sum()
    }

    fn locate(&self, index: u64) -> Result<(&AtomicU64, u64), OutOfRange> {
        let word = self
            .words
            .get((index / 64) as usize)
            .ok_or(OutOfRange {
                index,
                capacity: self.capacity(),
            })?;
        Ok((word, 1u64 << (index % 64)))
    }
}

impl fmt::Debug for BitSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitSet")
            .field("capacity", &self.capacity())
            .field("ones", &self.count_ones())
            .finish()
    }
}

/// One of the filter's hash functions
pub trait KeyHasher: Send + Sync {
    fn hash(&self, key: &str) -> u64;
}

impl<F> KeyHasher for F
where
    F: Fn(&str) -> u64 + Send + Sync,
{
    fn hash(&self, key: &str) -> u64 {
        self(key)
    }
}

/// SHA-256 of the key, first 8 bytes read big-endian, plus a salt
#[derive(Debug, Clone, Copy)]
pub struct SaltedSha256 {
    salt: u64,
}

impl SaltedSha256 {
    pub fn new(salt: u64) -> Self {
        Self { salt }
    }

    /// Salt drawn from the thread RNG
    pub fn random() -> Self {
        Self::new(rand::random::<u64>() >> 1)
    }
}

impl KeyHasher for SaltedSha256 {
    fn hash(&self, key: &str) -> u64 {
        let digest = Sha256::digest(key.as_bytes());
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(prefix).wrapping_add(self.salt)
    }
}

/// Bloom filter over a [`BitSet`]
pub struct BloomFilter {
    expected_keys: u64,
    bits_per_key: u64,
    hashers: Vec<Box<dyn KeyHasher>>,
    bits: BitSet,
}

impl BloomFilter {
    /// Filter sized for `expected_keys` with `bits_per_key` bits each, using
    /// `bits_per_key` (clamped to 1..=30) randomly salted SHA-256 hashes
    pub fn new(expected_keys: u64, bits_per_key: u64) -> Self {
        let k = (bits_per_key as usize).clamp(MIN_HASHES, MAX_HASHES);
        let hashers = (0..k)
            .map(|_| Box::new(SaltedSha256::random()) as Box<dyn KeyHasher>)
            .collect();
        Self::with_hashers(expected_keys, bits_per_key, hashers)
    }

    /// Filter with caller-supplied hash functions. An empty list falls back
    /// to the default salted hashes.
    pub fn with_hashers(
        expected_keys: u64,
        bits_per_key: u64,
        hashers: Vec<Box<dyn KeyHasher>>,
    ) -> Self {
        if hashers.is_empty() {
            return Self::new(expected_keys, bits_per_key);
        }

        let bits = expected_keys.saturating_mul(bits_per_key).max(MIN_BITS);
        Self {
            expected_keys,
            bits_per_key,
            hashers,
            bits: BitSet::with_capacity(bits),
        }
    }

    pub fn add(&self, key: &str) {
        for index in self.indexes(key) {
            if let Err(e) = self.bits.set(index) {
                panic!("bloom filter index escaped its bit set: {}", e);
            }
        }
    }

    /// False means `key` was definitely never added
    pub fn might_contain(&self, key: &str) -> bool {
        self.indexes(key)
            .all(|index| matches!(self.bits.check(index), Ok(true)))
    }

    fn indexes<'a>(&'a self, key: &'a str) -> impl Iterator<Item = u64> + 'a {
        let capacity = self.bits.capacity();
        self.hashers.iter().map(move |h| h.hash(key) % capacity)
    }

    pub fn expected_keys(&self) -> u64 {
        self.expected_keys
    }

    pub fn bits_per_key(&self) -> u64 {
        self.bits_per_key
    }

    /// Number of hash functions
    pub fn hash_count(&self) -> usize {
        self.hashers.len()
    }

    /// Size of the bit set
    pub fn bit_capacity(&self) -> u64 {
        self.bits.capacity()
    }
}

impl fmt::Debug for BloomFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BloomFilter")
            .field("expected_keys", &self.expected_keys)
            .field("bits_per_key", &self.bits_per_key)
            .field("hashes", &self.hashers.len())
            .field("bits", &self.bits)
            .finish()
    }
}
