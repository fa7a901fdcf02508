//! Local caching primitives
//!
//! - [`LruCache`]: size-bounded LRU store
//! - [`BloomFilter`]: negative-lookup filter over a [`BitSet`]
//! - [`SingleFlight`]: per-key request coalescing
//! - [`ByteView`]: immutable cached value

pub mod bloom;
pub mod byteview;
pub mod lru;
pub mod singleflight;

pub use bloom::{BitSet, BloomFilter, KeyHasher, SaltedSha256};
pub use byteview::ByteView;
pub use lru::{LruCache, OnEvicted, Weighted};
pub use singleflight::SingleFlight;
