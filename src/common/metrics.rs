//! Per-group counters and Prometheus text rendering
//!
//! Counters are plain relaxed atomics: they are observability only and never
//! take part in cache decisions.

use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for tracking event counts
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Statistics for one group
#[derive(Debug, Default)]
pub struct GroupStats {
    /// Calls to `Group::get`, including rejected ones
    pub gets: Counter,
    pub cache_hits: Counter,
    /// Successful fetches from the owning peer
    pub peer_loads: Counter,
    pub peer_errors: Counter,
    /// Loader invocations (one per coalesced burst)
    pub local_loads: Counter,
    pub local_load_errs: Counter,
    /// Requests rejected by the bloom filter
    pub filtered: Counter,
    pub evictions: Counter,
    /// Requests that arrived from other peers
    pub server_requests: Counter,
}

impl GroupStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            gets: self.gets.get(),
            cache_hits: self.cache_hits.get(),
            peer_loads: self.peer_loads.get(),
            peer_errors: self.peer_errors.get(),
            local_loads: self.local_loads.get(),
            local_load_errs: self.local_load_errs.get(),
            filtered: self.filtered.get(),
            evictions: self.evictions.get(),
            server_requests: self.server_requests.get(),
        }
    }
}

/// Plain copy of [`GroupStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct StatsSnapshot {
    pub gets: u64,
    pub cache_hits: u64,
    pub peer_loads: u64,
    pub peer_errors: u64,
    pub local_loads: u64,
    pub local_load_errs: u64,
    pub filtered: u64,
    pub evictions: u64,
    pub server_requests: u64,
}

impl StatsSnapshot {
    fn fields(&self) -> [(&'static str, &'static str, u64); 9] {
        [
            ("gets_total", "Get calls", self.gets),
            ("cache_hits_total", "Local cache hits", self.cache_hits),
            ("peer_loads_total", "Values fetched from peers", self.peer_loads),
            ("peer_errors_total", "Failed peer fetches", self.peer_errors),
            ("local_loads_total", "Loader invocations", self.local_loads),
            ("local_load_errors_total", "Failed loader invocations", self.local_load_errs),
            ("filtered_total", "Requests rejected by the bloom filter", self.filtered),
            ("evictions_total", "Entries evicted from the cache", self.evictions),
            ("server_requests_total", "Requests received from peers", self.server_requests),
        ]
    }
}

/// Render group statistics in the Prometheus text format
pub fn to_prometheus<'a, I>(groups: I) -> String
where
    I: IntoIterator<Item = (&'a str, StatsSnapshot)>,
{
    let groups: Vec<(&str, StatsSnapshot)> = groups.into_iter().collect();
    let mut out = String::new();

    if groups.is_empty() {
        return out;
    }

    for idx in 0..groups[0].1.fields().len() {
        let (name, help, _) = groups[0].1.fields()[idx];
        let _ = writeln!(out, "# HELP peercache_{} {}", name, help);
        let _ = writeln!(out, "# TYPE peercache_{} counter", name);
        for (group, snapshot) in &groups {
            let value = snapshot.fields()[idx].2;
            let _ = writeln!(out, "peercache_{}{{group=\"{}\"}} {}", name, group, value);
        }
    }

    out
}
