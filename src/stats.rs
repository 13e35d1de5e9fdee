//! Statistics counters
//!
//! One [`Stats`] per [`OneWire`][crate::system::OneWire], shared by
//! everything it owns. Counters are plain atomics, they only ever go up.
use std::sync::atomic::{AtomicU64, Ordering};

/// One counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(usize)]
pub enum Counter {
    CacheTries,
    CacheHits,
    CacheMisses,
    CacheExpirations,
    CacheAdditions,
    CacheDeletions,
    CacheFlips,
    DirCalls,
    DirEntries,
    ReadCalls,
    ReadCacheSuccess,
    ReadSuccess,
    ReadBytes,
    WriteCalls,
    WriteSuccess,
    WriteBytes,
    BusLocks,
    Reconnects,
    ReconnectErrors,
    SearchErrors,
    Crc8Errors,
}

impl Counter {
    /// Every counter, in index order
    pub const ALL: [Counter; 21] = [
        Counter::CacheTries,
        Counter::CacheHits,
        Counter::CacheMisses,
        Counter::CacheExpirations,
        Counter::CacheAdditions,
        Counter::CacheDeletions,
        Counter::CacheFlips,
        Counter::DirCalls,
        Counter::DirEntries,
        Counter::ReadCalls,
        Counter::ReadCacheSuccess,
        Counter::ReadSuccess,
        Counter::ReadBytes,
        Counter::WriteCalls,
        Counter::WriteSuccess,
        Counter::WriteBytes,
        Counter::BusLocks,
        Counter::Reconnects,
        Counter::ReconnectErrors,
        Counter::SearchErrors,
        Counter::Crc8Errors,
    ];

    /// Counter stored at `index`, the inverse of `as usize`.
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

/// Process wide counters
#[derive(Debug, Default)]
pub struct Stats {
    counters: [AtomicU64; Counter::ALL.len()],
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, n: u64) {
        self.counters[counter as usize].fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter as usize].load(Ordering::Relaxed)
    }
}
