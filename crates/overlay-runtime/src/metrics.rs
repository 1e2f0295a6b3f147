use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub struct CacheStat {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub size: usize,
}

impl std::fmt::Display for CacheStat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "hits: {:>8}, misses: {:>8}, hit_rate: {:>6.2}%, size: {:>8}",
            self.hits,
            self.misses,
            self.hit_rate * 100.0,
            self.size
        )
    }
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
pub struct CacheStats {
    pub dispatcher: CacheStat,
    pub symbol: CacheStat,
    pub address: CacheStat,
    pub address_evictions: u64,
    pub dispatch_searches: u64,
    pub native_calls: u64,
}

impl std::fmt::Display for CacheStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Cache Statistics:")?;
        writeln!(f, "  Dispatcher Cache:   {}", self.dispatcher)?;
        writeln!(f, "  Symbol Cache:       {}", self.symbol)?;
        writeln!(f, "  Address Cache:      {}", self.address)?;
        writeln!(f, "  Address Evictions:  {:>8}", self.address_evictions)?;
        writeln!(f, "  Dispatch Searches:  {:>8}", self.dispatch_searches)?;
        writeln!(f, "  Native Calls:       {:>8}", self.native_calls)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CacheSizes {
    pub dispatcher_size: usize,
    pub symbol_size: usize,
    pub address_size: usize,
}

/// Runtime counters.
///
/// All counters use `Ordering::Relaxed`: they are independent and only need
/// atomic updates, not ordering against other memory operations.
#[derive(Debug, Default)]
pub struct RuntimeMetrics {
    /// Overload searches actually performed (memoized and single-overload
    /// dispatch do not count).
    pub dispatch_searches: AtomicU64,
    pub dispatcher_cache_hits: AtomicU64,
    pub dispatcher_cache_misses: AtomicU64,
    pub symbol_cache_hits: AtomicU64,
    pub symbol_cache_misses: AtomicU64,
    pub address_cache_hits: AtomicU64,
    pub address_cache_misses: AtomicU64,
    pub address_cache_evictions: AtomicU64,
    pub native_calls: AtomicU64,
}

impl RuntimeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_dispatch_search(&self) {
        self.dispatch_searches.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dispatcher_cache_hit(&self) {
        self.dispatcher_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_dispatcher_cache_miss(&self) {
        self.dispatcher_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_symbol_cache_hit(&self) {
        self.symbol_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_symbol_cache_miss(&self) {
        self.symbol_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_address_cache_hit(&self) {
        self.address_cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_address_cache_miss(&self) {
        self.address_cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_address_cache_evictions(&self, count: usize) {
        if count > 0 {
            self.address_cache_evictions
                .fetch_add(count as u64, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_native_call(&self) {
        self.native_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dispatch_searches(&self) -> u64 {
        self.dispatch_searches.load(Ordering::Relaxed)
    }

    pub fn cache_statistics(&self, sizes: CacheSizes) -> CacheStats {
        CacheStats {
            dispatcher: self.stat(
                self.dispatcher_cache_hits.load(Ordering::Relaxed),
                self.dispatcher_cache_misses.load(Ordering::Relaxed),
                sizes.dispatcher_size,
            ),
            symbol: self.stat(
                self.symbol_cache_hits.load(Ordering::Relaxed),
                self.symbol_cache_misses.load(Ordering::Relaxed),
                sizes.symbol_size,
            ),
            address: self.stat(
                self.address_cache_hits.load(Ordering::Relaxed),
                self.address_cache_misses.load(Ordering::Relaxed),
                sizes.address_size,
            ),
            address_evictions: self.address_cache_evictions.load(Ordering::Relaxed),
            dispatch_searches: self.dispatch_searches(),
            native_calls: self.native_calls.load(Ordering::Relaxed),
        }
    }

    fn stat(&self, hits: u64, misses: u64, size: usize) -> CacheStat {
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        CacheStat {
            hits,
            misses,
            hit_rate,
            size,
        }
    }
}
