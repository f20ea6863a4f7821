use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Assets whose individual load time is remembered
pub const MAX_TRACKED_LOAD_TIMES: usize = 256;

/// Per-asset load times for the most recently resolved assets
#[derive(Debug, Default)]
struct RecentLoadTimes {
    by_asset: HashMap<String, Duration>,
    order: VecDeque<String>,
}

impl RecentLoadTimes {
    fn insert(&mut self, asset_id: &str, duration: Duration) {
        if self.by_asset.insert(asset_id.to_string(), duration).is_some() {
            return;
        }
        self.order.push_back(asset_id.to_string());
        while self.order.len() > MAX_TRACKED_LOAD_TIMES {
            if let Some(oldest) = self.order.pop_front() {
                self.by_asset.remove(&oldest);
            }
        }
    }
}

/// Tracks counters for asset loading and caching
#[derive(Debug, Default)]
pub struct LoaderMetrics {
    load_times: RwLock<RecentLoadTimes>,
    loads_timed: AtomicU64,
    total_load_micros: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    fetch_attempts: AtomicU64,
    mirror_fallbacks: AtomicU64,
    coalesced_waits: AtomicU64,
    bytes_fetched: AtomicU64,
    evictions: AtomicU64,
}

impl LoaderMetrics {
    /// Create zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record how long resolving an asset took
    pub fn record_load_time(&self, asset_id: &str, duration: Duration) {
        self.loads_timed.fetch_add(1, Ordering::Relaxed);
        self.total_load_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        self.load_times.write().insert(asset_id, duration);
    }

    /// Record a load answered from the store
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a load that had to resolve its source
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one network request, including mirror retries
    pub fn record_fetch_attempt(&self) {
        self.fetch_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a retry against a mirror after the previous candidate failed
    pub fn record_mirror_fallback(&self) {
        self.mirror_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a caller that attached to an in-flight load
    pub fn record_coalesced_wait(&self) {
        self.coalesced_waits.fetch_add(1, Ordering::Relaxed);
    }

    /// Record payload bytes received from the network
    pub fn record_bytes_fetched(&self, bytes: u64) {
        self.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Record entries evicted to make room for a write
    pub fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Cache hit rate as a percentage
    pub fn cache_hit_rate(&self) -> f32 {
        let hits = self.cache_hits.load(Ordering::Relaxed) as f32;
        let misses = self.cache_misses.load(Ordering::Relaxed) as f32;

        if hits + misses > 0.0 {
            hits / (hits + misses) * 100.0
        } else {
            0.0
        }
    }

    /// Total cache hits
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Total cache misses
    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    /// Total network requests
    pub fn fetch_attempts(&self) -> u64 {
        self.fetch_attempts.load(Ordering::Relaxed)
    }

    /// Total retries against mirrors
    pub fn mirror_fallbacks(&self) -> u64 {
        self.mirror_fallbacks.load(Ordering::Relaxed)
    }

    /// Total callers that joined an in-flight load
    pub fn coalesced_waits(&self) -> u64 {
        self.coalesced_waits.load(Ordering::Relaxed)
    }

    /// Total bytes received from the network
    pub fn bytes_fetched(&self) -> u64 {
        self.bytes_fetched.load(Ordering::Relaxed)
    }

    /// Total entries evicted by the loader
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Most recent load time for an asset, if it is among the last
    /// [`MAX_TRACKED_LOAD_TIMES`] assets resolved
    pub fn load_time(&self, asset_id: &str) -> Option<Duration> {
        self.load_times.read().by_asset.get(asset_id).cloned()
    }

    /// Mean resolution time across every timed load
    pub fn average_load_time(&self) -> Option<Duration> {
        let count = self.loads_timed.load(Ordering::Relaxed);
        if count == 0 {
            return None;
        }
        let total = self.total_load_micros.load(Ordering::Relaxed);
        Some(Duration::from_micros(total / count))
    }
}

/// A thread-safe wrapper around LoaderMetrics
#[derive(Debug, Clone, Default)]
pub struct LoaderMetricsHandle(Arc<LoaderMetrics>);

impl LoaderMetricsHandle {
    /// Create a handle over fresh metrics
    pub fn new() -> Self {
        Self(Arc::new(LoaderMetrics::new()))
    }
}

impl std::ops::Deref for LoaderMetricsHandle {
    type Target = LoaderMetrics;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
