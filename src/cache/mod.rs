//! Durable asset cache storage
//!
//! The [`AssetCacheStore`] trait is the one piece of shared mutable state in
//! the engine. Every mutation is atomic with respect to concurrent readers:
//! implementations hold their lock for the whole read-modify-write, so a
//! coalesced waiter can never observe a half-written entry.

pub mod fs;
pub mod memory;
pub mod metrics;

use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub use fs::FsStore;
pub use memory::MemoryStore;

/// Error type for store operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Storage full: {requested} bytes requested, {available} available")]
    Full { requested: u64, available: u64 },

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Lifecycle state of a cache entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheStatus {
    /// A load has been attempted but no bytes are stored yet
    Pending,
    /// Bytes are stored and retrievable
    Cached,
    /// The last load failed and no bytes are stored
    Error,
}

/// Extra information recorded alongside cached bytes
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    /// The candidate URL that actually served the bytes, if remote
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub served_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Cache bookkeeping for one asset id
///
/// `status == Cached` implies the store can return bytes for `asset_id`;
/// `status == Error` implies it cannot and `last_error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetCacheEntry {
    pub asset_id: String,
    pub status: CacheStatus,
    pub byte_length: u64,
    /// Milliseconds since the Unix epoch
    pub last_accessed_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub metadata: EntryMetadata,
}

impl AssetCacheEntry {
    pub(crate) fn pending(asset_id: &str, now: u64) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            status: CacheStatus::Pending,
            byte_length: 0,
            last_accessed_at: now,
            last_error: None,
            metadata: EntryMetadata::default(),
        }
    }

    pub(crate) fn cached(asset_id: &str, byte_length: u64, metadata: EntryMetadata, now: u64) -> Self {
        Self {
            asset_id: asset_id.to_string(),
            status: CacheStatus::Cached,
            byte_length,
            last_accessed_at: now,
            last_error: None,
            metadata,
        }
    }

    /// Whether the store holds bytes for this entry
    pub fn is_cached(&self) -> bool {
        self.status == CacheStatus::Cached
    }

    /// Apply a load failure to this entry
    ///
    /// Cached bytes are never discarded by a failure; only the error text is
    /// recorded. Entries without bytes move to `Error`.
    pub(crate) fn record_error(&mut self, error: &str) {
        let error = if error.trim().is_empty() {
            "unknown error".to_string()
        } else {
            error.to_string()
        };
        if self.status != CacheStatus::Cached {
            self.status = CacheStatus::Error;
            self.byte_length = 0;
        }
        self.last_error = Some(error);
    }
}

/// Snapshot of store occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreUsage {
    pub used_bytes: u64,
    pub capacity_bytes: Option<u64>,
    pub entries: usize,
}

impl StoreUsage {
    /// Remaining bytes, or `None` for an unbounded store
    pub fn available(&self) -> Option<u64> {
        self.capacity_bytes
            .map(|cap| cap.saturating_sub(self.used_bytes))
    }
}

/// Durable key-value store for asset bytes and their cache entries
///
/// Lookups never fetch. Implementations must make each method atomic.
#[async_trait::async_trait]
pub trait AssetCacheStore: Send + Sync {
    /// Pure lookup of the entry for `asset_id`
    async fn get_entry(&self, asset_id: &str) -> Result<Option<AssetCacheEntry>, StoreError>;

    /// Bytes for `asset_id` if its entry is cached
    async fn read_bytes(&self, asset_id: &str) -> Result<Option<Arc<[u8]>>, StoreError>;

    /// Bump `last_accessed_at`; no-op when the entry is absent
    async fn touch(&self, asset_id: &str) -> Result<(), StoreError>;

    /// Create a `Pending` entry if none exists; existing entries are returned as is
    async fn mark_pending(&self, asset_id: &str) -> Result<AssetCacheEntry, StoreError>;

    /// Store bytes, overwriting any prior entry, and mark it `Cached`
    async fn put(
        &self,
        asset_id: &str,
        bytes: Arc<[u8]>,
        metadata: EntryMetadata,
    ) -> Result<AssetCacheEntry, StoreError>;

    /// Record a load failure
    ///
    /// Moves the entry to `Error` only if no cached bytes exist for it.
    async fn mark_error(&self, asset_id: &str, error: &str)
        -> Result<AssetCacheEntry, StoreError>;

    /// Remove the entry and its bytes
    async fn evict(&self, asset_id: &str) -> Result<(), StoreError>;

    /// Evict cached entries, least recently used first, until at least
    /// `target_freed_bytes` have been released or nothing is left
    ///
    /// Ties on `last_accessed_at` are broken by ascending asset id.
    async fn evict_least_recently_used(
        &self,
        target_freed_bytes: u64,
    ) -> Result<Vec<String>, StoreError> {
        self.evict_least_recently_used_except(target_freed_bytes, None)
            .await
    }

    /// Like [`evict_least_recently_used`](Self::evict_least_recently_used),
    /// but never picks `keep`
    async fn evict_least_recently_used_except(
        &self,
        target_freed_bytes: u64,
        keep: Option<&str>,
    ) -> Result<Vec<String>, StoreError>;

    async fn usage(&self) -> Result<StoreUsage, StoreError>;
}

#[async_trait::async_trait]
impl<T: AssetCacheStore + ?Sized> AssetCacheStore for Arc<T> {
    async fn get_entry(&self, asset_id: &str) -> Result<Option<AssetCacheEntry>, StoreError> {
        (**self).get_entry(asset_id).await
    }

    async fn read_bytes(&self, asset_id: &str) -> Result<Option<Arc<[u8]>>, StoreError> {
        (**self).read_bytes(asset_id).await
    }

    async fn touch(&self, asset_id: &str) -> Result<(), StoreError> {
        (**self).touch(asset_id).await
    }

    async fn mark_pending(&self, asset_id: &str) -> Result<AssetCacheEntry, StoreError> {
        (**self).mark_pending(asset_id).await
    }

    async fn put(
        &self,
        asset_id: &str,
        bytes: Arc<[u8]>,
        metadata: EntryMetadata,
    ) -> Result<AssetCacheEntry, StoreError> {
        (**self).put(asset_id, bytes, metadata).await
    }

    async fn mark_error(
        &self,
        asset_id: &str,
        error: &str,
    ) -> Result<AssetCacheEntry, StoreError> {
        (**self).mark_error(asset_id, error).await
    }

    async fn evict(&self, asset_id: &str) -> Result<(), StoreError> {
        (**self).evict(asset_id).await
    }

    async fn evict_least_recently_used_except(
        &self,
        target_freed_bytes: u64,
        keep: Option<&str>,
    ) -> Result<Vec<String>, StoreError> {
        (**self)
            .evict_least_recently_used_except(target_freed_bytes, keep)
            .await
    }

    async fn usage(&self) -> Result<StoreUsage, StoreError> {
        (**self).usage().await
    }
}

/// Pick LRU victims among `entries` until `target` bytes would be freed
///
/// Only cached entries hold bytes, so only they are candidates. `keep` is
/// never picked.
pub(crate) fn lru_victims<'a, I>(entries: I, target: u64, keep: Option<&str>) -> Vec<String>
where
    I: IntoIterator<Item = &'a AssetCacheEntry>,
{
    if target == 0 {
        return Vec::new();
    }
    let mut candidates: Vec<&AssetCacheEntry> = entries
        .into_iter()
        .filter(|e| e.is_cached() && Some(e.asset_id.as_str()) != keep)
        .collect();
    candidates.sort_by(|a, b| {
        a.last_accessed_at
            .cmp(&b.last_accessed_at)
            .then_with(|| a.asset_id.cmp(&b.asset_id))
    });

    let mut freed = 0u64;
    let mut victims = Vec::new();
    for entry in candidates {
        if freed >= target {
            break;
        }
        freed += entry.byte_length;
        victims.push(entry.asset_id.clone());
    }
    victims
}

/// Source of `last_accessed_at` timestamps
pub trait Clock: Send + Sync + Debug {
    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> u64;
}

/// Wall-clock time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Manually advanced clock, useful for deterministic eviction
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(start_millis: u64) -> Self {
        Self(AtomicU64::new(start_millis))
    }

    /// Move the clock forward
    pub fn advance(&self, millis: u64) {
        self.0.fetch_add(millis, Ordering::SeqCst);
    }

    pub fn set(&self, millis: u64) {
        self.0.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Decides how many bytes must be evicted before a write
///
/// The loader consults the policy and then calls
/// [`AssetCacheStore::evict_least_recently_used_except`], sparing the asset
/// being written; the store itself never evicts on its own.
pub trait EvictionPolicy: Send + Sync + Debug {
    /// `replaced_bytes` is what the asset being written already occupies
    fn bytes_to_free(&self, usage: &StoreUsage, incoming_bytes: u64, replaced_bytes: u64) -> u64;
}

/// Never evict; a full store surfaces `StorageFull`
#[derive(Debug, Default, Clone, Copy)]
pub struct NeverEvict;

impl EvictionPolicy for NeverEvict {
    fn bytes_to_free(&self, _usage: &StoreUsage, _incoming_bytes: u64, _replaced_bytes: u64) -> u64 {
        0
    }
}

/// Evict just enough least-recently-used bytes for the incoming write
#[derive(Debug, Default, Clone, Copy)]
pub struct EvictToFit;

impl EvictionPolicy for EvictToFit {
    fn bytes_to_free(&self, usage: &StoreUsage, incoming_bytes: u64, replaced_bytes: u64) -> u64 {
        match usage.capacity_bytes {
            // Can never fit; let the write fail without emptying the store
            Some(capacity) if incoming_bytes > capacity => 0,
            Some(capacity) => {
                (usage.used_bytes.saturating_sub(replaced_bytes) + incoming_bytes)
                    .saturating_sub(capacity)
            }
            None => 0,
        }
    }
}
