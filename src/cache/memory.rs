//! In-memory asset store with an optional byte quota
//!
//! Models quota-limited local storage such as a mini-program sandbox. Bytes
//! live only as long as the process.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::{
    lru_victims, AssetCacheEntry, AssetCacheStore, Clock, EntryMetadata, StoreError, StoreUsage,
    SystemClock,
};

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, AssetCacheEntry>,
    blobs: HashMap<String, Arc<[u8]>>,
    used_bytes: u64,
}

impl MemoryState {
    fn remove(&mut self, asset_id: &str) {
        self.entries.remove(asset_id);
        if let Some(blob) = self.blobs.remove(asset_id) {
            self.used_bytes -= blob.len() as u64;
        }
    }
}

/// Thread-safe in-memory [`AssetCacheStore`]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    capacity: Option<u64>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Unbounded store
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
            capacity: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Store that rejects writes beyond `capacity_bytes`
    pub fn with_capacity(capacity_bytes: u64) -> Self {
        Self {
            capacity: Some(capacity_bytes),
            ..Self::new()
        }
    }

    /// Use `clock` for `last_accessed_at` stamps
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Number of entries in any state
    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry and its bytes
    pub fn clear(&self) {
        *self.state.write() = MemoryState::default();
    }
}

#[async_trait::async_trait]
impl AssetCacheStore for MemoryStore {
    async fn get_entry(&self, asset_id: &str) -> Result<Option<AssetCacheEntry>, StoreError> {
        Ok(self.state.read().entries.get(asset_id).cloned())
    }

    async fn read_bytes(&self, asset_id: &str) -> Result<Option<Arc<[u8]>>, StoreError> {
        Ok(self.state.read().blobs.get(asset_id).cloned())
    }

    async fn touch(&self, asset_id: &str) -> Result<(), StoreError> {
        let now = self.clock.now_millis();
        if let Some(entry) = self.state.write().entries.get_mut(asset_id) {
            entry.last_accessed_at = now;
        }
        Ok(())
    }

    async fn mark_pending(&self, asset_id: &str) -> Result<AssetCacheEntry, StoreError> {
        let now = self.clock.now_millis();
        let mut state = self.state.write();
        let entry = state
            .entries
            .entry(asset_id.to_string())
            .or_insert_with(|| AssetCacheEntry::pending(asset_id, now));
        Ok(entry.clone())
    }

    async fn put(
        &self,
        asset_id: &str,
        bytes: Arc<[u8]>,
        metadata: EntryMetadata,
    ) -> Result<AssetCacheEntry, StoreError> {
        let now = self.clock.now_millis();
        let incoming = bytes.len() as u64;
        let mut state = self.state.write();

        let previous = state.blobs.get(asset_id).map_or(0, |b| b.len() as u64);
        let used_without = state.used_bytes - previous;
        if let Some(capacity) = self.capacity {
            if used_without + incoming > capacity {
                return Err(StoreError::Full {
                    requested: incoming,
                    available: capacity.saturating_sub(used_without),
                });
            }
        }

        let entry = AssetCacheEntry::cached(asset_id, incoming, metadata, now);
        state.blobs.insert(asset_id.to_string(), bytes);
        state.entries.insert(asset_id.to_string(), entry.clone());
        state.used_bytes = used_without + incoming;
        Ok(entry)
    }

    async fn mark_error(
        &self,
        asset_id: &str,
        error: &str,
    ) -> Result<AssetCacheEntry, StoreError> {
        let now = self.clock.now_millis();
        let mut state = self.state.write();
        let entry = state
            .entries
            .entry(asset_id.to_string())
            .or_insert_with(|| AssetCacheEntry::pending(asset_id, now));
        entry.record_error(error);
        Ok(entry.clone())
    }

    async fn evict(&self, asset_id: &str) -> Result<(), StoreError> {
        self.state.write().remove(asset_id);
        Ok(())
    }

    async fn evict_least_recently_used_except(
        &self,
        target_freed_bytes: u64,
        keep: Option<&str>,
    ) -> Result<Vec<String>, StoreError> {
        let mut state = self.state.write();
        let victims = lru_victims(state.entries.values(), target_freed_bytes, keep);
        for id in &victims {
            state.remove(id);
        }
        if !victims.is_empty() {
            log::debug!("Evicted {} asset(s) from memory store", victims.len());
        }
        Ok(victims)
    }

    async fn usage(&self) -> Result<StoreUsage, StoreError> {
        let state = self.state.read();
        Ok(StoreUsage {
            used_bytes: state.used_bytes,
            capacity_bytes: self.capacity,
            entries: state.entries.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStatus, ManualClock};
    use futures::executor::block_on;

    fn bytes(len: usize) -> Arc<[u8]> {
        vec![7u8; len].into()
    }

    #[test]
    fn test_put_and_read() {
        block_on(async {
            let store = MemoryStore::new();
            let entry = store.put("a", bytes(3), EntryMetadata::default()).await.unwrap();
            assert_eq!(entry.status, CacheStatus::Cached);
            assert_eq!(entry.byte_length, 3);
            assert_eq!(store.read_bytes("a").await.unwrap().unwrap().len(), 3);
            assert_eq!(store.usage().await.unwrap().used_bytes, 3);
        });
    }

    #[test]
    fn test_quota_rejects_write() {
        block_on(async {
            let store = MemoryStore::with_capacity(10);
            store.put("a", bytes(8), EntryMetadata::default()).await.unwrap();
            let err = store
                .put("b", bytes(5), EntryMetadata::default())
                .await
                .unwrap_err();
            assert_eq!(
                err,
                StoreError::Full {
                    requested: 5,
                    available: 2
                }
            );
            // Overwriting the same id reuses its bytes
            store.put("a", bytes(10), EntryMetadata::default()).await.unwrap();
            assert_eq!(store.usage().await.unwrap().used_bytes, 10);
        });
    }

    #[test]
    fn test_mark_error_preserves_cached() {
        block_on(async {
            let store = MemoryStore::new();
            store.put("a", bytes(4), EntryMetadata::default()).await.unwrap();
            let entry = store.mark_error("a", "mirror down").await.unwrap();
            assert_eq!(entry.status, CacheStatus::Cached);
            assert!(store.read_bytes("a").await.unwrap().is_some());

            let entry = store.mark_error("b", "404").await.unwrap();
            assert_eq!(entry.status, CacheStatus::Error);
            assert!(store.read_bytes("b").await.unwrap().is_none());
        });
    }

    #[test]
    fn test_mark_pending_does_not_downgrade() {
        block_on(async {
            let store = MemoryStore::new();
            store.put("a", bytes(1), EntryMetadata::default()).await.unwrap();
            let entry = store.mark_pending("a").await.unwrap();
            assert_eq!(entry.status, CacheStatus::Cached);
            let entry = store.mark_pending("b").await.unwrap();
            assert_eq!(entry.status, CacheStatus::Pending);
        });
    }

    #[test]
    fn test_lru_eviction_order() {
        block_on(async {
            let clock = Arc::new(ManualClock::new(1_000));
            let store = MemoryStore::new().with_clock(clock.clone());
            store.put("b", bytes(4), EntryMetadata::default()).await.unwrap();
            store.put("a", bytes(4), EntryMetadata::default()).await.unwrap();
            clock.advance(10);
            store.put("c", bytes(4), EntryMetadata::default()).await.unwrap();
            clock.advance(10);
            store.touch("a").await.unwrap();

            let evicted = store.evict_least_recently_used(5).await.unwrap();
            assert_eq!(evicted, vec!["b", "c"]);
            assert_eq!(store.usage().await.unwrap().used_bytes, 4);
            assert!(store.get_entry("a").await.unwrap().is_some());
        });
    }

    #[test]
    fn test_lru_eviction_spares_kept_id() {
        block_on(async {
            let clock = Arc::new(ManualClock::new(0));
            let store = MemoryStore::new().with_clock(clock.clone());
            store.put("a", bytes(4), EntryMetadata::default()).await.unwrap();
            clock.advance(10);
            store.put("b", bytes(4), EntryMetadata::default()).await.unwrap();

            let evicted = store
                .evict_least_recently_used_except(4, Some("a"))
                .await
                .unwrap();
            assert_eq!(evicted, vec!["b"]);
            assert!(store.read_bytes("a").await.unwrap().is_some());
        });
    }

    #[test]
    fn test_touch_absent_is_noop() {
        block_on(async {
            let store = MemoryStore::new();
            store.touch("missing").await.unwrap();
            assert!(store.is_empty());
        });
    }
}
