//! Single-asset resolution
//!
//! [`AssetLoader`] turns an `(asset_id, source)` pair into a cached entry:
//! cache hit, inline decode, or network fetch across mirror candidates.
//! Concurrent loads of one id share a single in-flight operation.

pub mod cache_only;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;

use crate::cache::metrics::LoaderMetricsHandle;
use crate::cache::{AssetCacheEntry, AssetCacheStore, EntryMetadata, EvictionPolicy, NeverEvict, StoreError};
use crate::fetch::{is_network_url, with_timeout, FetchError, Fetcher};
use crate::mirror::HostMirrorTable;
use crate::source::{AssetSource, DataUrl};

pub use cache_only::CacheOnlyAssetLoader;

/// Default per-attempt fetch budget
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Coarse classification of [`LoadError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadErrorKind {
    InvalidArgument,
    InvalidSource,
    NotCached,
    AllMirrorsFailed,
    StorageFull,
    StorageUnavailable,
}

/// Error type for a single asset load
///
/// Cloneable so every coalesced waiter receives the same failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid inline source for '{asset_id}': {reason}")]
    InvalidSource { asset_id: String, reason: String },

    #[error("'{asset_id}' is not cached and network access is disabled")]
    NotCached { asset_id: String },

    #[error("All {attempts} candidate URL(s) failed for '{asset_id}': {last_error}")]
    AllMirrorsFailed {
        asset_id: String,
        attempts: usize,
        last_error: FetchError,
    },

    #[error("Storage error for '{asset_id}': {source}")]
    Storage {
        asset_id: String,
        source: StoreError,
    },
}

impl LoadError {
    /// Coarse category of this error
    pub fn kind(&self) -> LoadErrorKind {
        match self {
            Self::InvalidArgument(_) => LoadErrorKind::InvalidArgument,
            Self::InvalidSource { .. } => LoadErrorKind::InvalidSource,
            Self::NotCached { .. } => LoadErrorKind::NotCached,
            Self::AllMirrorsFailed { .. } => LoadErrorKind::AllMirrorsFailed,
            Self::Storage {
                source: StoreError::Full { .. },
                ..
            } => LoadErrorKind::StorageFull,
            Self::Storage {
                source: StoreError::Unavailable(_),
                ..
            } => LoadErrorKind::StorageUnavailable,
        }
    }
}

/// Per-call load options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
    /// Re-resolve the source even if the asset is cached
    pub force: bool,
}

impl LoadOptions {
    /// Options that bypass a cache hit
    pub fn forced() -> Self {
        Self { force: true }
    }
}

/// Whether remote sources may touch the network
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum NetworkPolicy {
    #[default]
    Allow,
    /// http/https sources must already be cached
    CacheOnly,
}

/// Anything that can load assets; implemented by both loader flavours
#[async_trait::async_trait]
pub trait AssetLoad: Send + Sync {
    async fn load(
        &self,
        asset_id: &str,
        source: &AssetSource,
        options: LoadOptions,
    ) -> Result<AssetCacheEntry, LoadError>;
}

type LoadResult = Result<AssetCacheEntry, LoadError>;
type SharedLoad = Shared<BoxFuture<'static, LoadResult>>;

struct LoaderInner<S, F> {
    store: Arc<S>,
    fetcher: Arc<F>,
    mirrors: Arc<HostMirrorTable>,
    policy: NetworkPolicy,
    fetch_timeout: Duration,
    eviction: Arc<dyn EvictionPolicy>,
    in_flight: Mutex<HashMap<String, SharedLoad>>,
    metrics: LoaderMetricsHandle,
}

/// Builder for [`AssetLoader`]
pub struct AssetLoaderBuilder<S, F> {
    store: Arc<S>,
    fetcher: Arc<F>,
    mirrors: Arc<HostMirrorTable>,
    policy: NetworkPolicy,
    fetch_timeout: Duration,
    eviction: Arc<dyn EvictionPolicy>,
    metrics: LoaderMetricsHandle,
}

impl<S, F> AssetLoaderBuilder<S, F>
where
    S: AssetCacheStore + 'static,
    F: Fetcher + 'static,
{
    /// Mirror table consulted for remote sources
    pub fn mirrors(mut self, mirrors: Arc<HostMirrorTable>) -> Self {
        self.mirrors = mirrors;
        self
    }

    /// Whether remote sources may reach the network
    pub fn policy(mut self, policy: NetworkPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Upper bound of one fetch attempt against one candidate
    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    /// Policy consulted before each write
    pub fn eviction_policy(mut self, policy: Arc<dyn EvictionPolicy>) -> Self {
        self.eviction = policy;
        self
    }

    /// Share an existing metrics handle
    pub fn metrics(mut self, metrics: LoaderMetricsHandle) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn build(self) -> AssetLoader<S, F> {
        AssetLoader {
            inner: Arc::new(LoaderInner {
                store: self.store,
                fetcher: self.fetcher,
                mirrors: self.mirrors,
                policy: self.policy,
                fetch_timeout: self.fetch_timeout,
                eviction: self.eviction,
                in_flight: Mutex::new(HashMap::new()),
                metrics: self.metrics,
            }),
        }
    }
}

/// Resolves assets into an [`AssetCacheStore`]
///
/// Cheap to clone; clones share the store, the in-flight table and metrics.
pub struct AssetLoader<S, F> {
    inner: Arc<LoaderInner<S, F>>,
}

impl<S, F> Clone for AssetLoader<S, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S, F> AssetLoader<S, F>
where
    S: AssetCacheStore + 'static,
    F: Fetcher + 'static,
{
    /// Loader with network access allowed and default settings
    pub fn new(store: Arc<S>, fetcher: Arc<F>, mirrors: Arc<HostMirrorTable>) -> Self {
        Self::builder(store, fetcher).mirrors(mirrors).build()
    }

    /// Start configuring a loader over `store` and `fetcher`
    pub fn builder(store: Arc<S>, fetcher: Arc<F>) -> AssetLoaderBuilder<S, F> {
        AssetLoaderBuilder {
            store,
            fetcher,
            mirrors: Arc::new(HostMirrorTable::new()),
            policy: NetworkPolicy::Allow,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
            eviction: Arc::new(NeverEvict),
            metrics: LoaderMetricsHandle::new(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.inner.store
    }

    pub fn metrics(&self) -> &LoaderMetricsHandle {
        &self.inner.metrics
    }

    /// Network policy this loader was built with
    pub fn policy(&self) -> NetworkPolicy {
        self.inner.policy
    }

    /// Number of distinct asset ids currently being resolved
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Ensure `asset_id` is cached, resolving `source` if needed
    ///
    /// A cached entry is returned unchanged (after a recency bump) unless
    /// `options.force` is set. Callers racing on one id share one resolution.
    pub async fn load(
        &self,
        asset_id: &str,
        source: &AssetSource,
        options: LoadOptions,
    ) -> LoadResult {
        if asset_id.trim().is_empty() {
            return Err(LoadError::InvalidArgument(
                "asset id must not be empty".to_string(),
            ));
        }

        if !options.force {
            if let Some(entry) = self.inner.cached_entry(asset_id).await? {
                self.inner.metrics.record_cache_hit();
                log::debug!("Cache hit for '{asset_id}'");
                return Ok(entry);
            }
        }

        let (flight, joined) = self.join_in_flight(asset_id, source, options);
        if joined {
            self.inner.metrics.record_coalesced_wait();
            log::debug!("Joining in-flight load of '{asset_id}'");
        }
        flight.await
    }

    /// Cached bytes for `asset_id`, without loading
    pub async fn read(&self, asset_id: &str) -> Result<Option<Arc<[u8]>>, StoreError> {
        self.inner.store.read_bytes(asset_id).await
    }

    fn join_in_flight(
        &self,
        asset_id: &str,
        source: &AssetSource,
        options: LoadOptions,
    ) -> (SharedLoad, bool) {
        let mut in_flight = self.inner.in_flight.lock();
        if let Some(existing) = in_flight.get(asset_id) {
            return (existing.clone(), true);
        }

        let inner = Arc::clone(&self.inner);
        let id = asset_id.to_string();
        let source = source.clone();
        let flight = async move {
            let result = inner.resolve(&id, &source, options).await;
            inner.in_flight.lock().remove(&id);
            result
        }
        .boxed()
        .shared();

        in_flight.insert(asset_id.to_string(), flight.clone());
        (flight, false)
    }
}

impl<S, F> LoaderInner<S, F>
where
    S: AssetCacheStore + 'static,
    F: Fetcher + 'static,
{
    fn storage_error(asset_id: &str, source: StoreError) -> LoadError {
        LoadError::Storage {
            asset_id: asset_id.to_string(),
            source,
        }
    }

    /// The entry for `asset_id` if it holds bytes; bumps its recency
    async fn cached_entry(&self, asset_id: &str) -> Result<Option<AssetCacheEntry>, LoadError> {
        let entry = self
            .store
            .get_entry(asset_id)
            .await
            .map_err(|e| Self::storage_error(asset_id, e))?;
        match entry {
            Some(entry) if entry.is_cached() => {
                self.store
                    .touch(asset_id)
                    .await
                    .map_err(|e| Self::storage_error(asset_id, e))?;
                Ok(Some(entry))
            }
            _ => Ok(None),
        }
    }

    async fn resolve(&self, asset_id: &str, source: &AssetSource, options: LoadOptions) -> LoadResult {
        // An earlier flight for this id may have finished since the caller looked
        if !options.force {
            if let Some(entry) = self.cached_entry(asset_id).await? {
                self.metrics.record_cache_hit();
                return Ok(entry);
            }
        }

        self.metrics.record_cache_miss();
        let started = Instant::now();

        let (bytes, metadata): (Arc<[u8]>, EntryMetadata) = match source {
            AssetSource::InlineBuffer(bytes) => (Arc::clone(bytes), EntryMetadata::default()),
            AssetSource::InlineDataUrl(data_url) => {
                let decoded = DataUrl::parse(data_url).map_err(|e| LoadError::InvalidSource {
                    asset_id: asset_id.to_string(),
                    reason: e.to_string(),
                })?;
                let metadata = EntryMetadata {
                    served_from: None,
                    content_type: decoded.mime,
                };
                (decoded.bytes.into(), metadata)
            }
            AssetSource::InlineBlob(blob) => {
                let metadata = EntryMetadata {
                    served_from: None,
                    content_type: blob.mime().map(str::to_string),
                };
                (blob.bytes(), metadata)
            }
            AssetSource::RemoteUrl { url, expected_size } => {
                self.fetch_remote(asset_id, url, *expected_size).await?
            }
        };

        let entry = self.store_bytes(asset_id, bytes, metadata).await?;
        self.metrics.record_load_time(asset_id, started.elapsed());
        Ok(entry)
    }

    async fn fetch_remote(
        &self,
        asset_id: &str,
        url: &str,
        expected_size: Option<u64>,
    ) -> Result<(Arc<[u8]>, EntryMetadata), LoadError> {
        let original = Url::parse(url.trim()).map_err(|e| {
            LoadError::InvalidArgument(format!("malformed URL '{url}' for '{asset_id}': {e}"))
        })?;

        if self.policy == NetworkPolicy::CacheOnly && is_network_url(&original) {
            log::debug!("Refusing network fetch of '{asset_id}' in cache-only mode");
            return Err(LoadError::NotCached {
                asset_id: asset_id.to_string(),
            });
        }

        self.store
            .mark_pending(asset_id)
            .await
            .map_err(|e| Self::storage_error(asset_id, e))?;

        let candidates = self.mirrors.candidates(&original);
        let mut last_error = FetchError::Network("no candidate URLs".to_string());

        for (attempt, candidate) in candidates.iter().enumerate() {
            if attempt > 0 {
                self.metrics.record_mirror_fallback();
                log::info!("Retrying '{asset_id}' via mirror {candidate}");
            }
            self.metrics.record_fetch_attempt();

            let fetched = with_timeout(
                self.fetch_timeout,
                self.fetcher.fetch_bytes(candidate, self.fetch_timeout),
            )
            .await;

            match fetched {
                Ok(bytes) => {
                    let actual = bytes.len() as u64;
                    if let Some(expected) = expected_size.filter(|&e| e != actual) {
                        log::warn!("{candidate} returned {actual} bytes, expected {expected}");
                        last_error = FetchError::SizeMismatch { expected, actual };
                        continue;
                    }
                    self.metrics.record_bytes_fetched(actual);
                    let metadata = EntryMetadata {
                        served_from: Some(candidate.to_string()),
                        content_type: None,
                    };
                    return Ok((bytes.into(), metadata));
                }
                Err(err) => {
                    log::warn!("Fetching '{asset_id}' from {candidate} failed: {err}");
                    last_error = err;
                }
            }
        }

        if let Err(e) = self.store.mark_error(asset_id, &last_error.to_string()).await {
            log::warn!("Could not record failure of '{asset_id}': {e}");
        }
        Err(LoadError::AllMirrorsFailed {
            asset_id: asset_id.to_string(),
            attempts: candidates.len(),
            last_error,
        })
    }

    /// Write resolved bytes, evicting first if the policy asks for it
    ///
    /// On failure the bytes are dropped rather than kept only in memory.
    async fn store_bytes(
        &self,
        asset_id: &str,
        bytes: Arc<[u8]>,
        metadata: EntryMetadata,
    ) -> LoadResult {
        let usage = self
            .store
            .usage()
            .await
            .map_err(|e| Self::storage_error(asset_id, e))?;
        let replaced = self
            .store
            .get_entry(asset_id)
            .await
            .map_err(|e| Self::storage_error(asset_id, e))?
            .filter(AssetCacheEntry::is_cached)
            .map_or(0, |entry| entry.byte_length);
        let to_free = self
            .eviction
            .bytes_to_free(&usage, bytes.len() as u64, replaced);
        if to_free > 0 {
            let evicted = self
                .store
                .evict_least_recently_used_except(to_free, Some(asset_id))
                .await
                .map_err(|e| Self::storage_error(asset_id, e))?;
            log::debug!("Evicted {evicted:?} to make room for '{asset_id}'");
            self.metrics.record_evictions(evicted.len());
        }

        match self.store.put(asset_id, bytes, metadata).await {
            Ok(entry) => Ok(entry),
            Err(err) => {
                if let Err(e) = self.store.mark_error(asset_id, &err.to_string()).await {
                    log::warn!("Could not record failure of '{asset_id}': {e}");
                }
                Err(Self::storage_error(asset_id, err))
            }
        }
    }
}

#[async_trait::async_trait]
impl<S, F> AssetLoad for AssetLoader<S, F>
where
    S: AssetCacheStore + 'static,
    F: Fetcher + 'static,
{
    async fn load(
        &self,
        asset_id: &str,
        source: &AssetSource,
        options: LoadOptions,
    ) -> Result<AssetCacheEntry, LoadError> {
        AssetLoader::load(self, asset_id, source, options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStatus, EvictToFit, MemoryStore, StoreUsage};
    use crate::fetch::OfflineFetcher;
    use futures::executor::block_on;

    fn loader() -> AssetLoader<MemoryStore, OfflineFetcher> {
        AssetLoader::new(
            Arc::new(MemoryStore::new()),
            Arc::new(OfflineFetcher),
            Arc::new(HostMirrorTable::new()),
        )
    }

    #[test]
    fn test_empty_id_rejected() {
        let err = block_on(loader().load("  ", &AssetSource::buffer(vec![1u8]), LoadOptions::default()))
            .unwrap_err();
        assert_eq!(err.kind(), LoadErrorKind::InvalidArgument);
    }

    #[test]
    fn test_inline_buffer_cached() {
        let loader = loader();
        let entry = block_on(loader.load("a", &AssetSource::buffer(vec![1u8, 2]), LoadOptions::default()))
            .unwrap();
        assert_eq!(entry.status, CacheStatus::Cached);
        assert_eq!(entry.byte_length, 2);
        assert_eq!(&*block_on(loader.read("a")).unwrap().unwrap(), &[1, 2]);
    }

    #[test]
    fn test_bad_data_url_leaves_store_untouched() {
        let loader = loader();
        let err = block_on(loader.load(
            "a",
            &AssetSource::data_url("data:;base64,###"),
            LoadOptions::default(),
        ))
        .unwrap_err();
        assert_eq!(err.kind(), LoadErrorKind::InvalidSource);
        assert!(block_on(loader.store().get_entry("a")).unwrap().is_none());
    }

    #[test]
    fn test_malformed_url_is_invalid_argument() {
        let err = block_on(loader().load(
            "a",
            &AssetSource::remote("not a url"),
            LoadOptions::default(),
        ))
        .unwrap_err();
        assert_eq!(err.kind(), LoadErrorKind::InvalidArgument);
    }

    #[test]
    fn test_all_candidates_failed_marks_error() {
        let loader = loader();
        let err = block_on(loader.load(
            "a",
            &AssetSource::remote("https://cdn.example.com/a.glb"),
            LoadOptions::default(),
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            LoadError::AllMirrorsFailed {
                attempts: 1,
                last_error: FetchError::Network(_),
                ..
            }
        ));
        let entry = block_on(loader.store().get_entry("a")).unwrap().unwrap();
        assert_eq!(entry.status, CacheStatus::Error);
        assert!(entry.last_error.is_some());
    }

    #[test]
    fn test_storage_full_surfaces_and_discards_bytes() {
        let loader = AssetLoader::new(
            Arc::new(MemoryStore::with_capacity(4)),
            Arc::new(OfflineFetcher),
            Arc::new(HostMirrorTable::new()),
        );
        let err = block_on(loader.load("a", &AssetSource::buffer(vec![0u8; 8]), LoadOptions::default()))
            .unwrap_err();
        assert_eq!(err.kind(), LoadErrorKind::StorageFull);
        assert!(block_on(loader.read("a")).unwrap().is_none());
        let entry = block_on(loader.store().get_entry("a")).unwrap().unwrap();
        assert_eq!(entry.status, CacheStatus::Error);
    }

    #[test]
    fn test_evict_to_fit_makes_room() {
        let loader = AssetLoader::builder(Arc::new(MemoryStore::with_capacity(10)), Arc::new(OfflineFetcher))
            .eviction_policy(Arc::new(EvictToFit))
            .build();
        block_on(async {
            loader.load("a", &AssetSource::buffer(vec![0u8; 6]), LoadOptions::default()).await.unwrap();
            loader.load("b", &AssetSource::buffer(vec![0u8; 6]), LoadOptions::default()).await.unwrap();
            assert!(loader.store().get_entry("a").await.unwrap().is_none());
            let usage: StoreUsage = loader.store().usage().await.unwrap();
            assert_eq!(usage.used_bytes, 6);
        });
        assert_eq!(loader.metrics().evictions(), 1);
    }

    #[test]
    fn test_oversized_write_evicts_nothing() {
        let loader = AssetLoader::builder(Arc::new(MemoryStore::with_capacity(10)), Arc::new(OfflineFetcher))
            .eviction_policy(Arc::new(EvictToFit))
            .build();
        block_on(async {
            loader.load("a", &AssetSource::buffer(vec![0u8; 4]), LoadOptions::default()).await.unwrap();
            loader.load("b", &AssetSource::buffer(vec![0u8; 4]), LoadOptions::default()).await.unwrap();
            let err = loader
                .load("huge", &AssetSource::buffer(vec![0u8; 20]), LoadOptions::default())
                .await
                .unwrap_err();
            assert_eq!(err.kind(), LoadErrorKind::StorageFull);
            assert!(loader.read("a").await.unwrap().is_some());
            assert!(loader.read("b").await.unwrap().is_some());
        });
        assert_eq!(loader.metrics().evictions(), 0);
    }

    #[test]
    fn test_forced_refresh_evicts_only_what_it_needs() {
        let loader = AssetLoader::builder(Arc::new(MemoryStore::with_capacity(10)), Arc::new(OfflineFetcher))
            .eviction_policy(Arc::new(EvictToFit))
            .build();
        block_on(async {
            loader.load("a", &AssetSource::buffer(vec![1u8; 4]), LoadOptions::default()).await.unwrap();
            loader.load("b", &AssetSource::buffer(vec![1u8; 4]), LoadOptions::default()).await.unwrap();

            // Same size: fits in place, nothing evicted
            loader.load("a", &AssetSource::buffer(vec![2u8; 4]), LoadOptions::forced()).await.unwrap();
            assert!(loader.read("b").await.unwrap().is_some());

            // Growing "a" to 10 bytes needs "b" gone but never "a" itself
            let entry = loader
                .load("a", &AssetSource::buffer(vec![3u8; 10]), LoadOptions::forced())
                .await
                .unwrap();
            assert_eq!(entry.byte_length, 10);
            assert!(loader.read("b").await.unwrap().is_none());
            assert_eq!(&*loader.read("a").await.unwrap().unwrap(), &[3u8; 10][..]);
        });
        assert_eq!(loader.metrics().evictions(), 1);
    }

    #[test]
    fn test_force_reload_replaces_bytes() {
        let loader = loader();
        block_on(async {
            loader.load("a", &AssetSource::buffer(vec![1u8]), LoadOptions::default()).await.unwrap();
            let hit = loader.load("a", &AssetSource::buffer(vec![2u8, 2]), LoadOptions::default()).await.unwrap();
            assert_eq!(hit.byte_length, 1);
            let forced = loader.load("a", &AssetSource::buffer(vec![2u8, 2]), LoadOptions::forced()).await.unwrap();
            assert_eq!(forced.byte_length, 2);
        });
        assert_eq!(loader.in_flight(), 0);
    }
}
