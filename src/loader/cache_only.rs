//! Loader for sandboxed contexts that must not reach the network

use std::sync::Arc;

use super::{AssetLoad, AssetLoader, AssetLoaderBuilder, LoadError, LoadOptions, NetworkPolicy};
use crate::cache::{AssetCacheEntry, AssetCacheStore};
use crate::fetch::Fetcher;
use crate::mirror::HostMirrorTable;
use crate::source::AssetSource;

/// An [`AssetLoader`] pinned to [`NetworkPolicy::CacheOnly`]
///
/// Inline sources and non-http remote references still resolve. An http or
/// https source succeeds only when already cached; otherwise the load fails
/// with [`LoadError::NotCached`] and the fetcher is never called.
pub struct CacheOnlyAssetLoader<S, F> {
    inner: AssetLoader<S, F>,
}

impl<S, F> Clone for CacheOnlyAssetLoader<S, F> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S, F> CacheOnlyAssetLoader<S, F>
where
    S: AssetCacheStore + 'static,
    F: Fetcher + 'static,
{
    /// Cache-only loader with default settings
    pub fn new(store: Arc<S>, fetcher: Arc<F>, mirrors: Arc<HostMirrorTable>) -> Self {
        Self::from_builder(AssetLoader::builder(store, fetcher).mirrors(mirrors))
    }

    /// Build from a configured builder, overriding its network policy
    pub fn from_builder(builder: AssetLoaderBuilder<S, F>) -> Self {
        Self {
            inner: builder.policy(NetworkPolicy::CacheOnly).build(),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        self.inner.store()
    }

    /// The underlying loader; it shares this loader's in-flight table
    pub fn as_loader(&self) -> &AssetLoader<S, F> {
        &self.inner
    }

    pub async fn load(
        &self,
        asset_id: &str,
        source: &AssetSource,
        options: LoadOptions,
    ) -> Result<AssetCacheEntry, LoadError> {
        self.inner.load(asset_id, source, options).await
    }
}

#[async_trait::async_trait]
impl<S, F> AssetLoad for CacheOnlyAssetLoader<S, F>
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
        self.inner.load(asset_id, source, options).await
    }
}
