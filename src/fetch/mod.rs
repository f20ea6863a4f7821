//! Network fetch abstraction
//!
//! The engine never talks HTTP directly. It goes through a [`Fetcher`], the
//! host application's authenticated "GET a URL, receive bytes" primitive.

#[cfg(feature = "http-surf")]
pub mod surf_impl;

use futures::future::{self, Either};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[cfg(feature = "http-surf")]
pub use surf_impl::SurfFetcher;

/// Error type for a single fetch attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Resource not found")]
    NotFound,

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP status {0}")]
    HttpStatus(u16),

    #[error("Expected {expected} bytes, received {actual}")]
    SizeMismatch { expected: u64, actual: u64 },
}

/// Authenticated byte fetcher supplied by the host application
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the full body at `url`
    ///
    /// `timeout` is the per-attempt budget. The loader also enforces it, so
    /// implementations may treat it as advisory.
    async fn fetch_bytes(&self, url: &Url, timeout: Duration) -> Result<Vec<u8>, FetchError>;
}

#[async_trait::async_trait]
impl<T: Fetcher + ?Sized> Fetcher for Arc<T> {
    async fn fetch_bytes(&self, url: &Url, timeout: Duration) -> Result<Vec<u8>, FetchError> {
        (**self).fetch_bytes(url, timeout).await
    }
}

/// A fetcher for hosts with no network stack at all
///
/// Every request fails with [`FetchError::Network`].
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineFetcher;

#[async_trait::async_trait]
impl Fetcher for OfflineFetcher {
    async fn fetch_bytes(&self, url: &Url, _timeout: Duration) -> Result<Vec<u8>, FetchError> {
        Err(FetchError::Network(format!("offline: cannot fetch {url}")))
    }
}

/// Run `fut`, failing with [`FetchError::Timeout`] once `timeout` elapses
///
/// The timer is runtime-agnostic, so this works under any executor.
pub async fn with_timeout<T, F>(timeout: Duration, fut: F) -> Result<T, FetchError>
where
    F: Future<Output = Result<T, FetchError>>,
{
    let delay = futures_timer::Delay::new(timeout);
    futures::pin_mut!(fut);
    match future::select(fut, delay).await {
        Either::Left((result, _)) => result,
        Either::Right(((), _)) => Err(FetchError::Timeout(timeout)),
    }
}

/// True when fetching `url` requires network egress
pub fn is_network_url(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}
