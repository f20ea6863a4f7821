//! scene_preload - Asset cache and scene-preload engine
//!
//! # Features
//! - Closed [`AssetSource`] model: inline buffers, data URLs, blobs, remote URLs
//! - Pluggable [`AssetCacheStore`] with in-memory and on-disk backends
//! - Single-flight [`AssetLoader`] with host mirror fallback
//! - [`CacheOnlyAssetLoader`] for sandboxes that forbid network egress
//! - [`ScenePreloadOrchestrator`] with bounded parallelism, progress events
//!   and cooperative cancellation
//!
//! # Quick Start
//!
//! ```ignore
//! use scene_preload::*;
//! use std::sync::Arc;
//!
//! let loader = AssetLoader::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(OfflineFetcher),
//!     Arc::new(HostMirrorTable::new()),
//! );
//! let orchestrator = ScenePreloadOrchestrator::new(Arc::new(loader), StructuredSceneReader, TokioSpawner::new());
//! let summary = orchestrator
//!     .preload_scene_resources("lobby", &document, PreloadOptions::default())
//!     .await?;
//! ```
//!
//! # Feature Flags
//!
//! - `runtime-tokio`: Enable the Tokio spawner (default)
//! - `http-surf`: Enable the surf-based HTTP fetcher

// Core modules
pub mod cache;
pub mod fetch;
pub mod loader;
pub mod mirror;
pub mod preload;
pub mod runtime;
pub mod scene;
pub mod source;

// Support modules
pub mod config;
pub mod history;

// Error types
mod error;
pub use error::{Error, Result};

// Re-export cache types
pub use cache::metrics::{LoaderMetrics, LoaderMetricsHandle};
pub use cache::{
    AssetCacheEntry, AssetCacheStore, CacheStatus, Clock, EntryMetadata, EvictToFit,
    EvictionPolicy, FsStore, ManualClock, MemoryStore, NeverEvict, StoreError, StoreUsage,
    SystemClock,
};

// Re-export fetch types
#[cfg(feature = "http-surf")]
pub use fetch::SurfFetcher;
pub use fetch::{FetchError, Fetcher, OfflineFetcher};

// Re-export loader types
pub use loader::{
    AssetLoad, AssetLoader, AssetLoaderBuilder, CacheOnlyAssetLoader, LoadError, LoadErrorKind,
    LoadOptions, NetworkPolicy,
};

pub use mirror::{HostMirrorTable, MirrorTableError};
pub use source::{AssetSource, BlobHandle, DataUrl, SourceError, SourceKind};

// Re-export scene and preload types
pub use preload::{
    CancellationToken, PreloadConfig, PreloadError, PreloadOptions, PreloadSummary,
    ProgressEvent, ProgressPhase, ProgressSink, ScenePreloadOrchestrator, SessionPhase,
};
pub use scene::{
    AssetReference, AssetSlot, MaterialDef, SceneDocument, SceneError, SceneNode, SceneReader,
    StructuredSceneReader,
};

// Re-export runtime types
#[cfg(feature = "runtime-tokio")]
pub use runtime::TokioSpawner;
pub use runtime::{AsyncSpawner, ThreadPoolSpawner};

pub use config::{ConfigError, EngineConfig};
pub use history::{SessionRecord, WorkHistoryLedger};

// Version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
