//! Engine configuration
//!
//! Loaded once at process start from TOML. Every field has a default, so an
//! empty file is a valid configuration.
//!
//! ```toml
//! cache_dir = "/var/cache/scene-preload"
//! cache_capacity_bytes = 268435456
//! fetch_timeout_ms = 15000
//! max_concurrent_loads = 6
//! cache_only = false
//! evict_to_fit = true
//!
//! [mirrors]
//! "cdn.example.com" = ["cdn-backup.example.com", "https://mirror.example.org"]
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cache::{EvictToFit, EvictionPolicy, FsStore, NeverEvict, StoreError};
use crate::loader::NetworkPolicy;
use crate::mirror::{HostMirrorTable, MirrorTableError};
use crate::preload::PreloadConfig;

/// Overrides `cache_dir` when set
pub const CACHE_DIR_ENV: &str = "SCENE_PRELOAD_CACHE_DIR";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid mirror table: {0}")]
    Mirrors(#[from] MirrorTableError),

    #[error("Invalid config value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("Failed to open cache store: {0}")]
    Store(#[from] StoreError),

    #[error("Could not determine a cache directory")]
    NoCacheDir,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Root of the on-disk store; platform cache dir when absent
    pub cache_dir: Option<PathBuf>,
    /// Byte quota of the store; unbounded when absent
    pub cache_capacity_bytes: Option<u64>,
    /// Upper bound of one fetch attempt against one candidate URL
    pub fetch_timeout_ms: u64,
    pub max_concurrent_loads: usize,
    /// Refuse http/https fetches for uncached assets
    pub cache_only: bool,
    /// Evict least-recently-used entries when a write would exceed the quota
    pub evict_to_fit: bool,
    pub mirrors: BTreeMap<String, Vec<String>>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            cache_capacity_bytes: None,
            fetch_timeout_ms: 30_000,
            max_concurrent_loads: crate::preload::DEFAULT_MAX_CONCURRENT_LOADS,
            cache_only: false,
            evict_to_fit: false,
            mirrors: BTreeMap::new(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        log::debug!("Loading engine config from {}", path.as_ref().display());
        Self::from_toml_str(&content)
    }

    /// Reject values that would stall or misconfigure the engine
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "fetch_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.max_concurrent_loads == 0 {
            return Err(ConfigError::Invalid {
                field: "max_concurrent_loads",
                reason: "must be at least 1".to_string(),
            });
        }
        self.mirror_table()?;
        Ok(())
    }

    /// Store root: env override, then `cache_dir`, then the platform cache dir
    pub fn resolve_cache_dir(&self) -> Result<PathBuf, ConfigError> {
        if let Ok(dir) = std::env::var(CACHE_DIR_ENV) {
            if !dir.trim().is_empty() {
                return Ok(PathBuf::from(dir));
            }
        }
        if let Some(dir) = &self.cache_dir {
            return Ok(dir.clone());
        }
        dirs::cache_dir()
            .map(|dir| dir.join("scene-preload"))
            .ok_or(ConfigError::NoCacheDir)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Loader policy implied by `cache_only`
    pub fn network_policy(&self) -> NetworkPolicy {
        if self.cache_only {
            NetworkPolicy::CacheOnly
        } else {
            NetworkPolicy::Allow
        }
    }

    /// Eviction policy implied by `evict_to_fit`
    pub fn eviction_policy(&self) -> Arc<dyn EvictionPolicy> {
        if self.evict_to_fit {
            Arc::new(EvictToFit)
        } else {
            Arc::new(NeverEvict)
        }
    }

    pub fn preload_config(&self) -> PreloadConfig {
        PreloadConfig {
            max_concurrent_loads: self.max_concurrent_loads.max(1),
        }
    }

    /// Build the validated mirror table
    pub fn mirror_table(&self) -> Result<HostMirrorTable, MirrorTableError> {
        HostMirrorTable::from_map(&self.mirrors)
    }

    /// Open the on-disk store at [`resolve_cache_dir`](Self::resolve_cache_dir)
    pub fn open_store(&self) -> Result<FsStore, ConfigError> {
        let dir = self.resolve_cache_dir()?;
        let store = match self.cache_capacity_bytes {
            Some(capacity) => FsStore::open_with_capacity(&dir, capacity)?,
            None => FsStore::open(&dir)?,
        };
        Ok(store)
    }
}
