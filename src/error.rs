//! Error types for scene_preload

use thiserror::Error;

/// Umbrella error for callers that drive several components
///
/// Each component returns its own error type; this one only aggregates them.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Load error: {0}")]
    Load(#[from] crate::loader::LoadError),

    #[error("Store error: {0}")]
    Store(#[from] crate::cache::StoreError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crate::fetch::FetchError),

    #[error("Preload error: {0}")]
    Preload(#[from] crate::preload::PreloadError),

    #[error("Scene error: {0}")]
    Scene(#[from] crate::scene::SceneError),

    #[error("Mirror table error: {0}")]
    Mirrors(#[from] crate::mirror::MirrorTableError),

    #[error("Config error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Source error: {0}")]
    Source(#[from] crate::source::SourceError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;
