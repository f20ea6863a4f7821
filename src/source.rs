//! Asset source descriptors
//!
//! An [`AssetSource`] says where the bytes of an asset come from. It never
//! carries the asset identifier; the cache key is supplied by the caller or
//! derived with [`AssetSource::derive_asset_id`].

use base64::Engine;
use percent_encoding::percent_decode_str;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use url::Url;
use xxhash_rust::xxh3::xxh3_64;

/// Error type for inline payload decoding
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("Not a data URL")]
    NotDataUrl,

    #[error("Data URL has no ',' separator")]
    MissingSeparator,

    #[error("Invalid base64 payload: {0}")]
    Base64(String),
}

/// Opaque handle to bytes already owned by the host application
///
/// Typically a file picked by the user or a buffer produced by another
/// subsystem. Cloning is cheap.
#[derive(Clone)]
pub struct BlobHandle {
    bytes: Arc<[u8]>,
    mime: Option<String>,
}

impl BlobHandle {
    /// Wrap raw bytes in a blob handle
    pub fn new(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
            mime: None,
        }
    }

    /// Attach a MIME type to the blob
    pub fn with_mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Declared MIME type, if any
    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    /// Shared view of the blob contents
    pub fn bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }
}

impl fmt::Debug for BlobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobHandle")
            .field("len", &self.bytes.len())
            .field("mime", &self.mime)
            .finish()
    }
}

/// Where the bytes of an asset originate
#[derive(Debug, Clone)]
pub enum AssetSource {
    /// Bytes supplied directly by the caller
    InlineBuffer(Arc<[u8]>),

    /// An RFC 2397 `data:` URL
    InlineDataUrl(String),

    /// A host-owned blob
    InlineBlob(BlobHandle),

    /// A remote resource, optionally with its expected payload size
    RemoteUrl {
        url: String,
        expected_size: Option<u64>,
    },
}

/// Discriminant of [`AssetSource`], used for logging and metrics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    InlineBuffer,
    InlineDataUrl,
    InlineBlob,
    RemoteUrl,
}

impl AssetSource {
    pub fn buffer(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self::InlineBuffer(bytes.into())
    }

    pub fn data_url(data_url: impl Into<String>) -> Self {
        Self::InlineDataUrl(data_url.into())
    }

    pub fn blob(handle: BlobHandle) -> Self {
        Self::InlineBlob(handle)
    }

    /// Remote URL with no size expectation
    pub fn remote(url: impl Into<String>) -> Self {
        Self::RemoteUrl {
            url: url.into(),
            expected_size: None,
        }
    }

    /// Remote URL whose payload must be exactly `expected_size` bytes
    pub fn remote_with_size(url: impl Into<String>, expected_size: u64) -> Self {
        Self::RemoteUrl {
            url: url.into(),
            expected_size: Some(expected_size),
        }
    }

    /// Variant tag without the payload
    pub fn kind(&self) -> SourceKind {
        match self {
            Self::InlineBuffer(_) => SourceKind::InlineBuffer,
            Self::InlineDataUrl(_) => SourceKind::InlineDataUrl,
            Self::InlineBlob(_) => SourceKind::InlineBlob,
            Self::RemoteUrl { .. } => SourceKind::RemoteUrl,
        }
    }

    /// True for every variant that resolves without any I/O
    pub fn is_inline(&self) -> bool {
        !matches!(self, Self::RemoteUrl { .. })
    }

    /// Derive a stable cache key for this source
    ///
    /// Remote sources are keyed by their normalized original URL (fragment
    /// dropped), so the key never depends on which mirror served the bytes.
    /// Inline sources are keyed by a content hash.
    pub fn derive_asset_id(&self) -> String {
        match self {
            Self::RemoteUrl { url, .. } => match Url::parse(url.trim()) {
                Ok(mut parsed) => {
                    parsed.set_fragment(None);
                    parsed.to_string()
                }
                Err(_) => url.trim().to_string(),
            },
            Self::InlineBuffer(bytes) => inline_id(bytes),
            Self::InlineDataUrl(data_url) => inline_id(data_url.as_bytes()),
            Self::InlineBlob(blob) => inline_id(&blob.bytes),
        }
    }
}

fn inline_id(bytes: &[u8]) -> String {
    format!("inline:{:016x}", xxh3_64(bytes))
}

/// A decoded `data:` URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub mime: Option<String>,
    pub bytes: Vec<u8>,
}

impl DataUrl {
    /// Decode a `data:[<mediatype>][;base64],<data>` URL
    ///
    /// Base64 payloads tolerate embedded whitespace; other payloads are
    /// percent-decoded.
    pub fn parse(input: &str) -> Result<Self, SourceError> {
        let input = input.trim();
        let rest = match input.get(..5) {
            Some(scheme) if scheme.eq_ignore_ascii_case("data:") => &input[5..],
            _ => return Err(SourceError::NotDataUrl),
        };
        let (header, payload) = rest.split_once(',').ok_or(SourceError::MissingSeparator)?;

        let mut params = header.split(';');
        let mime = params
            .next()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
        let is_base64 = params.any(|p| p.trim().eq_ignore_ascii_case("base64"));

        let bytes = if is_base64 {
            let compact: String = payload.chars().filter(|c| !c.is_ascii_whitespace()).collect();
            let compact = percent_decode_str(&compact).decode_utf8_lossy().into_owned();
            base64::engine::general_purpose::STANDARD
                .decode(compact.as_bytes())
                .map_err(|e| SourceError::Base64(e.to_string()))?
        } else {
            percent_decode_str(payload).collect()
        };

        Ok(Self { mime, bytes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_base64() {
        let decoded = DataUrl::parse("data:application/octet-stream;base64,AAECAw==").unwrap();
        assert_eq!(decoded.bytes, vec![0, 1, 2, 3]);
        assert_eq!(decoded.mime.as_deref(), Some("application/octet-stream"));
    }

    #[test]
    fn test_data_url_percent_encoded() {
        let decoded = DataUrl::parse("data:,hello%20world").unwrap();
        assert_eq!(decoded.bytes, b"hello world");
        assert!(decoded.mime.is_none());
    }

    #[test]
    fn test_data_url_rejects_garbage() {
        assert_eq!(DataUrl::parse("https://x/y"), Err(SourceError::NotDataUrl));
        assert_eq!(DataUrl::parse("data:text/plain"), Err(SourceError::MissingSeparator));
        assert!(matches!(
            DataUrl::parse("data:;base64,@@@"),
            Err(SourceError::Base64(_))
        ));
    }

    #[test]
    fn test_remote_id_ignores_fragment() {
        let a = AssetSource::remote("https://CDN.example.com/a.glb#node");
        let b = AssetSource::remote("https://cdn.example.com/a.glb");
        assert_eq!(a.derive_asset_id(), b.derive_asset_id());
    }

    #[test]
    fn test_inline_id_is_content_hash() {
        let a = AssetSource::buffer(vec![1u8, 2, 3]);
        let b = AssetSource::blob(BlobHandle::new(vec![1u8, 2, 3]));
        assert_eq!(a.derive_asset_id(), b.derive_asset_id());
        assert!(a.derive_asset_id().starts_with("inline:"));
        assert!(a.is_inline());
        assert!(!AssetSource::remote("https://x/y").is_inline());
    }
}
