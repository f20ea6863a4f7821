//! Host mirror table and candidate URL generation
//!
//! A [`HostMirrorTable`] maps a canonical download host to an ordered list
//! of alternates. It only widens the set of URLs tried for a remote source;
//! it never changes the cache key an asset is stored under.

use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use thiserror::Error;
use url::Url;

/// Error type for mirror table construction
#[derive(Error, Debug)]
pub enum MirrorTableError {
    #[error("Mirror table contains an empty host")]
    EmptyHost,

    #[error("Host '{0}' lists itself as a mirror")]
    SelfMirror(String),

    #[error("Invalid mirror '{entry}' for host '{host}': {reason}")]
    InvalidEntry {
        host: String,
        entry: String,
        reason: String,
    },

    #[error("Failed to parse mirror table: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One alternate download location
#[derive(Debug, Clone, PartialEq, Eq)]
enum MirrorEntry {
    /// Bare host (optionally with port); scheme, path and query are kept
    Host { host: String, port: Option<u16> },
    /// Full origin; scheme, host and port are replaced
    Origin(Url),
}

impl MirrorEntry {
    fn parse(canonical: &str, raw: &str) -> Result<Self, MirrorTableError> {
        let invalid = |reason: &str| MirrorTableError::InvalidEntry {
            host: canonical.to_string(),
            entry: raw.to_string(),
            reason: reason.to_string(),
        };

        let raw = raw.trim();
        if raw.is_empty() {
            return Err(invalid("empty entry"));
        }

        let entry = if raw.contains("://") {
            let origin = Url::parse(raw).map_err(|e| invalid(&e.to_string()))?;
            if origin.host_str().is_none() {
                return Err(invalid("origin has no host"));
            }
            Self::Origin(origin)
        } else {
            // Borrow the URL parser to split and normalize host[:port]
            let parsed =
                Url::parse(&format!("http://{raw}")).map_err(|e| invalid(&e.to_string()))?;
            let host = parsed
                .host_str()
                .filter(|h| !h.is_empty())
                .ok_or_else(|| invalid("no host"))?
                .to_string();
            if parsed.path() != "/" && !parsed.path().is_empty() {
                return Err(invalid("bare host entries cannot carry a path"));
            }
            Self::Host {
                host,
                port: parsed.port(),
            }
        };

        if entry.host() == canonical {
            return Err(MirrorTableError::SelfMirror(canonical.to_string()));
        }
        Ok(entry)
    }

    fn host(&self) -> &str {
        match self {
            Self::Host { host, .. } => host,
            Self::Origin(origin) => origin.host_str().unwrap_or_default(),
        }
    }

    fn substitute(&self, original: &Url) -> Option<Url> {
        let mut candidate = original.clone();
        match self {
            Self::Host { host, port } => {
                candidate.set_host(Some(host)).ok()?;
                if port.is_some() {
                    candidate.set_port(*port).ok()?;
                }
            }
            Self::Origin(origin) => {
                candidate.set_scheme(origin.scheme()).ok()?;
                candidate.set_host(origin.host_str()).ok()?;
                candidate.set_port(origin.port()).ok()?;
            }
        }
        Some(candidate)
    }
}

#[derive(Debug, Deserialize)]
struct MirrorTableFile {
    #[serde(default)]
    mirrors: BTreeMap<String, Vec<String>>,
}

/// Immutable canonical-host to mirror-list mapping
///
/// Built once at startup and shared by reference; there is no way to mutate
/// a table after construction.
#[derive(Debug, Clone, Default)]
pub struct HostMirrorTable {
    mirrors: HashMap<String, Vec<MirrorEntry>>,
}

impl HostMirrorTable {
    /// An empty table: every remote URL has exactly one candidate
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `host -> [mirror, ...]` pairs
    ///
    /// Hosts are compared case-insensitively. Entry order is priority order.
    pub fn from_map<I, H, M, E>(map: I) -> Result<Self, MirrorTableError>
    where
        I: IntoIterator<Item = (H, M)>,
        H: AsRef<str>,
        M: IntoIterator<Item = E>,
        E: AsRef<str>,
    {
        let mut mirrors = HashMap::new();
        for (host, entries) in map {
            let host = host.as_ref().trim().to_ascii_lowercase();
            if host.is_empty() {
                return Err(MirrorTableError::EmptyHost);
            }
            let mut parsed: Vec<MirrorEntry> = Vec::new();
            for raw in entries {
                let entry = MirrorEntry::parse(&host, raw.as_ref())?;
                if !parsed.contains(&entry) {
                    parsed.push(entry);
                }
            }
            mirrors.insert(host, parsed);
        }
        Ok(Self { mirrors })
    }

    /// Parse a `[mirrors]` TOML table
    ///
    /// ```toml
    /// [mirrors]
    /// "cdn.example.com" = ["cdn-backup.example.com", "https://mirror.example.org"]
    /// ```
    pub fn from_toml_str(content: &str) -> Result<Self, MirrorTableError> {
        let parsed: MirrorTableFile = toml::from_str(content)?;
        Self::from_map(parsed.mirrors)
    }

    /// Load a table from a TOML file
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, MirrorTableError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.values().all(Vec::is_empty)
    }

    /// Number of mirrors registered for `host`
    pub fn mirror_count(&self, host: &str) -> usize {
        self.mirrors
            .get(&host.to_ascii_lowercase())
            .map_or(0, Vec::len)
    }

    /// Ordered candidate URLs for `original`, starting with `original` itself
    pub fn candidates(&self, original: &Url) -> Vec<Url> {
        let mut candidates = vec![original.clone()];
        let Some(entries) = original
            .host_str()
            .and_then(|host| self.mirrors.get(&host.to_ascii_lowercase()))
        else {
            return candidates;
        };

        for entry in entries {
            match entry.substitute(original) {
                Some(candidate) if !candidates.contains(&candidate) => candidates.push(candidate),
                Some(_) => {}
                None => log::warn!(
                    "Mirror {:?} cannot be applied to {}; skipping",
                    entry,
                    original
                ),
            }
        }
        candidates
    }
}
