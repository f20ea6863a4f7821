//! Filesystem-backed asset store
//!
//! Layout under the store root:
//!
//! ```text
//! <root>/index.toml            entry metadata
//! <root>/objects/<xxh3>.bin    asset bytes, named by hash of the asset id
//! ```
//!
//! Object files are written to a temporary name outside the store lock and
//! renamed into place under it, so a crash never leaves a truncated object
//! behind a `Cached` entry. A mutation whose index write fails is undone in
//! memory and on disk. Recency bumps are kept in memory and persisted with
//! the next mutation or [`FsStore::flush`].

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_64;

use super::{
    lru_victims, AssetCacheEntry, AssetCacheStore, CacheStatus, Clock, EntryMetadata, StoreError,
    StoreUsage, SystemClock,
};

const INDEX_FILE: &str = "index.toml";
const OBJECTS_DIR: &str = "objects";

#[cfg(unix)]
const DISK_FULL_CODES: &[i32] = &[28, 122]; // ENOSPC, EDQUOT
#[cfg(windows)]
const DISK_FULL_CODES: &[i32] = &[39, 112]; // ERROR_HANDLE_DISK_FULL, ERROR_DISK_FULL
#[cfg(not(any(unix, windows)))]
const DISK_FULL_CODES: &[i32] = &[];

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexFile {
    #[serde(default)]
    entries: Vec<AssetCacheEntry>,
}

#[derive(Default)]
struct FsState {
    entries: BTreeMap<String, AssetCacheEntry>,
    used_bytes: u64,
    dirty: bool,
}

impl FsState {
    /// Bytes `asset_id` currently occupies
    fn cached_len(&self, asset_id: &str) -> u64 {
        self.entries
            .get(asset_id)
            .filter(|e| e.is_cached())
            .map_or(0, |e| e.byte_length)
    }
}

/// Index state to put back when persisting a mutation fails
struct Rollback {
    entries: Vec<(String, Option<AssetCacheEntry>)>,
    used_bytes: u64,
}

impl Rollback {
    fn capture<'a>(state: &FsState, ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            entries: ids
                .into_iter()
                .map(|id| (id.to_string(), state.entries.get(id).cloned()))
                .collect(),
            used_bytes: state.used_bytes,
        }
    }

    fn restore(self, state: &mut FsState) {
        for (id, entry) in self.entries {
            match entry {
                Some(entry) => {
                    state.entries.insert(id, entry);
                }
                None => {
                    state.entries.remove(&id);
                }
            }
        }
        state.used_bytes = self.used_bytes;
    }
}

/// Put the previous object back, or drop the new one when there was none
fn undo_object(path: &Path, backup: &Path, had_object: bool) {
    let undone = if had_object {
        fs::rename(backup, path)
    } else {
        fs::remove_file(path)
    };
    if let Err(e) = undone {
        log::warn!("Could not roll back cache object {}: {e}", path.display());
    }
}

/// [`AssetCacheStore`] persisted in a directory
pub struct FsStore {
    root: PathBuf,
    capacity: Option<u64>,
    clock: Arc<dyn Clock>,
    state: Mutex<FsState>,
}

fn unavailable(context: &str, err: io::Error) -> StoreError {
    StoreError::Unavailable(format!("{context}: {err}"))
}

fn write_error(context: &str, err: io::Error, requested: u64) -> StoreError {
    match err.raw_os_error() {
        Some(code) if DISK_FULL_CODES.contains(&code) => StoreError::Full {
            requested,
            available: 0,
        },
        _ => unavailable(context, err),
    }
}

impl FsStore {
    /// Open (or create) a store rooted at `root`
    ///
    /// Pending entries from a previous process are dropped, cached entries
    /// whose object file is missing or has the wrong size are dropped, and
    /// orphaned object files are deleted. An unreadable index is treated as
    /// empty.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        Self::open_with(root, None, Arc::new(SystemClock))
    }

    /// Like [`open`](Self::open), with a byte quota
    pub fn open_with_capacity<P: AsRef<Path>>(
        root: P,
        capacity_bytes: u64,
    ) -> Result<Self, StoreError> {
        Self::open_with(root, Some(capacity_bytes), Arc::new(SystemClock))
    }

    /// Open with an explicit quota and timestamp source
    pub fn open_with<P: AsRef<Path>>(
        root: P,
        capacity: Option<u64>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join(OBJECTS_DIR))
            .map_err(|e| unavailable("create store directory", e))?;

        let store = Self {
            root,
            capacity,
            clock,
            state: Mutex::new(FsState::default()),
        };
        store.recover()?;
        Ok(store)
    }

    /// Directory the store lives in
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, asset_id: &str) -> PathBuf {
        self.root
            .join(OBJECTS_DIR)
            .join(format!("{:016x}.bin", xxh3_64(asset_id.as_bytes())))
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    fn recover(&self) -> Result<(), StoreError> {
        let index = match fs::read_to_string(self.index_path()) {
            Ok(content) => toml::from_str::<IndexFile>(&content).unwrap_or_else(|e| {
                log::warn!("Discarding unreadable cache index: {e}");
                IndexFile::default()
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => IndexFile::default(),
            Err(e) => return Err(unavailable("read cache index", e)),
        };

        let mut state = self.state.lock();
        let mut live_objects = HashSet::new();
        for entry in index.entries {
            match entry.status {
                CacheStatus::Pending => continue,
                CacheStatus::Cached => {
                    let path = self.object_path(&entry.asset_id);
                    let on_disk = fs::metadata(&path).map(|m| m.len()).ok();
                    if on_disk != Some(entry.byte_length) {
                        log::warn!(
                            "Dropping cache entry '{}': object missing or truncated",
                            entry.asset_id
                        );
                        continue;
                    }
                    state.used_bytes += entry.byte_length;
                    live_objects.insert(path);
                }
                CacheStatus::Error => {}
            }
            state.entries.insert(entry.asset_id.clone(), entry);
        }

        let objects = fs::read_dir(self.root.join(OBJECTS_DIR))
            .map_err(|e| unavailable("list cache objects", e))?;
        for object in objects.flatten() {
            let path = object.path();
            if !live_objects.contains(&path) {
                log::debug!("Removing orphaned cache object {}", path.display());
                let _ = fs::remove_file(&path);
            }
        }

        self.persist(&mut state)
    }

    fn persist(&self, state: &mut FsState) -> Result<(), StoreError> {
        let index = IndexFile {
            entries: state.entries.values().cloned().collect(),
        };
        let content = toml::to_string(&index)
            .map_err(|e| StoreError::Unavailable(format!("serialize cache index: {e}")))?;
        let tmp = self.root.join(format!("{INDEX_FILE}.tmp"));
        fs::write(&tmp, content).map_err(|e| write_error("write cache index", e, 0))?;
        fs::rename(&tmp, self.index_path()).map_err(|e| unavailable("replace cache index", e))?;
        state.dirty = false;
        Ok(())
    }

    /// Persist the index, undoing the in-memory mutation if that fails
    fn commit(&self, state: &mut FsState, rollback: Rollback) -> Result<(), StoreError> {
        if let Err(e) = self.persist(state) {
            rollback.restore(state);
            return Err(e);
        }
        Ok(())
    }

    fn check_capacity(
        &self,
        state: &FsState,
        asset_id: &str,
        incoming: u64,
    ) -> Result<(), StoreError> {
        let Some(capacity) = self.capacity else {
            return Ok(());
        };
        let used_without = state.used_bytes - state.cached_len(asset_id);
        if used_without + incoming > capacity {
            return Err(StoreError::Full {
                requested: incoming,
                available: capacity.saturating_sub(used_without),
            });
        }
        Ok(())
    }

    /// Delete the object of an entry that is already gone from the index
    fn remove_object(&self, asset_id: &str) {
        match fs::remove_file(self.object_path(asset_id)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            // Left as an orphan; removed by the next recovery
            Err(e) => log::warn!("Could not remove cache object for '{asset_id}': {e}"),
        }
    }

    fn read_object(&self, asset_id: &str) -> Result<Option<Arc<[u8]>>, StoreError> {
        match fs::read(self.object_path(asset_id)) {
            Ok(bytes) => Ok(Some(bytes.into())),
            Err(e) => Err(unavailable("read cache object", e)),
        }
    }

    /// Persist pending recency updates
    pub fn flush(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        if state.dirty {
            self.persist(&mut state)?;
        }
        Ok(())
    }
}

impl Drop for FsStore {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::warn!("Failed to flush cache index on drop: {e}");
        }
    }
}

#[async_trait::async_trait]
impl AssetCacheStore for FsStore {
    async fn get_entry(&self, asset_id: &str) -> Result<Option<AssetCacheEntry>, StoreError> {
        Ok(self.state.lock().entries.get(asset_id).cloned())
    }

    async fn read_bytes(&self, asset_id: &str) -> Result<Option<Arc<[u8]>>, StoreError> {
        if !self.state.lock().entries.get(asset_id).is_some_and(AssetCacheEntry::is_cached) {
            return Ok(None);
        }
        match fs::read(self.object_path(asset_id)) {
            Ok(bytes) => Ok(Some(bytes.into())),
            // Evicted or being replaced since the lookup; settle it under the lock
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let state = self.state.lock();
                match state.entries.get(asset_id) {
                    Some(entry) if entry.is_cached() => self.read_object(asset_id),
                    _ => Ok(None),
                }
            }
            Err(e) => Err(unavailable("read cache object", e)),
        }
    }

    async fn touch(&self, asset_id: &str) -> Result<(), StoreError> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get_mut(asset_id) {
            entry.last_accessed_at = now;
            state.dirty = true;
        }
        Ok(())
    }

    async fn mark_pending(&self, asset_id: &str) -> Result<AssetCacheEntry, StoreError> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        if let Some(existing) = state.entries.get(asset_id) {
            return Ok(existing.clone());
        }
        // Pending entries are dropped on recovery, so no need to persist them
        let entry = AssetCacheEntry::pending(asset_id, now);
        state.entries.insert(asset_id.to_string(), entry.clone());
        Ok(entry)
    }

    async fn put(
        &self,
        asset_id: &str,
        bytes: Arc<[u8]>,
        metadata: EntryMetadata,
    ) -> Result<AssetCacheEntry, StoreError> {
        let incoming = bytes.len() as u64;
        self.check_capacity(&self.state.lock(), asset_id, incoming)?;

        // The payload is written without holding the lock
        let path = self.object_path(asset_id);
        let tmp = path.with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        if let Err(e) = fs::write(&tmp, &bytes) {
            let _ = fs::remove_file(&tmp);
            return Err(write_error("write cache object", e, incoming));
        }

        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        // Other writes may have landed meanwhile
        if let Err(e) = self.check_capacity(&state, asset_id, incoming) {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }

        let backup = path.with_extension("bak");
        let previous = state.cached_len(asset_id);
        let had_object = state.entries.get(asset_id).is_some_and(AssetCacheEntry::is_cached);
        if had_object {
            if let Err(e) = fs::rename(&path, &backup) {
                let _ = fs::remove_file(&tmp);
                return Err(unavailable("back up cache object", e));
            }
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            if had_object {
                undo_object(&path, &backup, true);
            }
            return Err(unavailable("commit cache object", e));
        }

        let rollback = Rollback::capture(&state, [asset_id]);
        let entry = AssetCacheEntry::cached(asset_id, incoming, metadata, now);
        state.entries.insert(asset_id.to_string(), entry.clone());
        state.used_bytes = state.used_bytes - previous + incoming;
        if let Err(e) = self.commit(&mut state, rollback) {
            undo_object(&path, &backup, had_object);
            return Err(e);
        }
        if had_object {
            let _ = fs::remove_file(&backup);
        }
        Ok(entry)
    }

    async fn mark_error(
        &self,
        asset_id: &str,
        error: &str,
    ) -> Result<AssetCacheEntry, StoreError> {
        let now = self.clock.now_millis();
        let mut state = self.state.lock();
        let rollback = Rollback::capture(&state, [asset_id]);
        let entry = state
            .entries
            .entry(asset_id.to_string())
            .or_insert_with(|| AssetCacheEntry::pending(asset_id, now));
        entry.record_error(error);
        let entry = entry.clone();
        self.commit(&mut state, rollback)?;
        Ok(entry)
    }

    async fn evict(&self, asset_id: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        let rollback = Rollback::capture(&state, [asset_id]);
        let Some(removed) = state.entries.remove(asset_id) else {
            return Ok(());
        };
        if removed.is_cached() {
            state.used_bytes -= removed.byte_length;
        }
        self.commit(&mut state, rollback)?;
        if removed.is_cached() {
            self.remove_object(asset_id);
        }
        Ok(())
    }

    async fn evict_least_recently_used_except(
        &self,
        target_freed_bytes: u64,
        keep: Option<&str>,
    ) -> Result<Vec<String>, StoreError> {
        let mut state = self.state.lock();
        let victims = lru_victims(state.entries.values(), target_freed_bytes, keep);
        if victims.is_empty() {
            return Ok(victims);
        }
        let rollback = Rollback::capture(&state, victims.iter().map(String::as_str));
        for id in &victims {
            if let Some(entry) = state.entries.remove(id) {
                state.used_bytes -= entry.byte_length;
            }
        }
        self.commit(&mut state, rollback)?;
        for id in &victims {
            self.remove_object(id);
        }
        log::debug!(
            "Evicted {} asset(s) from {}",
            victims.len(),
            self.root.display()
        );
        Ok(victims)
    }

    async fn usage(&self) -> Result<StoreUsage, StoreError> {
        let state = self.state.lock();
        Ok(StoreUsage {
            used_bytes: state.used_bytes,
            capacity_bytes: self.capacity,
            entries: state.entries.len(),
        })
    }
}
