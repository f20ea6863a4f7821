//! Bulk scene preloading
//!
//! [`ScenePreloadOrchestrator`] enumerates every asset a scene references and
//! drives an [`AssetLoad`] implementation for each with bounded parallelism.
//! Per-asset failures are reported as progress events and never abort the
//! session; only enumeration failures are returned as errors.

pub mod cancel;
pub mod progress;

use futures::channel::mpsc;
use futures::future::{self, Either};
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;
use thiserror::Error;
use uuid::Uuid;

use crate::cache::AssetCacheEntry;
use crate::history::{SessionRecord, WorkHistoryLedger};
use crate::loader::{AssetLoad, LoadError, LoadOptions};
use crate::runtime::AsyncSpawner;
use crate::scene::{AssetReference, SceneError, SceneReader};

pub use cancel::CancellationToken;
pub use progress::{ProgressEvent, ProgressPhase, ProgressSink};

/// Default worker-pool size
pub const DEFAULT_MAX_CONCURRENT_LOADS: usize = 4;

/// Finished sessions whose phase stays queryable; older ones read `Idle`
pub const MAX_FINISHED_SESSIONS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreloadConfig {
    /// Loads allowed in flight at once for one session (at least 1)
    pub max_concurrent_loads: usize,
}

impl Default for PreloadConfig {
    fn default() -> Self {
        Self {
            max_concurrent_loads: DEFAULT_MAX_CONCURRENT_LOADS,
        }
    }
}

/// Per-call preload options
#[derive(Debug, Clone, Default)]
pub struct PreloadOptions {
    pub on_progress: Option<ProgressSink>,
    pub cancel: Option<CancellationToken>,
    /// Passed through to every asset load
    pub load: LoadOptions,
}

impl PreloadOptions {
    /// Report progress to `sink`
    pub fn with_progress(mut self, sink: ProgressSink) -> Self {
        self.on_progress = Some(sink);
        self
    }

    /// Stop the session when `token` fires
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_load_options(mut self, load: LoadOptions) -> Self {
        self.load = load;
        self
    }
}

/// Final counts of a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: bool,
    /// Ids of assets whose load failed, in completion order
    pub failed_assets: Vec<String>,
}

/// Lifecycle of a preload session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    Idle,
    Running,
    Completed,
    Cancelled,
    /// Enumeration of the scene's assets failed
    FailedFatal,
}

impl SessionPhase {
    /// Whether the session has finished
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::FailedFatal)
    }
}

#[derive(Error, Debug)]
pub enum PreloadError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to enumerate assets of scene '{scene_id}': {source}")]
    Enumeration {
        scene_id: String,
        #[source]
        source: SceneError,
    },
}

struct SessionHandle {
    generation: u64,
    /// Cleared on release; gates progress delivery
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
    phase: SessionPhase,
}

impl SessionHandle {
    fn deactivate(&self) {
        self.active.store(false, Ordering::SeqCst);
        self.cancel.cancel();
    }
}

#[derive(Default)]
struct SessionTable {
    by_scene: HashMap<String, SessionHandle>,
    /// `(scene_id, generation)` of finished sessions, oldest first
    finished: VecDeque<(String, u64)>,
}

impl SessionTable {
    /// Forget the oldest finished sessions beyond the retention bound
    fn prune_finished(&mut self) {
        while self.finished.len() > MAX_FINISHED_SESSIONS {
            let Some((scene_id, generation)) = self.finished.pop_front() else {
                break;
            };
            let stale = self
                .by_scene
                .get(&scene_id)
                .is_some_and(|h| h.generation == generation && h.phase != SessionPhase::Running);
            if stale {
                self.by_scene.remove(&scene_id);
            }
        }
    }
}

/// Drives whole-scene preloads through a shared loader
///
/// `L` loads single assets, `R` enumerates scene documents, and `S` runs one
/// task per in-flight load.
pub struct ScenePreloadOrchestrator<L, R, S> {
    loader: Arc<L>,
    reader: R,
    spawner: S,
    config: PreloadConfig,
    sessions: Mutex<SessionTable>,
    next_generation: AtomicU64,
    history: Option<Arc<WorkHistoryLedger>>,
}

impl<L, R, S> ScenePreloadOrchestrator<L, R, S>
where
    L: AssetLoad + 'static,
    S: AsyncSpawner,
{
    /// Orchestrator with the default [`PreloadConfig`]
    pub fn new(loader: Arc<L>, reader: R, spawner: S) -> Self {
        Self {
            loader,
            reader,
            spawner,
            config: PreloadConfig::default(),
            sessions: Mutex::new(SessionTable::default()),
            next_generation: AtomicU64::new(1),
            history: None,
        }
    }

    /// Replace the preload configuration
    pub fn with_config(mut self, config: PreloadConfig) -> Self {
        self.config = config;
        self
    }

    /// Record every finished session in `ledger`
    pub fn with_history(mut self, ledger: Arc<WorkHistoryLedger>) -> Self {
        self.history = Some(ledger);
        self
    }

    pub fn loader(&self) -> &Arc<L> {
        &self.loader
    }

    pub fn history(&self) -> Option<&Arc<WorkHistoryLedger>> {
        self.history.as_ref()
    }

    /// Phase of the most recent session for `scene_id`
    pub fn session_phase(&self, scene_id: &str) -> SessionPhase {
        self.sessions
            .lock()
            .by_scene
            .get(scene_id)
            .map_or(SessionPhase::Idle, |s| s.phase)
    }

    /// Scene ids with a running session
    pub fn active_sessions(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .sessions
            .lock()
            .by_scene
            .iter()
            .filter(|(_, s)| s.phase == SessionPhase::Running)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Mark the scene's session inactive
    ///
    /// Safe at any time. A running session stops issuing new loads and its
    /// remaining progress events are dropped. Returns whether a session existed.
    pub fn release_scene_resources(&self, scene_id: &str) -> bool {
        match self.sessions.lock().by_scene.remove(scene_id) {
            Some(handle) => {
                handle.deactivate();
                log::info!("Released preload session for scene '{scene_id}'");
                true
            }
            None => false,
        }
    }

    /// Ensure every asset `document` references is cached
    ///
    /// Starting a session for a scene that already has one running releases
    /// the older session.
    pub async fn preload_scene_resources<D>(
        &self,
        scene_id: &str,
        document: &D,
        options: PreloadOptions,
    ) -> Result<PreloadSummary, PreloadError>
    where
        D: ?Sized,
        R: SceneReader<D>,
    {
        if scene_id.trim().is_empty() {
            return Err(PreloadError::InvalidArgument(
                "scene id must not be empty".to_string(),
            ));
        }

        let started_at = SystemTime::now();
        let session_id = Uuid::new_v4();
        let (generation, active, session_cancel) = self.begin_session(scene_id);
        log::info!("Preload session {session_id} started for scene '{scene_id}'");

        let references = match self.reader.extract_asset_references(document) {
            Ok(refs) => dedupe(refs),
            Err(source) => {
                log::warn!("Scene '{scene_id}' could not be enumerated: {source}");
                self.finish_session(scene_id, generation, SessionPhase::FailedFatal);
                self.record_history(session_id, scene_id, SessionPhase::FailedFatal, None, started_at);
                return Err(PreloadError::Enumeration {
                    scene_id: scene_id.to_string(),
                    source,
                });
            }
        };

        let mut tokens = vec![session_cancel];
        tokens.extend(options.cancel.iter().cloned());
        let emit = |event: ProgressEvent| {
            if !active.load(Ordering::SeqCst) {
                return;
            }
            if let Some(sink) = &options.on_progress {
                sink.emit(&event);
            }
        };

        let summary = self
            .drive(references, options.load, &tokens, emit)
            .await;

        let phase = if summary.cancelled {
            SessionPhase::Cancelled
        } else {
            SessionPhase::Completed
        };
        self.finish_session(scene_id, generation, phase);
        self.record_history(session_id, scene_id, phase, Some(summary.clone()), started_at);
        log::info!(
            "Preload session {session_id} for scene '{scene_id}' finished: {}/{} completed, {} failed{}",
            summary.completed,
            summary.total,
            summary.failed,
            if summary.cancelled { ", cancelled" } else { "" }
        );

        Ok(summary)
    }

    async fn drive<E>(
        &self,
        references: Vec<AssetReference>,
        load_options: LoadOptions,
        tokens: &[CancellationToken],
        emit: E,
    ) -> PreloadSummary
    where
        E: Fn(ProgressEvent),
    {
        let total = references.len();
        let mut summary = PreloadSummary {
            total,
            ..PreloadSummary::default()
        };
        if total == 0 {
            return summary;
        }

        let event = |phase, asset_id: String, summary: &PreloadSummary, error| ProgressEvent {
            phase,
            asset_id,
            completed: summary.completed,
            total,
            failed: summary.failed,
            error,
        };

        let max_in_flight = self.config.max_concurrent_loads.max(1);
        let (tx, mut rx) = mpsc::unbounded::<(String, Result<AssetCacheEntry, LoadError>)>();
        let mut pending = references.into_iter().peekable();
        let mut in_flight = 0usize;
        let cancelled = cancel::any_cancelled(tokens);
        futures::pin_mut!(cancelled);

        loop {
            while in_flight < max_in_flight && pending.peek().is_some() {
                if tokens.iter().any(CancellationToken::is_cancelled) {
                    summary.cancelled = true;
                    break;
                }
                let Some(reference) = pending.next() else {
                    break;
                };

                emit(event(
                    ProgressPhase::Start,
                    reference.asset_id.clone(),
                    &summary,
                    None,
                ));
                in_flight += 1;

                let loader = Arc::clone(&self.loader);
                let tx = tx.clone();
                self.spawner.spawn(async move {
                    let result = loader
                        .load(&reference.asset_id, &reference.source, load_options)
                        .await;
                    // The receiver is gone once a cancelled session returns
                    let _ = tx.unbounded_send((reference.asset_id, result));
                });
            }

            if summary.cancelled || in_flight == 0 {
                break;
            }

            // Cancellation is polled first so a late result is never counted
            let (asset_id, result) = match future::select(cancelled.as_mut(), rx.next()).await {
                Either::Left(((), _)) => {
                    summary.cancelled = true;
                    break;
                }
                Either::Right((Some(message), _)) => message,
                Either::Right((None, _)) => break,
            };
            in_flight -= 1;
            match result {
                Ok(_) => {
                    summary.completed += 1;
                    emit(event(ProgressPhase::Success, asset_id, &summary, None));
                }
                Err(err) => {
                    log::warn!("Preload of '{asset_id}' failed: {err}");
                    summary.failed += 1;
                    summary.failed_assets.push(asset_id.clone());
                    emit(event(
                        ProgressPhase::Error,
                        asset_id,
                        &summary,
                        Some(err.to_string()),
                    ));
                }
            }
        }

        // Loads already started finish in the background, unobserved
        if summary.cancelled {
            for skipped in pending {
                emit(event(ProgressPhase::Skip, skipped.asset_id, &summary, None));
            }
        }

        summary
    }

    fn begin_session(&self, scene_id: &str) -> (u64, Arc<AtomicBool>, CancellationToken) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));
        let cancel = CancellationToken::new();
        let handle = SessionHandle {
            generation,
            active: Arc::clone(&active),
            cancel: cancel.clone(),
            phase: SessionPhase::Running,
        };
        let previous = self
            .sessions
            .lock()
            .by_scene
            .insert(scene_id.to_string(), handle);
        if let Some(previous) = previous {
            if previous.phase == SessionPhase::Running {
                log::info!("Superseding running preload session for scene '{scene_id}'");
            }
            previous.deactivate();
        }
        (generation, active, cancel)
    }

    /// Record the terminal phase unless the session was released or replaced
    fn finish_session(&self, scene_id: &str, generation: u64, phase: SessionPhase) {
        let mut sessions = self.sessions.lock();
        let Some(handle) = sessions.by_scene.get_mut(scene_id) else {
            return;
        };
        if handle.generation != generation {
            return;
        }
        handle.phase = phase;
        sessions.finished.push_back((scene_id.to_string(), generation));
        sessions.prune_finished();
    }

    fn record_history(
        &self,
        session_id: Uuid,
        scene_id: &str,
        phase: SessionPhase,
        summary: Option<PreloadSummary>,
        started_at: SystemTime,
    ) {
        if let Some(history) = &self.history {
            history.record(SessionRecord {
                session_id,
                scene_id: scene_id.to_string(),
                phase,
                summary,
                started_at,
                finished_at: SystemTime::now(),
            });
        }
    }
}

/// Keep the first reference for each asset id
fn dedupe(references: Vec<AssetReference>) -> Vec<AssetReference> {
    let mut seen = HashSet::with_capacity(references.len());
    references
        .into_iter()
        .filter(|r| seen.insert(r.asset_id.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::fetch::OfflineFetcher;
    use crate::loader::AssetLoader;
    use crate::runtime::ThreadPoolSpawner;
    use crate::source::AssetSource;
    use futures::executor::block_on;

    type Loader = AssetLoader<MemoryStore, OfflineFetcher>;
    type Reader = fn(&[AssetReference]) -> Result<Vec<AssetReference>, SceneError>;

    fn passthrough(refs: &[AssetReference]) -> Result<Vec<AssetReference>, SceneError> {
        Ok(refs.to_vec())
    }

    fn orchestrator() -> ScenePreloadOrchestrator<Loader, Reader, ThreadPoolSpawner> {
        let loader = AssetLoader::new(
            Arc::new(MemoryStore::new()),
            Arc::new(OfflineFetcher),
            Default::default(),
        );
        ScenePreloadOrchestrator::new(
            Arc::new(loader),
            passthrough as Reader,
            ThreadPoolSpawner::with_threads(2).unwrap(),
        )
    }

    fn inline(id: &str) -> AssetReference {
        AssetReference::new(id, AssetSource::buffer(id.as_bytes().to_vec()))
    }

    #[test]
    fn test_empty_scene_completes_immediately() {
        let orchestrator = orchestrator();
        let refs: Vec<AssetReference> = Vec::new();
        let summary = block_on(orchestrator.preload_scene_resources(
            "empty",
            &refs[..],
            PreloadOptions::default(),
        ))
        .unwrap();
        assert_eq!(summary, PreloadSummary::default());
        assert_eq!(orchestrator.session_phase("empty"), SessionPhase::Completed);
    }

    #[test]
    fn test_duplicates_counted_once() {
        let orchestrator = orchestrator();
        let refs = vec![inline("a"), inline("b"), inline("a")];
        let summary = block_on(orchestrator.preload_scene_resources(
            "dup",
            &refs[..],
            PreloadOptions::default(),
        ))
        .unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.completed, 2);
    }

    #[test]
    fn test_enumeration_failure_is_fatal() {
        let loader = AssetLoader::new(
            Arc::new(MemoryStore::new()),
            Arc::new(OfflineFetcher),
            Default::default(),
        );
        let reader = |_: &str| -> Result<Vec<AssetReference>, SceneError> {
            Err(SceneError::Malformed("truncated".to_string()))
        };
        let orchestrator = ScenePreloadOrchestrator::new(
            Arc::new(loader),
            reader,
            ThreadPoolSpawner::with_threads(1).unwrap(),
        );
        let err = block_on(orchestrator.preload_scene_resources("bad", "{", PreloadOptions::default()))
            .unwrap_err();
        assert!(matches!(err, PreloadError::Enumeration { .. }));
        assert_eq!(orchestrator.session_phase("bad"), SessionPhase::FailedFatal);
    }

    #[test]
    fn test_empty_scene_id_rejected() {
        let refs = vec![inline("a")];
        let err = block_on(orchestrator().preload_scene_resources(
            "",
            &refs[..],
            PreloadOptions::default(),
        ))
        .unwrap_err();
        assert!(matches!(err, PreloadError::InvalidArgument(_)));
    }

    #[test]
    fn test_release_unknown_scene() {
        let orchestrator = orchestrator();
        assert!(!orchestrator.release_scene_resources("nope"));
        assert_eq!(orchestrator.session_phase("nope"), SessionPhase::Idle);
    }

    #[test]
    fn test_finished_sessions_are_bounded() {
        let orchestrator = orchestrator();
        let refs: Vec<AssetReference> = Vec::new();
        for i in 0..MAX_FINISHED_SESSIONS + 6 {
            block_on(orchestrator.preload_scene_resources(
                &format!("scene{i}"),
                &refs[..],
                PreloadOptions::default(),
            ))
            .unwrap();
        }
        assert_eq!(orchestrator.sessions.lock().by_scene.len(), MAX_FINISHED_SESSIONS);
        assert_eq!(orchestrator.session_phase("scene5"), SessionPhase::Idle);
        assert_eq!(orchestrator.session_phase("scene6"), SessionPhase::Completed);

        // A re-run scene survives the pruning of its own older session
        block_on(orchestrator.preload_scene_resources("scene7", &refs[..], PreloadOptions::default()))
            .unwrap();
        assert_eq!(orchestrator.session_phase("scene6"), SessionPhase::Idle);
        block_on(orchestrator.preload_scene_resources("scene8", &refs[..], PreloadOptions::default()))
            .unwrap();
        assert_eq!(orchestrator.session_phase("scene7"), SessionPhase::Completed);
    }

    #[test]
    fn test_history_records_sessions() {
        let ledger = Arc::new(WorkHistoryLedger::new());
        let orchestrator = orchestrator().with_history(Arc::clone(&ledger));
        let refs = vec![inline("a")];
        block_on(orchestrator.preload_scene_resources("s", &refs[..], PreloadOptions::default()))
            .unwrap();
        let record = ledger.latest().unwrap();
        assert_eq!(record.scene_id, "s");
        assert_eq!(record.phase, SessionPhase::Completed);
        assert_eq!(record.summary.unwrap().completed, 1);
    }
}
