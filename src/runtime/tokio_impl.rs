//! Tokio async runtime implementation

use super::AsyncSpawner;
use std::future::Future;

/// Spawns tasks on the ambient Tokio runtime
///
/// Must be used from within a runtime context; `tokio::spawn` panics otherwise.
#[derive(Clone, Debug, Default, Copy)]
pub struct TokioSpawner;

impl TokioSpawner {
    /// Spawner bound to the runtime of the calling context
    pub fn new() -> Self {
        Self
    }
}

impl AsyncSpawner for TokioSpawner {
    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Detached; the orchestrator collects results over its own channel
        drop(tokio::spawn(task));
    }

    fn runtime_name(&self) -> &'static str {
        "Tokio"
    }
}
