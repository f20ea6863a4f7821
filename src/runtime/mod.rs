//! Async runtime abstraction for flexible async execution
//!
//! The preload orchestrator spawns one task per asset load through an
//! [`AsyncSpawner`], so it works with tokio or with a plain futures thread pool.

pub mod thread_pool;
#[cfg(feature = "runtime-tokio")]
pub mod tokio_impl;

use std::fmt::Debug;
use std::future::Future;

/// Async task spawner trait
///
/// Implementations must actually drive spawned tasks to completion; the
/// orchestrator waits on their results over a channel.
///
/// # Example
/// ```ignore
/// let spawner = TokioSpawner::new();
/// spawner.spawn(async {
///     // Async work here
/// });
/// ```
pub trait AsyncSpawner: Send + Sync + Clone + Debug {
    /// Spawn a detached task
    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Get the name of this runtime (for debugging)
    fn runtime_name(&self) -> &'static str;
}

pub use thread_pool::ThreadPoolSpawner;

#[cfg(feature = "runtime-tokio")]
pub use tokio_impl::TokioSpawner;
