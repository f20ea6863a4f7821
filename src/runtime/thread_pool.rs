//! Runtime-free spawner backed by `futures::executor::ThreadPool`
//!
//! For hosts that do not run tokio. Timeouts still work because fetch
//! deadlines use `futures-timer`, which has its own timer thread.

use super::AsyncSpawner;
use futures::executor::ThreadPool;
use std::fmt;
use std::future::Future;
use std::io;

/// Spawns tasks onto a shared futures thread pool
#[derive(Clone)]
pub struct ThreadPoolSpawner {
    pool: ThreadPool,
}

impl ThreadPoolSpawner {
    /// Pool sized to the number of CPUs
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            pool: ThreadPool::new()?,
        })
    }

    /// Pool with exactly `threads` workers
    pub fn with_threads(threads: usize) -> io::Result<Self> {
        let pool = ThreadPool::builder()
            .pool_size(threads.max(1))
            .name_prefix("scene-preload-")
            .create()?;
        Ok(Self { pool })
    }
}

impl fmt::Debug for ThreadPoolSpawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolSpawner").finish_non_exhaustive()
    }
}

impl AsyncSpawner for ThreadPoolSpawner {
    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.pool.spawn_ok(task);
    }

    fn runtime_name(&self) -> &'static str {
        "ThreadPool"
    }
}
