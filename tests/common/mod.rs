//! Shared fixtures for integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use scene_preload::{FetchError, Fetcher};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Fetcher that answers from a fixed table and records every request
///
/// Unknown URLs answer [`FetchError::NotFound`].
#[derive(Default)]
pub struct ScriptedFetcher {
    responses: Mutex<HashMap<String, Result<Vec<u8>, FetchError>>>,
    delays: Mutex<HashMap<String, Duration>>,
    default_delay: Option<Duration>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every response waits `delay` before answering
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            default_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn respond(&self, url: &str, bytes: impl Into<Vec<u8>>) -> &Self {
        self.responses.lock().insert(url.to_string(), Ok(bytes.into()));
        self
    }

    pub fn fail(&self, url: &str, error: FetchError) -> &Self {
        self.responses.lock().insert(url.to_string(), Err(error));
        self
    }

    /// Delay only `url`, overriding the default delay
    pub fn delay(&self, url: &str, delay: Duration) -> &Self {
        self.delays.lock().insert(url.to_string(), delay);
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait::async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch_bytes(&self, url: &Url, _timeout: Duration) -> Result<Vec<u8>, FetchError> {
        let key = url.to_string();
        self.calls.lock().push(key.clone());

        let delay = self.delays.lock().get(&key).copied().or(self.default_delay);
        if let Some(delay) = delay {
            futures_timer::Delay::new(delay).await;
        }

        self.responses
            .lock()
            .get(&key)
            .cloned()
            .unwrap_or(Err(FetchError::NotFound))
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
