//! Integration tests for single-flight loading and cache hits

mod common;

use common::{init_logging, ScriptedFetcher};
use futures::future::join_all;
use scene_preload::{
    AssetCacheStore, AssetLoader, AssetSource, CacheStatus, FetchError, HostMirrorTable, LoadError, LoadOptions,
    MemoryStore,
};
use std::sync::Arc;
use std::time::Duration;

const URL: &str = "https://cdn.example.com/models/chair.glb";

fn loader(fetcher: Arc<ScriptedFetcher>) -> AssetLoader<MemoryStore, ScriptedFetcher> {
    AssetLoader::new(
        Arc::new(MemoryStore::new()),
        fetcher,
        Arc::new(HostMirrorTable::new()),
    )
}

#[tokio::test]
async fn test_concurrent_loads_share_one_fetch() {
    init_logging();
    let fetcher = Arc::new(ScriptedFetcher::with_delay(Duration::from_millis(50)));
    fetcher.respond(URL, vec![9u8; 16]);
    let loader = loader(Arc::clone(&fetcher));
    let source = AssetSource::remote(URL);

    let results = join_all((0..8).map(|_| loader.load("chair", &source, LoadOptions::default()))).await;

    assert_eq!(fetcher.call_count(), 1);
    for result in &results {
        let entry = result.as_ref().unwrap();
        assert_eq!(entry.status, CacheStatus::Cached);
        assert_eq!(entry.byte_length, 16);
    }
    assert_eq!(loader.metrics().coalesced_waits(), 7);
    assert_eq!(loader.in_flight(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_loads_across_tasks() {
    let fetcher = Arc::new(ScriptedFetcher::with_delay(Duration::from_millis(100)));
    fetcher.respond(URL, b"mesh".to_vec());
    let loader = loader(Arc::clone(&fetcher));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let loader = loader.clone();
            tokio::spawn(async move {
                loader
                    .load("chair", &AssetSource::remote(URL), LoadOptions::default())
                    .await
            })
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().byte_length, 4);
    }
    assert_eq!(fetcher.call_count(), 1);
}

#[tokio::test]
async fn test_waiters_share_failure() {
    let fetcher = Arc::new(ScriptedFetcher::with_delay(Duration::from_millis(20)));
    fetcher.fail(URL, FetchError::HttpStatus(503));
    let loader = loader(Arc::clone(&fetcher));
    let source = AssetSource::remote(URL);

    let results = join_all((0..3).map(|_| loader.load("chair", &source, LoadOptions::default()))).await;

    assert_eq!(fetcher.call_count(), 1);
    for result in results {
        assert!(matches!(
            result,
            Err(LoadError::AllMirrorsFailed {
                last_error: FetchError::HttpStatus(503),
                ..
            })
        ));
    }

    let entry = loader.store().get_entry("chair").await.unwrap().unwrap();
    assert_eq!(entry.status, CacheStatus::Error);
    assert!(entry.last_error.unwrap().contains("503"));
}

#[tokio::test]
async fn test_cache_hit_skips_fetch_and_returns_same_bytes() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(URL, vec![1u8, 2, 3, 4]);
    let loader = loader(Arc::clone(&fetcher));
    let source = AssetSource::remote(URL);

    let first = loader.load("chair", &source, LoadOptions::default()).await.unwrap();
    let first_bytes = loader.read("chair").await.unwrap().unwrap();

    for _ in 0..5 {
        let entry = loader.load("chair", &source, LoadOptions::default()).await.unwrap();
        assert_eq!(entry.byte_length, first.byte_length);
        assert_eq!(loader.read("chair").await.unwrap().unwrap(), first_bytes);
    }

    assert_eq!(fetcher.call_count(), 1);
    assert_eq!(loader.metrics().cache_hits(), 5);
    assert_eq!(loader.metrics().cache_misses(), 1);
}

#[tokio::test]
async fn test_cache_hit_skips_inline_decode() {
    let loader = loader(Arc::new(ScriptedFetcher::new()));
    loader
        .load("tex", &AssetSource::buffer(vec![1u8, 2]), LoadOptions::default())
        .await
        .unwrap();

    // A different payload under the same id is ignored until forced
    let entry = loader
        .load("tex", &AssetSource::buffer(vec![7u8; 9]), LoadOptions::default())
        .await
        .unwrap();
    assert_eq!(entry.byte_length, 2);
    assert_eq!(&*loader.read("tex").await.unwrap().unwrap(), &[1, 2]);
}

#[tokio::test]
async fn test_failed_force_refetch_keeps_cached_bytes() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.respond(URL, vec![5u8; 3]);
    let loader = loader(Arc::clone(&fetcher));
    let source = AssetSource::remote(URL);
    loader.load("chair", &source, LoadOptions::default()).await.unwrap();

    fetcher.fail(URL, FetchError::Network("connection reset".to_string()));
    let err = loader.load("chair", &source, LoadOptions::forced()).await.unwrap_err();
    assert!(matches!(err, LoadError::AllMirrorsFailed { .. }));

    let entry = loader.store().get_entry("chair").await.unwrap().unwrap();
    assert_eq!(entry.status, CacheStatus::Cached);
    assert!(entry.last_error.is_some());
    assert_eq!(loader.read("chair").await.unwrap().unwrap().len(), 3);
}
