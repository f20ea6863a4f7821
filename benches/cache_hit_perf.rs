//! Benchmark: Cache hit performance

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use futures::executor::block_on;
use scene_preload::{
    AssetLoader, AssetSource, HostMirrorTable, LoadOptions, MemoryStore, OfflineFetcher,
};
use std::sync::Arc;

fn cache_hit_perf_benchmark(c: &mut Criterion) {
    let loader = AssetLoader::new(
        Arc::new(MemoryStore::new()),
        Arc::new(OfflineFetcher),
        Arc::new(HostMirrorTable::new()),
    );
    let source = AssetSource::buffer(vec![0u8; 64 * 1024]);
    block_on(loader.load("warm", &source, LoadOptions::default())).unwrap();

    c.bench_function("cache_hit_load", |b| {
        b.iter(|| black_box(block_on(loader.load("warm", &source, LoadOptions::default())).unwrap()))
    });

    c.bench_function("cache_hit_rate", |b| {
        b.iter(|| black_box(loader.metrics().cache_hit_rate()))
    });

    c.bench_function("inline_data_url_decode", |b| {
        let data_url = AssetSource::data_url(format!("data:;base64,{}", "AAECAwQF".repeat(1024)));
        b.iter(|| {
            black_box(block_on(loader.load("fresh", &data_url, LoadOptions::forced())).unwrap())
        })
    });
}

criterion_group!(benches, cache_hit_perf_benchmark);
criterion_main!(benches);
