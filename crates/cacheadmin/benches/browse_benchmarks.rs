//! Benchmarks for key listing and value round trips
//!
//! Measures full-listing pagination cost, metadata fan-out, and pattern matching.

use std::hint::black_box;
use std::sync::Arc;

use cacheadmin::{
    BackendAdapter, BrowseOptions, BrowseRequest, Config, Console, Key, KeyBrowser, MemoryConfig,
    MemoryStore, Pattern, ServerConfig, SortField, SortOrder,
};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use tokio::runtime::Runtime;

fn populated_store(rt: &Runtime, count: usize) -> MemoryStore {
    let store = MemoryStore::new();
    rt.block_on(async {
        for i in 0..count {
            let key = Key::from(format!("user:{i:06}"));
            store.set(&key, &vec![b'x'; i % 512], None).await.unwrap();
        }
    });
    store
}

fn bench_browse(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("browse");

    for count in [100, 1_000, 10_000] {
        let store = populated_store(&rt, count);
        let browser = KeyBrowser::default();
        group.throughput(Throughput::Elements(count as u64));

        group.bench_with_input(BenchmarkId::new("key_sort", count), &count, |b, _| {
            let request = BrowseRequest::default().page(3, 25);
            b.to_async(&rt).iter(|| async {
                black_box(browser.browse(&store, &request).await.unwrap());
            });
        });

        group.bench_with_input(BenchmarkId::new("size_sort", count), &count, |b, _| {
            let request = BrowseRequest::default()
                .sort(SortField::Size, SortOrder::Desc)
                .page(0, 25);
            b.to_async(&rt).iter(|| async {
                black_box(browser.browse(&store, &request).await.unwrap());
            });
        });
    }

    group.finish();
}

fn bench_metadata_concurrency(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("metadata_concurrency");
    let store = populated_store(&rt, 5_000);
    let request = BrowseRequest::default().sort(SortField::Ttl, SortOrder::Asc);

    for concurrency in [1, 4, 16] {
        let browser = KeyBrowser::new(BrowseOptions {
            metadata_concurrency: concurrency,
            ..BrowseOptions::default()
        });
        group.bench_with_input(
            BenchmarkId::from_parameter(concurrency),
            &concurrency,
            |b, _| {
                b.to_async(&rt).iter(|| async {
                    black_box(browser.browse(&store, &request).await.unwrap());
                });
            },
        );
    }

    group.finish();
}

fn bench_pattern(c: &mut Criterion) {
    let mut group = c.benchmark_group("pattern_match");
    let keys: Vec<String> = (0..1_000).map(|i| format!("cache:page:{i}:fragment")).collect();

    for source in ["*", "cache:page:*", "*:fragment", "cache:page:[0-4]??:*"] {
        let pattern = Pattern::parse(source).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(source), &pattern, |b, p| {
            b.iter(|| {
                keys.iter()
                    .filter(|k| p.matches(black_box(k.as_bytes())))
                    .count()
            });
        });
    }

    group.finish();
}

fn bench_console_round_trip(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let mut group = c.benchmark_group("console_round_trip");

    let config = Config::builder()
        .server(ServerConfig::memory("local", MemoryConfig::default()))
        .build()
        .unwrap();
    let mut console = Console::new(&config).unwrap();
    let store = MemoryStore::new();
    console.attach("local", Arc::new(store)).unwrap();
    let key = Key::from("bench:value");
    let text = "lorem ipsum dolor sit amet ".repeat(64);

    group.bench_function("save_gzcompress_then_read", |b| {
        b.to_async(&rt).iter(|| async {
            console
                .save("local", &key, &text, Some("gzcompress"), None)
                .await
                .unwrap();
            black_box(console.read("local", &key).await.unwrap());
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_browse,
    bench_metadata_concurrency,
    bench_pattern,
    bench_console_round_trip
);
criterion_main!(benches);
