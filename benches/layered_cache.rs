use criterion::{black_box, criterion_group, criterion_main, Criterion};
use relaykit::cache::{CacheConfig, InMemorySharedStore, LayeredCache};
use std::sync::Arc;

fn l1_hit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let cache = LayeredCache::new(CacheConfig::default());
    rt.block_on(cache.set("toggle:email", &true, None)).unwrap();

    c.bench_function("layered_cache_l1_hit", |b| {
        b.to_async(&rt).iter(|| async {
            let v: Option<bool> = cache.get(black_box("toggle:email")).await;
            black_box(v);
        });
    });
}

fn set_with_shared_store(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let cache = LayeredCache::builder(CacheConfig::default())
        .shared_store(Arc::new(InMemorySharedStore::new()))
        .build();

    c.bench_function("layered_cache_set_l1_l2", |b| {
        b.to_async(&rt).iter(|| async {
            let _ = black_box(cache.set("user:42:prefs", &serde_json::json!({"digest": "weekly"}), None).await);
        });
    });
}

fn eviction_at_capacity(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let config = CacheConfig::builder().max_memory_entries(256).build().unwrap();
    let cache = LayeredCache::new(config);
    let mut n = 0u64;

    c.bench_function("layered_cache_set_evicting", |b| {
        b.iter(|| {
            n += 1;
            let key = format!("k{}", n);
            rt.block_on(cache.set(&key, &n, None)).unwrap();
        });
    });
}

criterion_group!(benches, l1_hit, set_with_shared_store, eviction_at_capacity);
criterion_main!(benches);
