use std::time::Duration;

use common::TransactionId;
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{Currency, Money};
use futures_util::FutureExt;
use saga::{DeduplicationCache, IdempotencyGuard, TopUpKey};

fn key(n: i64) -> TopUpKey {
    TopUpKey {
        phone: "37123456".into(),
        operator_id: "NMHT".into(),
        amount: Money::from_minor(500 + n),
        currency: Currency::brl(),
    }
}

fn bench_dedup_hit(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let cache: DeduplicationCache<TopUpKey, u64> = DeduplicationCache::new(Duration::from_secs(60));
    rt.block_on(cache.run(key(0), || async { 42 }.boxed()));

    c.bench_function("dedup/hit", |b| {
        b.iter(|| rt.block_on(cache.run(key(0), || async { 0 }.boxed())));
    });
}

fn bench_dedup_miss(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    // zero window: every call evicts the previous entry and misses
    let cache: DeduplicationCache<TopUpKey, u64> = DeduplicationCache::new(Duration::ZERO);

    c.bench_function("dedup/miss", |b| {
        b.iter(|| rt.block_on(cache.run(key(1), || async { 1 }.boxed())));
    });
}

fn bench_guard_acquire_release(c: &mut Criterion) {
    let guard = IdempotencyGuard::new();
    let id = TransactionId::new();

    c.bench_function("guard/acquire_release", |b| {
        b.iter(|| {
            let ticket = guard.try_acquire(id);
            assert!(ticket.is_some());
        });
    });
}

criterion_group!(
    benches,
    bench_dedup_hit,
    bench_dedup_miss,
    bench_guard_acquire_release
);
criterion_main!(benches);
