//! # Reply Bridge Benchmarks
//!
//! | Component | Operation | Target |
//! |-----------|-----------|--------|
//! | Correlation store | buffered store + find | < 5μs |
//! | Correlation store | parked hand-off across tasks | < 50μs |
//! | Selective channel | scan for the last of N messages | O(N) |
//! | Event future | cached get | < 1μs |

// Allow excessive nesting in benchmark code
#![allow(clippy::excessive_nesting)]

use bridge_types::Message;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use reply_bridge::{BridgeConfig, CorrelationStore, EventFuture, HeaderSelector, SelectiveChannel};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

// ============================================================================
// Correlation Store
// ============================================================================

fn bench_correlation_store(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("correlation-store");
    group.measurement_time(Duration::from_secs(5));

    let store: Arc<CorrelationStore<u64>> = Arc::new(CorrelationStore::new("bench", &BridgeConfig::default()));

    group.bench_function("store_then_find", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let key = format!("K{i}");
            store.store(&key, i);
            black_box(rt.block_on(store.find(&key, Duration::ZERO)))
        })
    });

    group.bench_function("parked_hand_off", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i += 1;
            let key = format!("P{i}");
            let value = rt.block_on(async {
                let finder = {
                    let store = store.clone();
                    let key = key.clone();
                    tokio::spawn(async move { store.find(&key, Duration::from_secs(1)).await })
                };
                tokio::task::yield_now().await;
                store.store(&key, i);
                finder.await.ok().flatten()
            });
            black_box(value)
        })
    });

    // Lookups while many unrelated keys are buffered
    for buffered in [100usize, 10_000] {
        let crowded: Arc<CorrelationStore<u64>> =
            Arc::new(CorrelationStore::new("crowded", &BridgeConfig::default()));
        for k in 0..buffered {
            crowded.store(&format!("bg-{k}"), k as u64);
        }

        group.bench_with_input(BenchmarkId::new("find_among", buffered), &crowded, |b, crowded| {
            let mut i = 0u64;
            b.iter(|| {
                i += 1;
                let key = format!("K{i}");
                crowded.store(&key, i);
                black_box(rt.block_on(crowded.find(&key, Duration::ZERO)))
            })
        });
    }

    group.finish();
}

// ============================================================================
// Selective Channel
// ============================================================================

fn bench_selective_channel(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("selective-channel");
    group.measurement_time(Duration::from_secs(5));

    for depth in [10usize, 100, 1000] {
        let channel = SelectiveChannel::new("bench");
        let mut rng = rand::thread_rng();
        for _ in 0..depth {
            let noise: u32 = rng.gen();
            channel
                .send(Message::new("noise").with_header("op", format!("noise-{noise}")))
                .unwrap();
        }
        let selector = HeaderSelector::new().with("op", "wanted");

        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::new("select_last", depth), &depth, |b, _| {
            b.iter(|| {
                channel
                    .send(Message::new("target").with_header("op", "wanted"))
                    .unwrap();
                let found = rt.block_on(channel.receive_selective(|m| selector.matches(m), Duration::ZERO));
                black_box(found.is_ok())
            })
        });
    }

    group.finish();
}

// ============================================================================
// Event Future
// ============================================================================

fn bench_event_future(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("event-future");

    let future = EventFuture::new("bench");
    future.try_set(42u64);

    group.bench_function("cached_get", |b| {
        b.iter(|| black_box(rt.block_on(future.get(Duration::ZERO))))
    });

    group.bench_function("losing_write", |b| b.iter(|| black_box(future.try_set(7))));

    group.finish();
}

criterion_group!(
    benches,
    bench_correlation_store,
    bench_selective_channel,
    bench_event_future,
);

criterion_main!(benches);
