use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use resync::common::Clock;
use resync::network::ActionQueue;
use resync::storage::SledQueueStore;
use resync::{processor_fn, EngineConfig, OverflowStrategy, SyncEngine};
use tempfile::TempDir;

fn bench_enqueue(c: &mut Criterion) {
    let mut group = c.benchmark_group("enqueue");
    let payload = br#"{"task_id":"t-42","done":true}"#.to_vec();

    group.bench_function("memory", |b| {
        let queue = ActionQueue::in_memory(Clock::new(1));
        b.iter(|| {
            queue
                .enqueue("task.complete".into(), black_box(payload.clone()))
                .unwrap()
        });
    });

    group.bench_function("sled", |b| {
        let temp_dir = TempDir::new().unwrap();
        let store = SledQueueStore::open(temp_dir.path()).unwrap();
        let queue = ActionQueue::open(
            Box::new(store),
            Clock::new(1),
            None,
            OverflowStrategy::RejectNew,
        )
        .unwrap();
        b.iter(|| {
            queue
                .enqueue("task.complete".into(), black_box(payload.clone()))
                .unwrap()
        });
    });

    group.finish();
}

fn bench_drain(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("drain");

    for size in [10usize, 100, 1000] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                rt.block_on(async {
                    let engine = SyncEngine::init(
                        EngineConfig::in_memory(),
                        processor_fn(|_| async { Ok(()) }),
                    )
                    .unwrap();
                    for _ in 0..size {
                        engine.enqueue("task.complete", Vec::new()).unwrap();
                    }
                    black_box(engine.drain().await)
                })
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_enqueue, bench_drain);
criterion_main!(benches);
