use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::{hint::black_box, sync::Arc};
use work_coordinator::{Config, SubmitOptions, ThreadPoolManager, WorkItem, WorkManager};

fn manager(config: Config) -> Arc<WorkManager> {
    let pools = ThreadPoolManager::with_default("bench", config).unwrap();
    Arc::new(WorkManager::builder("bench", pools).build().unwrap())
}

// Benchmark 1: round trip of a blocking submission
fn bench_do_work(c: &mut Criterion) {
    let mut group = c.benchmark_group("do_work");
    let manager = manager(Config::cpu_bound());

    group.bench_function("empty_body", |b| {
        b.iter(|| manager.do_work(WorkItem::new(|| Ok(()))).unwrap());
    });

    group.bench_function("start_work", |b| {
        b.iter(|| black_box(manager.start_work(WorkItem::new(|| Ok(()))).unwrap()));
    });

    group.finish();
}

// Benchmark 2: fire-and-forget throughput
fn bench_schedule_work(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule_work");

    for size in [100, 1000, 10000] {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("io_bound", size), &size, |b, &size| {
            let manager = manager(Config::io_bound());
            b.iter(|| {
                for i in 0..size {
                    manager
                        .schedule_work(WorkItem::new(move || {
                            black_box(i);
                            Ok(())
                        }))
                        .unwrap();
                }
                manager.pool().wait_idle(std::time::Duration::from_secs(30));
            });
        });
    }

    group.finish();
}

// Benchmark 3: awaiting completion handles
fn bench_handles(c: &mut Criterion) {
    let mut group = c.benchmark_group("handles");
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();

    for size in [100, 1000] {
        group.throughput(Throughput::Elements(size as u64));

        group.bench_with_input(BenchmarkId::new("await_all", size), &size, |b, &size| {
            let manager = manager(Config::io_bound());
            b.to_async(&rt).iter(|| {
                let manager = &manager;
                async move {
                    let handles: Vec<_> = (0..size)
                        .map(|_| {
                            manager
                                .schedule_work_with_handle(WorkItem::new(|| Ok(())), SubmitOptions::new())
                                .unwrap()
                        })
                        .collect();
                    for handle in handles {
                        handle.await.unwrap();
                    }
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_do_work, bench_schedule_work, bench_handles);
criterion_main!(benches);
