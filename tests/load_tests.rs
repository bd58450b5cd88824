#[cfg(test)]
mod tests {
    use crossbeam::channel;
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        thread,
        time::{Duration, Instant},
    };
    use work_coordinator::{
        errors::Abandoned, BoxError, Config, HandleRegistry, NoTransactionManager, SubmitOptions,
        ThreadPoolManager, WorkEventKind, WorkItem, WorkManager,
    };

    fn measure<T>(name: &str, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let result = f();
        println!("✓ {}: {:?}", name, start.elapsed());
        result
    }

    #[test]
    fn load_test_1_concurrent_do_work() {
        println!("\n=== LOAD TEST 1: 8 producers x 500 do_work ===");
        let pools = ThreadPoolManager::with_default("default", Config::io_bound()).unwrap();
        let manager = Arc::new(WorkManager::builder("load", pools).build().unwrap());
        let counter = Arc::new(AtomicUsize::new(0));

        measure("4k blocking submissions", || {
            let producers: Vec<_> = (0..8)
                .map(|_| {
                    let manager = manager.clone();
                    let counter = counter.clone();
                    thread::spawn(move || {
                        for _ in 0..500 {
                            let c = counter.clone();
                            manager
                                .do_work(WorkItem::new(move || {
                                    c.fetch_add(1, Ordering::Relaxed);
                                    Ok(())
                                }))
                                .unwrap();
                        }
                    })
                })
                .collect();
            for p in producers {
                p.join().unwrap();
            }
        });

        assert_eq!(counter.load(Ordering::Relaxed), 4_000);
        let stats = manager.stats().unwrap();
        assert_eq!(stats.submitted, 4_000);
        assert_eq!(stats.completed, 4_000);
        assert_eq!(stats.dequeued, 4_000);
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.in_progress, 0);
        println!("  mean wait: {:?}, max wait: {:?}", stats.mean_wait(), stats.max_wait);
    }

    #[test]
    fn load_test_2_mixed_wait_modes() {
        println!("\n=== LOAD TEST 2: mixed wait modes ===");
        let pools = ThreadPoolManager::with_default("default", Config::io_bound()).unwrap();
        let manager = WorkManager::builder("mixed", pools).build().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        measure("3k mixed submissions", || {
            for i in 0..3_000 {
                let c = counter.clone();
                let work = WorkItem::new(move || {
                    c.fetch_add(1, Ordering::Relaxed);
                    Ok(())
                });
                match i % 3 {
                    0 => manager.do_work(work).unwrap(),
                    1 => {
                        manager.start_work(work).unwrap();
                    }
                    _ => manager.schedule_work(work).unwrap(),
                }
            }
        });

        assert!(manager.pool().wait_idle(Duration::from_secs(10)));
        assert_eq!(counter.load(Ordering::Relaxed), 3_000);
        let metrics = manager.pool().metrics();
        println!("  Completed: {}", metrics.completed_tasks);
        println!("  Success rate: {:.1}%", metrics.success_rate() * 100.0);
    }

    #[test]
    fn load_test_3_failures_under_load() {
        println!("\n=== LOAD TEST 3: every other body fails ===");
        let pools = ThreadPoolManager::with_default("default", Config::with_threads(4).max_pending(None)).unwrap();
        let manager = Arc::new(WorkManager::builder("failing", pools).build().unwrap());

        let failures: usize = (0..4)
            .map(|_| {
                let manager = manager.clone();
                thread::spawn(move || {
                    (0..250)
                        .filter(|i| {
                            let fail = i % 2 == 0;
                            manager
                                .do_work(WorkItem::new(move || {
                                    if fail {
                                        Err("odd one out".into())
                                    } else {
                                        Ok::<(), BoxError>(())
                                    }
                                }))
                                .is_err()
                        })
                        .count()
                })
            })
            .collect::<Vec<_>>()
            .into_iter()
            .map(|h| h.join().unwrap())
            .sum();

        assert_eq!(failures, 500);
        assert_eq!(manager.stats().unwrap().completed, 1_000);
    }

    #[test]
    fn load_test_4_shutdown_settles_every_submission() {
        println!("\n=== LOAD TEST 4: shutdown with queued work ===");
        let pools = ThreadPoolManager::with_default("default", Config::with_threads(1).max_pending(None)).unwrap();
        let manager = WorkManager::builder("shutdown", pools.clone()).build().unwrap();
        let (tx, rx) = channel::unbounded();
        let options = SubmitOptions::new().listener(Arc::new(tx));

        let (release_tx, release_rx) = channel::bounded::<()>(1);
        manager
            .schedule_work(WorkItem::new(move || {
                let _ = release_rx.recv_timeout(Duration::from_millis(100));
                Ok(())
            }))
            .unwrap();

        for _ in 0..100 {
            manager
                .schedule_work_with(WorkItem::new(|| Ok(())), options.clone())
                .unwrap();
        }
        drop(release_tx);
        pools.shutdown_all();
        drop(options);

        let mut terminal: HashMap<u64, Vec<WorkEventKind>> = HashMap::new();
        for event in rx.try_iter() {
            if matches!(event.kind, WorkEventKind::Completed | WorkEventKind::Rejected) {
                if event.kind == WorkEventKind::Rejected {
                    let error = event.error.as_ref().unwrap();
                    assert!(error.cause_as::<Abandoned>().is_some());
                }
                terminal.entry(event.work_id).or_default().push(event.kind);
            }
        }
        assert_eq!(terminal.len(), 100);
        assert!(terminal.values().all(|kinds| kinds.len() == 1));
        println!(
            "  completed before shutdown: {}",
            terminal.values().filter(|k| k[0] == WorkEventKind::Completed).count()
        );

        let err = manager.schedule_work(WorkItem::new(|| Ok(()))).unwrap_err();
        assert!(err.is_rejected());
    }

    #[test]
    fn load_test_5_registry_under_contention() {
        println!("\n=== LOAD TEST 5: registry lookups from many threads ===");
        let pools = ThreadPoolManager::with_default("default", Config::io_bound()).unwrap();
        let registry = HandleRegistry::new(pools, Arc::new(NoTransactionManager));
        let counter = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..16)
            .map(|i| {
                let registry = registry.clone();
                let counter = counter.clone();
                thread::spawn(move || {
                    let owner = format!("owner-{}", i % 4);
                    for _ in 0..100 {
                        let c = counter.clone();
                        registry
                            .get(&owner)
                            .unwrap()
                            .do_work(WorkItem::new(move || {
                                c.fetch_add(1, Ordering::Relaxed);
                                Ok(())
                            }))
                            .unwrap();
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        assert_eq!(counter.load(Ordering::Relaxed), 1_600);
        assert_eq!(registry.len(), 4);
        let mut names = registry.monitoring().names();
        names.sort();
        assert_eq!(
            names,
            vec![
                "work-management/owner-0",
                "work-management/owner-1",
                "work-management/owner-2",
                "work-management/owner-3",
            ]
        );
    }
}
