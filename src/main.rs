use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::runtime::Builder;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use work_coordinator::{
    Config, HandleRegistry, NoTransactionManager, SubmitOptions, ThreadPoolManager, WorkItem,
};


fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let pools = ThreadPoolManager::with_default("default", Config::io_bound())?;
    let registry = HandleRegistry::new(pools.clone(), Arc::new(NoTransactionManager));
    registry.install();

    let manager = registry.get("demo")?;
    let counter = Arc::new(AtomicUsize::new(0));
    let now = Instant::now();

    let c = counter.clone();
    manager.do_work(WorkItem::new(move || {
        c.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }).named("do-work"))?;

    let c = counter.clone();
    let waited = manager.start_work(WorkItem::new(move || {
        c.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }))?;
    info!(?waited, "start_work returned");

    for _ in 0..10_000 {
        let c = counter.clone();
        manager.schedule_work(WorkItem::new(move || {
            c.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }))?;
    }

    let rt = Builder::new_current_thread()
        .enable_all()
        .build()?;

    let handle = manager.schedule_work_with_handle(
        WorkItem::new(|| Err("deliberate failure".into())).named("failing"),
        SubmitOptions::new().start_timeout(Duration::from_secs(1)),
    )?;
    if let Err(e) = rt.block_on(handle.await_timeout(Duration::from_secs(5))) {
        warn!(error = %e, "handle reported failure");
    }

    if !manager.pool().wait_idle(Duration::from_secs(10)) {
        warn!("pool did not drain in time");
    }
    info!(
        runs = counter.load(Ordering::Relaxed),
        elapsed = ?now.elapsed(),
        stats = ?manager.stats(),
        "demo finished"
    );

    registry.remove("demo");
    pools.shutdown_all();
    Ok(())
}
