use super::{
    errors::{EnqueueError, PanicError},
    model::PoolMetrics,
};
use crossbeam::{
    deque::{Injector, Steal, Stealer, Worker},
    sync::{Parker, Unparker},
};
use serde::Deserialize;
use std::{
    fmt,
    io,
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{fence, AtomicBool, AtomicUsize, Ordering},
        Arc, Condvar, Mutex,
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};


pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A task the pool refused, handed back to the caller together with the
/// reason.
#[derive(Error)]
#[error("{reason}")]
pub struct Rejected {
    reason: EnqueueError,
    task: Task,
}

impl Rejected {
    #[inline]
    pub fn reason(&self) -> &EnqueueError {
        &self.reason
    }

    pub fn into_parts(self) -> (EnqueueError, Task) {
        (self.reason, self.task)
    }
}

impl fmt::Debug for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("reason", &self.reason)
            .finish_non_exhaustive()
    }
}

/// Upper bound on how long an idle worker sleeps before re-polling the queues.
const IDLE_PARK: Duration = Duration::from_millis(50);

/// Thread pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub num_threads: usize,
    /// Maximum number of queued, not yet running tasks. `None` is unbounded.
    pub max_pending: Option<usize>,
    pub enable_work_stealing: bool,
    pub thread_name_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            num_threads: num_cpus * 2,
            max_pending: Some(num_cpus * 20),
            enable_work_stealing: true,
            thread_name_prefix: "work".to_string(),
        }
    }
}

impl Config {
    pub fn cpu_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            num_threads: num_cpus,
            max_pending: Some(num_cpus * 10),
            ..Default::default()
        }
    }

    pub fn io_bound() -> Self {
        let num_cpus = num_cpus::get();
        Self {
            num_threads: num_cpus * 2,
            max_pending: None,
            ..Default::default()
        }
    }

    pub fn with_threads(num_threads: usize) -> Self {
        Self {
            num_threads,
            ..Default::default()
        }
    }

    pub fn max_pending(mut self, max_pending: Option<usize>) -> Self {
        self.max_pending = max_pending;
        self
    }
}

#[inline(always)]
fn unlikely(b: bool) -> bool {
    #[cold]
    fn cold() {}
    if !b { cold() }
    b
}

struct Shared {
    name: String,
    inject: Injector<Task>,
    stealers: Vec<Stealer<Task>>,
    unparkers: Vec<Unparker>,
    sleeping: Vec<AtomicBool>,
    next_wake: AtomicUsize,
    cancellation_token: CancellationToken,
    active_tasks: AtomicUsize,
    idle_workers: AtomicUsize,
    queued_tasks: AtomicUsize,
    total_enqueued: AtomicUsize,
    completed_tasks: AtomicUsize,
    failed_tasks: AtomicUsize,
    rejected_tasks: AtomicUsize,
    quiet: Mutex<()>,
    quiet_signal: Condvar,
    config: Config,
}

/// Bounded work-stealing pool of OS threads.
///
/// Tasks enter through a shared injector; each worker drains batches of it
/// into a local FIFO deque and, when enabled, steals from its siblings.
pub struct ThreadPool {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool").field("name", &self.shared.name).finish_non_exhaustive()
    }
}

impl ThreadPool {
    pub fn new(name: impl Into<String>, num_threads: usize, max_pending: Option<usize>) -> io::Result<Arc<Self>> {
        let config = Config {
            num_threads,
            max_pending,
            ..Default::default()
        };
        Self::with_config(name, config)
    }

    pub fn with_config(name: impl Into<String>, config: Config) -> io::Result<Arc<Self>> {
        let name = name.into();
        let num_threads = config.num_threads.max(1);

        let mut workers = Vec::with_capacity(num_threads);
        let mut stealers = Vec::with_capacity(num_threads);
        let mut parkers = Vec::with_capacity(num_threads);
        let mut unparkers = Vec::with_capacity(num_threads);

        for _ in 0..num_threads {
            let w = Worker::new_fifo();
            stealers.push(w.stealer());
            workers.push(w);
            let parker = Parker::new();
            unparkers.push(parker.unparker().clone());
            parkers.push(parker);
        }

        let shared = Arc::new(Shared {
            name: name.clone(),
            inject: Injector::new(),
            stealers,
            unparkers,
            sleeping: (0..num_threads).map(|_| AtomicBool::new(false)).collect(),
            next_wake: AtomicUsize::new(0),
            cancellation_token: CancellationToken::new(),
            active_tasks: AtomicUsize::new(0),
            idle_workers: AtomicUsize::new(0),
            queued_tasks: AtomicUsize::new(0),
            total_enqueued: AtomicUsize::new(0),
            completed_tasks: AtomicUsize::new(0),
            failed_tasks: AtomicUsize::new(0),
            rejected_tasks: AtomicUsize::new(0),
            quiet: Mutex::new(()),
            quiet_signal: Condvar::new(),
            config,
        });

        let mut threads = Vec::with_capacity(num_threads);
        for (index, (local, parker)) in workers.into_iter().zip(parkers).enumerate() {
            let shared_clone = Arc::clone(&shared);
            let spawned = thread::Builder::new()
                .name(format!("{}-{}-{}", shared.config.thread_name_prefix, name, index))
                .spawn(move || shared_clone.worker_loop(index, local, parker));
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    shared.stop();
                    for handle in threads {
                        let _ = handle.join();
                    }
                    return Err(e);
                }
            }
        }

        info!(pool = %name, threads = num_threads, max_pending = ?shared.config.max_pending, "thread pool started");

        Ok(Arc::new(Self {
            shared,
            threads: Mutex::new(threads),
        }))
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.shared.config
    }

    /// Queues `task` for execution. Fails when the pool is shut down or the
    /// pending bound is reached; the task comes back inside the error.
    pub fn execute(&self, task: Task) -> Result<(), Rejected> {
        let shared = &self.shared;
        if unlikely(shared.cancellation_token.is_cancelled()) {
            shared.rejected_tasks.fetch_add(1, Ordering::Relaxed);
            return Err(Rejected {
                reason: EnqueueError::ShutDown(shared.name.clone()),
                task,
            });
        }

        match shared.config.max_pending {
            Some(max) => {
                let reserved = shared.queued_tasks.fetch_update(Ordering::AcqRel, Ordering::Acquire, |q| {
                    (q < max).then_some(q + 1)
                });
                if let Err(pending) = reserved {
                    shared.rejected_tasks.fetch_add(1, Ordering::Relaxed);
                    return Err(Rejected {
                        reason: EnqueueError::Saturated {
                            pool: shared.name.clone(),
                            pending,
                        },
                        task,
                    });
                }
            }
            None => {
                shared.queued_tasks.fetch_add(1, Ordering::AcqRel);
            }
        }

        shared.total_enqueued.fetch_add(1, Ordering::Relaxed);
        shared.inject.push(task);
        fence(Ordering::SeqCst);
        shared.wake_one();
        Ok(())
    }

    #[inline]
    pub fn metrics(&self) -> PoolMetrics {
        let shared = &self.shared;
        PoolMetrics {
            active_tasks: shared.active_tasks.load(Ordering::Relaxed),
            idle_workers: shared.idle_workers.load(Ordering::Relaxed),
            queued_tasks: shared.queued_tasks.load(Ordering::Relaxed),
            total_enqueued: shared.total_enqueued.load(Ordering::Relaxed),
            completed_tasks: shared.completed_tasks.load(Ordering::Relaxed),
            failed_tasks: shared.failed_tasks.load(Ordering::Relaxed),
            rejected_tasks: shared.rejected_tasks.load(Ordering::Relaxed),
        }
    }

    #[inline]
    pub fn is_shut_down(&self) -> bool {
        self.shared.cancellation_token.is_cancelled()
    }

    /// Blocks until nothing is queued or running, or `timeout` passes.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let shared = &self.shared;
        let deadline = Instant::now() + timeout;
        let mut guard = shared.quiet.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if shared.is_quiet() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            guard = match shared.quiet_signal.wait_timeout(guard, deadline - now) {
                Ok((g, _)) => g,
                Err(e) => e.into_inner().0,
            };
        }
    }

    /// Stops accepting work and joins the workers. Tasks still queued are
    /// dropped without running.
    pub fn shutdown(&self) {
        self.shared.stop();
        let threads = {
            let mut guard = self.threads.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        let current = thread::current().id();
        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!(pool = %self.shared.name, "worker thread exited abnormally");
            }
        }
        let dropped = self.shared.drain();
        info!(pool = %self.shared.name, dropped, "thread pool shut down");
    }

    /// Waits up to `timeout` for queued work to finish, then shuts down.
    /// Returns false when work was still outstanding.
    pub fn shutdown_timeout(&self, timeout: Duration) -> bool {
        let drained = self.wait_idle(timeout);
        self.shutdown();
        drained
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        if !self.shared.cancellation_token.is_cancelled() {
            self.shutdown();
        }
    }
}

impl Shared {
    fn stop(&self) {
        self.cancellation_token.cancel();
        for unparker in &self.unparkers {
            unparker.unpark();
        }
    }

    fn drain(&self) -> usize {
        let mut dropped = 0;
        loop {
            match self.inject.steal() {
                Steal::Success(_) => dropped += 1,
                Steal::Retry => continue,
                Steal::Empty => break,
            }
        }
        for stealer in &self.stealers {
            loop {
                match stealer.steal() {
                    Steal::Success(_) => dropped += 1,
                    Steal::Retry => continue,
                    Steal::Empty => break,
                }
            }
        }
        if dropped > 0 {
            let _ = self.queued_tasks.fetch_update(Ordering::AcqRel, Ordering::Acquire, |q| {
                Some(q.saturating_sub(dropped))
            });
        }
        dropped
    }

    #[inline]
    fn is_quiet(&self) -> bool {
        self.queued_tasks.load(Ordering::Acquire) == 0 && self.active_tasks.load(Ordering::Acquire) == 0
    }

    fn wake_one(&self) {
        let n = self.sleeping.len();
        let start = self.next_wake.fetch_add(1, Ordering::Relaxed);
        for offset in 0..n {
            let idx = (start + offset) % n;
            if self.sleeping[idx].swap(false, Ordering::SeqCst) {
                self.unparkers[idx].unpark();
                return;
            }
        }
    }

    fn worker_loop(&self, index: usize, local: Worker<Task>, parker: Parker) {
        let mut fast_random_state = (index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15);
        debug!(pool = %self.name, worker = index, "worker started");

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            if let Some(task) = self.find_task(index, &local, &mut fast_random_state) {
                self.run_task(task);
                continue;
            }

            self.idle_workers.fetch_add(1, Ordering::AcqRel);
            self.sleeping[index].store(true, Ordering::SeqCst);
            fence(Ordering::SeqCst);

            let has_work = !local.is_empty() || !self.inject.is_empty();
            if !has_work && !self.cancellation_token.is_cancelled() {
                parker.park_timeout(IDLE_PARK);
            }

            self.sleeping[index].store(false, Ordering::SeqCst);
            self.idle_workers.fetch_sub(1, Ordering::AcqRel);
        }

        debug!(pool = %self.name, worker = index, "worker stopped");
    }

    fn find_task(&self, index: usize, local: &Worker<Task>, rng: &mut u64) -> Option<Task> {
        local
            .pop()
            .or_else(|| loop {
                let stolen = if self.config.enable_work_stealing {
                    self.inject.steal_batch_and_pop(local)
                } else {
                    self.inject.steal()
                };
                match stolen {
                    Steal::Success(task) => break Some(task),
                    Steal::Empty => break None,
                    Steal::Retry => continue,
                }
            })
            .or_else(|| {
                let num_stealers = self.stealers.len();
                if !self.config.enable_work_stealing || num_stealers < 2 {
                    return None;
                }

                *rng ^= *rng << 13;
                *rng ^= *rng >> 7;
                *rng ^= *rng << 17;
                let offset = 1 + (*rng as usize) % (num_stealers - 1);
                let victim = (index + offset) % num_stealers;

                self.stealers[victim].steal().success()
            })
    }

    fn run_task(&self, task: Task) {
        self.active_tasks.fetch_add(1, Ordering::AcqRel);
        self.queued_tasks.fetch_sub(1, Ordering::AcqRel);

        match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(()) => {
                self.completed_tasks.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                self.failed_tasks.fetch_add(1, Ordering::Relaxed);
                let panic = PanicError::from_payload(payload);
                warn!(pool = %self.name, %panic, "task panicked");
            }
        }

        let prev = self.active_tasks.fetch_sub(1, Ordering::AcqRel);
        if unlikely(prev == 1) && self.is_quiet() {
            let _guard = self.quiet.lock().unwrap_or_else(|e| e.into_inner());
            self.quiet_signal.notify_all();
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel;

    #[test]
    fn runs_submitted_tasks() {
        let pool = ThreadPool::new("runs", 4, None).unwrap();
        let (tx, rx) = channel::unbounded();
        for i in 0..32 {
            let tx = tx.clone();
            pool.execute(Box::new(move || tx.send(i).unwrap())).unwrap();
        }
        let mut seen: Vec<i32> = (0..32).map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..32).collect::<Vec<_>>());
        assert!(pool.wait_idle(Duration::from_secs(5)));
        assert_eq!(pool.metrics().completed_tasks, 32);
    }

    #[test]
    fn rejects_when_saturated() {
        let pool = ThreadPool::new("saturated", 1, Some(1)).unwrap();
        let (started_tx, started_rx) = channel::bounded(1);
        let (release_tx, release_rx) = channel::bounded::<()>(1);

        pool.execute(Box::new(move || {
            started_tx.send(()).unwrap();
            let _ = release_rx.recv();
        }))
        .unwrap();
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        pool.execute(Box::new(|| {})).unwrap();
        let err = pool.execute(Box::new(|| {})).unwrap_err();
        assert_eq!(
            err.reason(),
            &EnqueueError::Saturated {
                pool: "saturated".into(),
                pending: 1
            }
        );
        assert_eq!(pool.metrics().rejected_tasks, 1);

        release_tx.send(()).unwrap();
        assert!(pool.wait_idle(Duration::from_secs(5)));
    }

    #[test]
    fn shutdown_timeout_reports_outstanding_work() {
        let pool = ThreadPool::new("drain", 1, None).unwrap();
        let (release_tx, release_rx) = channel::bounded::<()>(1);
        pool.execute(Box::new(move || {
            let _ = release_rx.recv_timeout(Duration::from_secs(5));
        }))
        .unwrap();

        let releaser = thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            let _ = release_tx.send(());
        });
        assert!(!pool.shutdown_timeout(Duration::from_millis(10)));
        assert!(pool.is_shut_down());
        releaser.join().unwrap();

        let idle = ThreadPool::new("idle", 1, None).unwrap();
        assert!(idle.shutdown_timeout(Duration::from_secs(1)));
    }

    #[test]
    fn shut_down_pool_rejects_work() {
        let pool = ThreadPool::new("closed", 2, None).unwrap();
        pool.shutdown();
        assert!(pool.is_shut_down());
        assert_eq!(
            pool.execute(Box::new(|| {})).unwrap_err().reason(),
            &EnqueueError::ShutDown("closed".into())
        );
    }

    #[test]
    fn panicking_task_does_not_kill_the_worker() {
        let pool = ThreadPool::new("panics", 1, None).unwrap();
        pool.execute(Box::new(|| panic!("task failure"))).unwrap();
        let (tx, rx) = channel::bounded(1);
        pool.execute(Box::new(move || tx.send(7).unwrap())).unwrap();
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 7);
        assert!(pool.wait_idle(Duration::from_secs(5)));
        let metrics = pool.metrics();
        assert_eq!(metrics.failed_tasks, 1);
        assert_eq!(metrics.completed_tasks, 1);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: Config = serde_json::from_str(r#"{ "num_threads": 3, "max_pending": null }"#).unwrap();
        assert_eq!(config.num_threads, 3);
        assert_eq!(config.max_pending, None);
        assert!(config.enable_work_stealing);
        assert_eq!(config.thread_name_prefix, "work");
    }
}
