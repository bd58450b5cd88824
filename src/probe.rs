//! Statistics hooks for work submissions.

use super::model::WorkStatsSnapshot;
use dashmap::DashMap;
use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};
use tracing::debug;


/// Callbacks fired by the coordinator as a submission moves along. Every
/// method defaults to a no-op.
pub trait WorkProbe: Send + Sync {
    fn work_submitted(&self) {}
    fn work_queued(&self) {}
    fn work_waited_for(&self, _elapsed: Duration) {}
    fn work_dequeued(&self) {}
    fn work_processing_started(&self) {}
    fn work_processing_completed(&self) {}
    fn work_processed(&self) {}
    fn work_timed_out(&self) {}
    fn work_rejected(&self) {}
}

/// Counter-backed [`WorkProbe`].
#[derive(Debug, Default)]
pub struct WorkStats {
    submitted: AtomicU64,
    queued: AtomicU64,
    dequeued: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
    in_progress: AtomicU64,
    completed: AtomicU64,
    waits: AtomicU64,
    total_wait_nanos: AtomicU64,
    max_wait_nanos: AtomicU64,
}

impl WorkStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn snapshot(&self) -> WorkStatsSnapshot {
        WorkStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            queued: self.queued.load(Ordering::Relaxed),
            dequeued: self.dequeued.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            in_progress: self.in_progress.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            waits: self.waits.load(Ordering::Relaxed),
            total_wait: Duration::from_nanos(self.total_wait_nanos.load(Ordering::Relaxed)),
            max_wait: Duration::from_nanos(self.max_wait_nanos.load(Ordering::Relaxed)),
        }
    }
}

// Gauges are decremented with a saturating update so a stray callback can't
// wrap them around.
fn decrement(gauge: &AtomicU64) {
    let _ = gauge.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
}

impl WorkProbe for WorkStats {
    fn work_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn work_queued(&self) {
        self.queued.fetch_add(1, Ordering::Relaxed);
    }

    fn work_waited_for(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.waits.fetch_add(1, Ordering::Relaxed);
        self.total_wait_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.max_wait_nanos.fetch_max(nanos, Ordering::Relaxed);
    }

    fn work_dequeued(&self) {
        decrement(&self.queued);
        self.dequeued.fetch_add(1, Ordering::Relaxed);
    }

    fn work_processing_started(&self) {
        self.in_progress.fetch_add(1, Ordering::Relaxed);
    }

    fn work_processing_completed(&self) {
        decrement(&self.in_progress);
    }

    fn work_processed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    fn work_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    fn work_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }
}

/// Shared directory of live statistics, keyed by dotted monitoring name.
#[derive(Debug, Default)]
pub struct MonitoringRegistry {
    entries: DashMap<String, Arc<WorkStats>>,
}

impl MonitoringRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn monitoring_name(owner: &str) -> String {
        format!("work-management/{owner}")
    }

    pub fn register(&self, name: &str, stats: Arc<WorkStats>) {
        self.entries.insert(name.to_string(), stats);
        debug!(name, "registered work statistics");
    }

    pub fn deregister(&self, name: &str) -> bool {
        let removed = self.entries.remove(name).is_some();
        if removed {
            debug!(name, "deregistered work statistics");
        }
        removed
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkStats>> {
        self.entries.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
