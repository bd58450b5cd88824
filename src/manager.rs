//! Public submission surface.
//!
//! A [`WorkManager`] belongs to one owner (the component submitting work),
//! is bound to one thread pool for its whole life and offers the three
//! blocking disciplines: [`do_work`](WorkManager::do_work) waits for
//! completion, [`start_work`](WorkManager::start_work) waits for the start
//! and [`schedule_work`](WorkManager::schedule_work) returns right after
//! queueing.

use super::{
    context,
    coordinator::{Submission, WorkCoordinator},
    errors::{ConfigError, ConflictingContext, ErrorCode, WorkError},
    handle::{CompletionRelay, WorkHandle},
    model::{WaitMode, WorkStatsSnapshot},
    pool::ThreadPool,
    pool_manager::ThreadPoolManager,
    probe::{MonitoringRegistry, WorkProbe, WorkStats},
    transaction::{NoTransactionManager, TransactionManager},
    work::{SubmitOptions, Work},
    wrapper::ExecutionWrapper,
};
use serde::Deserialize;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::{debug, error, info, warn};


#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct WorkManagerConfig {
    /// Pool to submit to. `None` or empty selects the default pool.
    pub thread_pool_id: Option<String>,
    /// Collect statistics and publish them in the monitoring registry.
    pub monitoring: bool,
}

impl Default for WorkManagerConfig {
    fn default() -> Self {
        Self {
            thread_pool_id: None,
            monitoring: true,
        }
    }
}

pub struct WorkManagerBuilder {
    owner: String,
    config: WorkManagerConfig,
    pools: Arc<ThreadPoolManager>,
    tx_manager: Arc<dyn TransactionManager>,
    monitoring: Option<Arc<MonitoringRegistry>>,
}

impl WorkManagerBuilder {
    pub fn config(mut self, config: WorkManagerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn thread_pool_id(mut self, id: impl Into<String>) -> Self {
        self.config.thread_pool_id = Some(id.into());
        self
    }

    pub fn transaction_manager(mut self, tx_manager: Arc<dyn TransactionManager>) -> Self {
        self.tx_manager = tx_manager;
        self
    }

    pub fn monitoring_registry(mut self, registry: Arc<MonitoringRegistry>) -> Self {
        self.monitoring = Some(registry);
        self
    }

    /// Resolves the thread pool once. A pool that cannot be found is a
    /// configuration error for this manager.
    pub fn build(self) -> Result<WorkManager, ConfigError> {
        let pool = self
            .pools
            .resolve(self.config.thread_pool_id.as_deref(), &self.owner)
            .inspect_err(|e| error!(owner = %self.owner, error = %e, "failed to resolve thread pool"))?;
        debug!(owner = %self.owner, pool = %pool.name(), "resolved thread pool");

        let stats = self.config.monitoring.then(WorkStats::new);
        let registration = match (&stats, self.monitoring) {
            (Some(stats), Some(registry)) => {
                let name = MonitoringRegistry::monitoring_name(&self.owner);
                registry.register(&name, Arc::clone(stats));
                Some((registry, name))
            }
            _ => None,
        };

        info!(owner = %self.owner, pool = %pool.name(), monitoring = stats.is_some(), "work manager created");

        Ok(WorkManager {
            owner: Arc::from(self.owner),
            pool,
            tx_manager: self.tx_manager,
            stats,
            registration,
            cleaned_up: AtomicBool::new(false),
        })
    }
}

pub struct WorkManager {
    owner: Arc<str>,
    pool: Arc<ThreadPool>,
    tx_manager: Arc<dyn TransactionManager>,
    stats: Option<Arc<WorkStats>>,
    registration: Option<(Arc<MonitoringRegistry>, String)>,
    cleaned_up: AtomicBool,
}

impl WorkManager {
    pub fn builder(owner: impl Into<String>, pools: Arc<ThreadPoolManager>) -> WorkManagerBuilder {
        WorkManagerBuilder {
            owner: owner.into(),
            config: WorkManagerConfig::default(),
            pools,
            tx_manager: Arc::new(NoTransactionManager),
            monitoring: None,
        }
    }

    #[inline]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    #[inline]
    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }

    pub fn stats(&self) -> Option<WorkStatsSnapshot> {
        self.stats.as_ref().map(|s| s.snapshot())
    }

    /// Runs `work` on the pool and blocks until it finished.
    pub fn do_work(&self, work: impl Work) -> Result<(), WorkError> {
        self.do_work_with(work, SubmitOptions::default())
    }

    pub fn do_work_with(&self, work: impl Work, options: SubmitOptions) -> Result<(), WorkError> {
        self.submit(Box::new(work), options, WaitMode::WaitUntilFinish)
            .map(|_| ())
    }

    /// Queues `work` and blocks until it started. Returns how long that took.
    pub fn start_work(&self, work: impl Work) -> Result<Duration, WorkError> {
        self.start_work_with(work, SubmitOptions::default())
    }

    pub fn start_work_with(&self, work: impl Work, options: SubmitOptions) -> Result<Duration, WorkError> {
        let accepted_at = Instant::now();
        self.submit(Box::new(work), options, WaitMode::WaitUntilStart)?;
        Ok(accepted_at.elapsed())
    }

    /// Queues `work` and returns. Only a refusal to queue is reported here;
    /// everything later is visible through the listener alone.
    pub fn schedule_work(&self, work: impl Work) -> Result<(), WorkError> {
        self.schedule_work_with(work, SubmitOptions::default())
    }

    pub fn schedule_work_with(&self, work: impl Work, options: SubmitOptions) -> Result<(), WorkError> {
        self.submit(Box::new(work), options, WaitMode::NoWait)
            .map(|_| ())
    }

    /// Like [`schedule_work_with`](Self::schedule_work_with), but hands back a
    /// future for the final outcome.
    pub fn schedule_work_with_handle(&self, work: impl Work, options: SubmitOptions) -> Result<WorkHandle, WorkError> {
        let (relay, receiver) = CompletionRelay::new(options.listener.clone());
        let options = SubmitOptions {
            listener: Some(relay),
            ..options
        };
        let coordinator = self.submit(Box::new(work), options, WaitMode::NoWait)?;
        Ok(WorkHandle::new(coordinator.id(), receiver))
    }

    fn probe(&self) -> Option<Arc<dyn WorkProbe>> {
        self.stats.as_ref().map(|s| Arc::clone(s) as Arc<dyn WorkProbe>)
    }

    fn submit(&self, work: Box<dyn Work>, options: SubmitOptions, mode: WaitMode) -> Result<Arc<WorkCoordinator>, WorkError> {
        let context = match (options.context, work.execution_context()) {
            (Some(_), Some(_)) => {
                warn!(owner = %self.owner, "rejecting work with two execution contexts");
                return Err(WorkError::rejected(ErrorCode::Undefined, ConflictingContext));
            }
            (given, declared) => given.or(declared),
        };

        let coordinator = WorkCoordinator::new(Submission {
            mode,
            start_timeout: options.start_timeout,
            context,
            listener: options.listener,
            work_name: work.name().map(Arc::from),
            owner: Arc::clone(&self.owner),
            probe: self.probe(),
            tx_manager: Arc::clone(&self.tx_manager),
        });
        debug!(owner = %self.owner, work = %coordinator, %mode, "submit start");

        coordinator.accept();
        let wrapper = ExecutionWrapper::new(work, Arc::clone(&coordinator), context::current_loader());

        if let Err(rejected) = self.pool.execute(wrapper.into_task()) {
            let (reason, task) = rejected.into_parts();
            warn!(owner = %self.owner, work = %coordinator, %reason, "thread pool refused work");
            coordinator.reject_enqueue(reason);
            drop(task);
            return Err(coordinator.error().unwrap_or_else(WorkError::start_timed_out));
        }

        coordinator.lock();

        let failure = match (mode, coordinator.error()) {
            (WaitMode::NoWait, _) => None,
            // Failures after the start belong to the listener.
            (WaitMode::WaitUntilStart, Some(e)) if !e.is_rejected() => None,
            (_, failure) => failure,
        };
        debug!(owner = %self.owner, work = %coordinator, failed = failure.is_some(), "submit end");

        match failure {
            Some(e) => Err(e),
            None => Ok(coordinator),
        }
    }

    /// Withdraws this manager's statistics from monitoring. Idempotent.
    pub fn cleanup(&self) {
        if self.cleaned_up.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some((registry, name)) = &self.registration {
            registry.deregister(name);
        }
        info!(owner = %self.owner, "work manager cleaned up");
    }
}

impl fmt::Debug for WorkManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkManager")
            .field("owner", &self.owner)
            .field("pool", &self.pool.name())
            .field("monitoring", &self.registration.as_ref().map(|(_, name)| name))
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::Config;

    fn pools() -> Arc<ThreadPoolManager> {
        let pools = ThreadPoolManager::with_default("default", Config::with_threads(2)).unwrap();
        pools.create_pool("batch", Config::with_threads(1)).unwrap();
        pools
    }

    #[test]
    fn binds_to_the_named_pool() {
        let manager = WorkManager::builder("ra", pools()).thread_pool_id("batch").build().unwrap();
        assert_eq!(manager.pool().name(), "batch");
    }

    #[test]
    fn unknown_pool_fails_construction() {
        let err = WorkManager::builder("ra", pools()).thread_pool_id("nope").build().unwrap_err();
        assert!(matches!(err, ConfigError::ThreadPoolNotFound { .. }));
    }

    #[test]
    fn registers_and_withdraws_statistics() {
        let registry = MonitoringRegistry::new();
        let manager = WorkManager::builder("ra", pools())
            .monitoring_registry(Arc::clone(&registry))
            .build()
            .unwrap();
        assert!(registry.get("work-management/ra").is_some());

        manager.cleanup();
        manager.cleanup();
        assert!(registry.is_empty());
    }

    #[test]
    fn monitoring_can_be_disabled() {
        let config = WorkManagerConfig {
            thread_pool_id: None,
            monitoring: false,
        };
        let manager = WorkManager::builder("quiet", pools()).config(config).build().unwrap();
        assert!(manager.stats().is_none());
    }
}
