//! Owner-keyed cache of work managers.
//!
//! Every owner gets at most one live [`WorkManager`], created on first use
//! and reused until [`HandleRegistry::remove`] tears it down. A
//! [`WorkManagerProxy`] names a manager by owner only, so it can be
//! serialized and re-bound after deserialization through the process-wide
//! registry.

use super::{
    errors::{ConfigError, ErrorCode, WorkError},
    handle::WorkHandle,
    manager::{WorkManager, WorkManagerConfig},
    pool_manager::ThreadPoolManager,
    probe::MonitoringRegistry,
    transaction::TransactionManager,
    work::{SubmitOptions, Work},
};
use dashmap::{mapref::entry::Entry, DashMap};
use serde::{Deserialize, Serialize};
use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::{Arc, OnceLock},
    time::Duration,
};
use tracing::{debug, info};


static PROCESS_REGISTRY: OnceLock<Arc<HandleRegistry>> = OnceLock::new();

pub struct HandleRegistry {
    managers: DashMap<String, Arc<WorkManager>>,
    configs: DashMap<String, WorkManagerConfig>,
    pools: Arc<ThreadPoolManager>,
    tx_manager: Arc<dyn TransactionManager>,
    monitoring: Arc<MonitoringRegistry>,
}

impl HandleRegistry {
    pub fn new(pools: Arc<ThreadPoolManager>, tx_manager: Arc<dyn TransactionManager>) -> Arc<Self> {
        Arc::new(Self {
            managers: DashMap::new(),
            configs: DashMap::new(),
            pools,
            tx_manager,
            monitoring: MonitoringRegistry::new(),
        })
    }

    /// Makes this registry the one deserialized proxies bind to. Only the
    /// first call wins.
    pub fn install(self: &Arc<Self>) -> bool {
        let installed = PROCESS_REGISTRY.set(Arc::clone(self)).is_ok();
        if installed {
            info!("process-wide handle registry installed");
        }
        installed
    }

    pub fn process() -> Option<Arc<Self>> {
        PROCESS_REGISTRY.get().cloned()
    }

    pub fn monitoring(&self) -> &Arc<MonitoringRegistry> {
        &self.monitoring
    }

    pub fn thread_pools(&self) -> &Arc<ThreadPoolManager> {
        &self.pools
    }

    /// Sets the configuration used when `owner`'s manager is next created.
    /// An already live manager keeps the pool it was built with.
    pub fn configure(&self, owner: impl Into<String>, config: WorkManagerConfig) {
        self.configs.insert(owner.into(), config);
    }

    /// Returns the manager for `owner`, creating it on first use.
    /// Concurrent first calls build exactly one manager.
    pub fn get(&self, owner: &str) -> Result<Arc<WorkManager>, ConfigError> {
        if let Some(manager) = self.managers.get(owner) {
            return Ok(Arc::clone(manager.value()));
        }

        match self.managers.entry(owner.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let config = self
                    .configs
                    .get(owner)
                    .map(|c| c.value().clone())
                    .unwrap_or_default();
                let manager = WorkManager::builder(owner, Arc::clone(&self.pools))
                    .config(config)
                    .transaction_manager(Arc::clone(&self.tx_manager))
                    .monitoring_registry(Arc::clone(&self.monitoring))
                    .build()?;
                let manager = Arc::new(manager);
                entry.insert(Arc::clone(&manager));
                debug!(owner, "work manager cached");
                Ok(manager)
            }
        }
    }

    /// Cleans up and forgets `owner`'s manager. Returns `false` when none was
    /// live.
    pub fn remove(&self, owner: &str) -> bool {
        match self.managers.entry(owner.to_string()) {
            Entry::Occupied(entry) => {
                entry.get().cleanup();
                entry.remove();
                info!(owner, "work manager removed");
                true
            }
            Entry::Vacant(_) => false,
        }
    }

    pub fn contains(&self, owner: &str) -> bool {
        self.managers.contains_key(owner)
    }

    pub fn len(&self) -> usize {
        self.managers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.managers.is_empty()
    }

    pub fn proxy(self: &Arc<Self>, owner: impl Into<String>) -> WorkManagerProxy {
        WorkManagerProxy {
            owner: owner.into(),
            registry: Some(Arc::clone(self)),
            bound: OnceLock::new(),
        }
    }
}

impl fmt::Debug for HandleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandleRegistry")
            .field("managers", &self.managers.len())
            .field("pools", &self.pools.names())
            .finish()
    }
}

/// Serializable stand-in for a [`WorkManager`].
///
/// Only the owner name crosses the wire. The manager is looked up on first
/// use, through the originating registry or, after deserialization, the
/// process-wide one.
#[derive(Clone, Serialize, Deserialize)]
pub struct WorkManagerProxy {
    owner: String,
    #[serde(skip)]
    registry: Option<Arc<HandleRegistry>>,
    #[serde(skip)]
    bound: OnceLock<Arc<WorkManager>>,
}

impl WorkManagerProxy {
    #[inline]
    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn is_bound(&self) -> bool {
        self.bound.get().is_some()
    }

    pub fn resolve(&self) -> Result<Arc<WorkManager>, ConfigError> {
        if let Some(manager) = self.bound.get() {
            return Ok(Arc::clone(manager));
        }
        let registry = match &self.registry {
            Some(registry) => Arc::clone(registry),
            None => HandleRegistry::process().ok_or(ConfigError::RegistryUnavailable)?,
        };
        let manager = registry.get(&self.owner)?;
        Ok(Arc::clone(self.bound.get_or_init(|| manager)))
    }

    fn manager(&self) -> Result<Arc<WorkManager>, WorkError> {
        self.resolve()
            .map_err(|e| WorkError::rejected(ErrorCode::Undefined, e))
    }

    pub fn do_work(&self, work: impl Work) -> Result<(), WorkError> {
        self.manager()?.do_work(work)
    }

    pub fn do_work_with(&self, work: impl Work, options: SubmitOptions) -> Result<(), WorkError> {
        self.manager()?.do_work_with(work, options)
    }

    pub fn start_work(&self, work: impl Work) -> Result<Duration, WorkError> {
        self.manager()?.start_work(work)
    }

    pub fn start_work_with(&self, work: impl Work, options: SubmitOptions) -> Result<Duration, WorkError> {
        self.manager()?.start_work_with(work, options)
    }

    pub fn schedule_work(&self, work: impl Work) -> Result<(), WorkError> {
        self.manager()?.schedule_work(work)
    }

    pub fn schedule_work_with(&self, work: impl Work, options: SubmitOptions) -> Result<(), WorkError> {
        self.manager()?.schedule_work_with(work, options)
    }

    pub fn schedule_work_with_handle(&self, work: impl Work, options: SubmitOptions) -> Result<WorkHandle, WorkError> {
        self.manager()?.schedule_work_with_handle(work, options)
    }
}

impl PartialEq for WorkManagerProxy {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner
    }
}

impl Eq for WorkManagerProxy {}

impl Hash for WorkManagerProxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.owner.hash(state);
    }
}

impl fmt::Debug for WorkManagerProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkManagerProxy")
            .field("owner", &self.owner)
            .field("bound", &self.is_bound())
            .finish()
    }
}
