use super::{
    errors::ConfigError,
    pool::{Config, ThreadPool},
};
use dashmap::DashMap;
use std::{
    io,
    sync::{Arc, RwLock},
};
use tracing::info;


/// Named thread pools plus a designated default.
#[derive(Default)]
pub struct ThreadPoolManager {
    pools: DashMap<String, Arc<ThreadPool>>,
    default_pool: RwLock<Option<String>>,
}

impl ThreadPoolManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Manager with a single pool that is also the default.
    pub fn with_default(name: impl Into<String>, config: Config) -> io::Result<Arc<Self>> {
        let manager = Self::new();
        let name = name.into();
        manager.create_pool(name.clone(), config)?;
        manager.set_default(&name);
        Ok(manager)
    }

    pub fn create_pool(&self, name: impl Into<String>, config: Config) -> io::Result<Arc<ThreadPool>> {
        let name = name.into();
        let pool = ThreadPool::with_config(name.clone(), config)?;
        self.add_pool(Arc::clone(&pool));
        Ok(pool)
    }

    pub fn add_pool(&self, pool: Arc<ThreadPool>) {
        let name = pool.name().to_string();
        if let Some(previous) = self.pools.insert(name.clone(), pool) {
            info!(pool = %name, "replacing thread pool");
            previous.shutdown();
        }
    }

    /// Marks `name` as the default pool. It does not have to exist yet.
    pub fn set_default(&self, name: &str) {
        let mut default_pool = self.default_pool.write().unwrap_or_else(|e| e.into_inner());
        *default_pool = Some(name.to_string());
    }

    pub fn thread_pool(&self, name: &str) -> Option<Arc<ThreadPool>> {
        self.pools.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn default_thread_pool(&self) -> Option<Arc<ThreadPool>> {
        let default_pool = self.default_pool.read().unwrap_or_else(|e| e.into_inner());
        default_pool.as_deref().and_then(|name| self.thread_pool(name))
    }

    /// Resolves the pool a work manager named `owner` should use: the named
    /// pool when `pool_id` is set, else the default.
    pub fn resolve(&self, pool_id: Option<&str>, owner: &str) -> Result<Arc<ThreadPool>, ConfigError> {
        match pool_id.filter(|id| !id.is_empty()) {
            Some(id) => self.thread_pool(id).ok_or_else(|| ConfigError::ThreadPoolNotFound {
                pool: id.to_string(),
                owner: owner.to_string(),
            }),
            None => self.default_thread_pool().ok_or_else(|| ConfigError::NoDefaultThreadPool {
                owner: owner.to_string(),
            }),
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.pools.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn shutdown_all(&self) {
        for entry in self.pools.iter() {
            entry.value().shutdown();
        }
    }
}
