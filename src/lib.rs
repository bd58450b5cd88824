//! Work submission coordinator on top of a work-stealing thread pool.
//!
//! # Features
//! - Three blocking disciplines: wait for completion, wait for start, or none
//! - Start timeouts detected by both the producer and the worker
//! - Transaction context import and release around each work item
//! - Context loader propagation from producer to worker thread
//! - Lifecycle listeners, statistics probes and a monitoring registry
//! - Owner-keyed manager registry with serializable proxies
//! - Async completion handles for fire-and-forget work

pub mod context;
mod coordinator;
pub mod errors;
pub mod handle;
pub mod manager;
pub mod model;
pub mod pool;
pub mod pool_manager;
pub mod probe;
pub mod registry;
pub mod transaction;
pub mod work;
mod wrapper;

pub use context::{ContextLoader, LoaderScope, SecurityIdentity};
pub use errors::{BoxError, ConfigError, EnqueueError, ErrorCode, HandleError, TxError, WorkError};
pub use handle::WorkHandle;
pub use manager::{WorkManager, WorkManagerBuilder, WorkManagerConfig};
pub use model::{PoolMetrics, WaitMode, WorkState, WorkStatsSnapshot};
pub use pool::{Config, ThreadPool};
pub use pool_manager::ThreadPoolManager;
pub use probe::{MonitoringRegistry, WorkProbe, WorkStats};
pub use registry::{HandleRegistry, WorkManagerProxy};
pub use transaction::{NoTransactionManager, TransactionManager, TxHandle};
pub use work::{ExecutionContext, SubmitOptions, Work, WorkEvent, WorkEventKind, WorkItem, WorkListener, Xid};
