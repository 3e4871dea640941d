//! # RustPar - Concurrency Utilities
//!
//! Two primitives for coordinating shared counting and parallel work across
//! threads:
//!
//! - **[`CounterMap`]**: a concurrent map of `i64` counters that discards a key
//!   the moment its counter returns to zero.
//! - **[`TaskRunner`]**: runs a batch of tasks on a worker pool using up to a
//!   requested number of workers, blocks until all of them have run, and
//!   reports at most one failure.
//!
//! ## Architecture
//!
//! - **Pool Manager**: owns the shared, unbounded worker pool and its
//!   lifecycle. After shutdown, batches fall back to private pools.
//! - **Schedulers**: anything implementing [`JobScheduler`] can back a runner,
//!   including bounded pools supplied by the caller.
//! - **Counters**: countdown latches used to join a batch's workers.
//!
//! ## Example
//!
//! ```no_run
//! use rustpar::{PoolManager, TaskRunner};
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! let manager = Arc::new(PoolManager::default());
//! let runner = TaskRunner::new(manager.clone());
//!
//! let total = AtomicUsize::new(0);
//! let tasks = (1..=10).map(|i| {
//!     let total = &total;
//!     move || {
//!         total.fetch_add(i, Ordering::SeqCst);
//!     }
//! });
//! runner.run(tasks, 4);
//! assert_eq!(total.load(Ordering::SeqCst), 55);
//!
//! manager.shutdown_and_wait();
//! ```

pub mod cached_pool;
pub mod config;
pub mod counter;
pub mod counter_map;
pub mod error;
pub mod job;
pub mod pool_manager;
pub mod runner;
pub mod scheduler;
pub mod worker;

pub use cached_pool::CachedPool;
pub use config::PoolConfig;
pub use counter::Counter;
pub use counter_map::CounterMap;
pub use error::PoolError;
pub use job::Job;
pub use pool_manager::{ExecutionContext, PoolManager, PoolState, SharedPool};
pub use runner::{PanicPayload, TaskFailure, TaskRunner};
pub use scheduler::{InlineScheduler, JobScheduler};
pub use worker::WorkerPool;
