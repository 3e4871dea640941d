//! Ownership and lifecycle of the shared worker pool.
//!
//! A [`PoolManager`] owns one unbounded [`CachedPool`], created the first time
//! a batch borrows it. Batches hold the lifecycle lock in shared mode for as
//! long as they use the shared pool, and shutdown takes it exclusively, so the
//! pool stops accepting work only when no batch is using it. Shutdown raises
//! its flag before queueing for the lock: from then on every borrow is
//! refused, so batches already running are the only ones it waits for. A
//! batch refused the shared pool gets a private [`WorkerPool`] sized to its
//! width, torn down when the batch ends.
//!
//! Calling [`PoolManager::shutdown`] from a task of a batch running on the
//! shared pool deadlocks: shutdown waits for that batch, which waits for the
//! task.
//!
//! The manager is an ordinary value. An application that wants one shared
//! pool for everything constructs a manager at its composition root and hands
//! out `Arc` clones; dropping the last clone shuts the pool down.

use crate::cached_pool::CachedPool;
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::runner::TaskRunner;
use crate::scheduler::JobScheduler;
use crate::worker::WorkerPool;
use parking_lot::{RwLock, RwLockReadGuard};
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// Lifecycle of the shared pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Accepting work.
    Running,
    /// Shutdown requested; workers still finishing.
    ShuttingDown,
    /// Shut down with every worker thread exited.
    Terminated,
}

/// Owns the shared pool and hands out execution contexts for batches.
pub struct PoolManager {
    /// Raised as soon as shutdown is requested.
    shutting_down: AtomicBool,
    /// true until shutdown. Borrowers hold it shared, shutdown exclusive.
    accepting: RwLock<bool>,
    shared: OnceLock<CachedPool>,
    config: PoolConfig,
}

impl PoolManager {
    pub fn new(config: PoolConfig) -> Self {
        PoolManager {
            shutting_down: AtomicBool::new(false),
            accepting: RwLock::new(true),
            shared: OnceLock::new(),
            config,
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Creates a [`TaskRunner`] that executes on this manager's pools.
    pub fn runner(self: &Arc<Self>) -> TaskRunner {
        TaskRunner::new(Arc::clone(self))
    }

    /// Whether the shared pool currently accepts work.
    pub fn is_available(&self) -> bool {
        !self.shutting_down.load(Ordering::Acquire)
    }

    pub fn state(&self) -> PoolState {
        if self.is_available() {
            PoolState::Running
        } else if self.shared.get().is_none_or(CachedPool::is_terminated) {
            PoolState::Terminated
        } else {
            PoolState::ShuttingDown
        }
    }

    fn shared_pool(&self) -> &CachedPool {
        self.shared
            .get_or_init(|| CachedPool::new(self.config.clone()))
    }

    /// Borrows the shared pool, or returns `None` once shutdown has begun.
    ///
    /// Shutdown blocks until every returned guard is dropped.
    pub fn borrow_shared(&self) -> Option<SharedPool<'_>> {
        if !self.is_available() {
            return None;
        }
        // Recursive so a nested borrow never queues behind a waiting shutdown;
        // the flag check after it keeps that from starving the shutdown.
        let guard = self.accepting.read_recursive();
        if !*guard || !self.is_available() {
            return None;
        }
        Some(SharedPool {
            _accepting: guard,
            pool: self.shared_pool(),
        })
    }

    /// Creates a one-off pool of `width` threads named after `name`.
    pub fn create_private(&self, width: usize, name: &str) -> Result<WorkerPool, PoolError> {
        let config = self.config.clone().with_thread_name_prefix(name);
        WorkerPool::with_config(width, &config)
    }

    /// Picks the pool a batch of `width` workers runs on: the shared pool if
    /// available, a private one otherwise.
    pub fn acquire(&self, width: usize, name: &str) -> Result<ExecutionContext<'_>, PoolError> {
        if let Some(shared) = self.borrow_shared() {
            return Ok(ExecutionContext::Shared(shared));
        }
        log::debug!(
            "shared pool unavailable, creating private pool of {} threads for {}",
            width,
            name
        );
        Ok(ExecutionContext::Private(self.create_private(width, name)?))
    }

    /// Stops the shared pool accepting work. Waits for batches currently
    /// using it to finish. Idempotent.
    pub fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Release);
        let mut accepting = self.accepting.write();
        if !*accepting {
            return;
        }
        *accepting = false;
        if let Some(pool) = self.shared.get() {
            pool.shutdown();
        }
        log::debug!("pool manager '{}' shut down", self.config.thread_name_prefix);
    }

    /// Blocks until the shared pool's threads have exited or `timeout` elapses.
    ///
    /// Returns true if the pool has terminated. Returns false without waiting
    /// if shutdown has not completed.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        if *self.accepting.read_recursive() {
            return false;
        }
        match self.shared.get() {
            Some(pool) => pool.await_termination(timeout),
            None => true,
        }
    }

    /// Shuts down and waits up to the configured termination timeout.
    ///
    /// Must not be called from a thread of the shared pool, which would wait
    /// for itself to exit until the timeout. A pool that does not finish in time is logged and left to wind down
    /// on its own. Returns true if it terminated.
    pub fn shutdown_and_wait(&self) -> bool {
        self.shutdown();
        let timeout = self.config.await_termination;
        let terminated = self.await_termination(timeout);
        if !terminated {
            log::warn!(
                "shared pool didn't finish shutting down in {:?}, moving on",
                timeout
            );
        }
        terminated
    }

    /// Returns a closure that performs [`shutdown_and_wait`](Self::shutdown_and_wait),
    /// for registration with an application's exit path.
    pub fn shutdown_task(self: &Arc<Self>) -> impl FnOnce() + Send + 'static {
        let manager = Arc::clone(self);
        move || {
            manager.shutdown_and_wait();
        }
    }
}

impl Default for PoolManager {
    fn default() -> Self {
        PoolManager::new(PoolConfig::default())
    }
}

impl Drop for PoolManager {
    fn drop(&mut self) {
        match self.shared.get() {
            Some(pool) if pool.owns_current_thread() => {
                log::debug!("pool manager dropped on its own worker, not waiting for termination");
                self.shutdown();
            }
            Some(_) => {
                self.shutdown_and_wait();
            }
            None => self.shutdown(),
        }
    }
}

impl std::fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolManager")
            .field("state", &self.state())
            .field("shared", &self.shared.get())
            .finish()
    }
}

/// A borrowed handle on the shared pool. Holds off shutdown while alive.
pub struct SharedPool<'a> {
    _accepting: RwLockReadGuard<'a, bool>,
    pool: &'a CachedPool,
}

impl Deref for SharedPool<'_> {
    type Target = CachedPool;

    fn deref(&self) -> &CachedPool {
        self.pool
    }
}

/// The pool a single batch executes on.
pub enum ExecutionContext<'a> {
    /// The manager's shared pool, borrowed for the batch.
    Shared(SharedPool<'a>),
    /// A pool owned by this batch alone.
    Private(WorkerPool),
}

impl ExecutionContext<'_> {
    pub fn scheduler(&self) -> &dyn JobScheduler {
        match self {
            ExecutionContext::Shared(shared) => shared.pool,
            ExecutionContext::Private(pool) => pool,
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, ExecutionContext::Private(_))
    }

    /// Releases the context, joining the threads of a private pool.
    pub fn finish(self) {
        if let ExecutionContext::Private(pool) = self {
            if let Err(panicked) = pool.join() {
                log::error!("{} private worker(s) panicked", panicked);
            }
        }
    }
}
