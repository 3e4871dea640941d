//! Unbounded pool that grows on demand.
//!
//! A submitted job goes to an idle worker if one is waiting, otherwise a new
//! worker thread is started for it. Workers that stay idle for the configured
//! keep-alive retire, so a quiet pool holds no threads.
//!
//! Hand-off is exact: a submitter claims an idle worker by decrementing the
//! idle count before sending, and a worker only retires if it can still take
//! itself off that count. A worker whose slot was claimed keeps waiting,
//! because a job is already on its way.

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::job::{Job, panic_message};
use crate::scheduler::JobScheduler;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use std::cell::Cell;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

thread_local! {
    // Address of the `Shared` state of the pool this thread works for, or 0.
    static OWNER: Cell<usize> = const { Cell::new(0) };
}

struct Shared {
    /// Workers blocked waiting for work that no submitter has claimed yet.
    idle: AtomicUsize,
    /// Worker threads that have been started and not yet exited.
    live: Mutex<usize>,
    all_exited: Condvar,
    next_id: AtomicUsize,
}

impl Shared {
    fn try_claim_idle(&self) -> bool {
        self.idle
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    fn thread_exited(&self) {
        let mut live = self.live.lock();
        *live -= 1;
        if *live == 0 {
            self.all_exited.notify_all();
        }
    }
}

/// An unbounded, on-demand thread pool.
pub struct CachedPool {
    sender: RwLock<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    shared: Arc<Shared>,
    config: PoolConfig,
}

impl CachedPool {
    /// Creates an empty pool. No threads are started until the first job.
    pub fn new(config: PoolConfig) -> Self {
        let (sender, receiver) = channel::unbounded();
        CachedPool {
            sender: RwLock::new(Some(sender)),
            receiver,
            shared: Arc::new(Shared {
                idle: AtomicUsize::new(0),
                live: Mutex::new(0),
                all_exited: Condvar::new(),
                next_id: AtomicUsize::new(0),
            }),
            config,
        }
    }

    /// Submits a job, reusing an idle worker or starting a new one.
    pub fn submit(&self, job: Job) -> Result<(), PoolError> {
        let guard = self.sender.read();
        let sender = guard.as_ref().ok_or(PoolError::Shutdown)?;

        if self.shared.try_claim_idle() {
            return sender.send(job).map_err(|_| PoolError::Shutdown);
        }
        self.spawn_worker(job)
    }

    fn spawn_worker(&self, first: Job) -> Result<(), PoolError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let builder = self.config.thread_builder(&self.config.thread_name_prefix, id);
        let queue = self.receiver.clone();
        let shared = Arc::clone(&self.shared);
        let keep_alive = self.config.keep_alive;

        *self.shared.live.lock() += 1;
        let spawned = builder.spawn(move || {
            OWNER.with(|owner| owner.set(Arc::as_ptr(&shared) as usize));
            CachedPool::run_loop(id, first, &queue, &shared, keep_alive);
            shared.thread_exited();
        });

        match spawned {
            Ok(_) => {
                log::debug!("spawned shared worker {}", id);
                Ok(())
            }
            Err(e) => {
                self.shared.thread_exited();
                Err(PoolError::Spawn(e))
            }
        }
    }

    fn run_loop(id: usize, first: Job, queue: &Receiver<Job>, shared: &Shared, keep_alive: Duration) {
        let run = |job: Job| {
            if let Err(payload) = job.execute() {
                log::error!("job panicked on shared worker {}: {}", id, panic_message(payload.as_ref()));
            }
        };
        run(first);

        // true while this worker is counted as idle or has been claimed
        let mut waiting = false;
        loop {
            if !waiting {
                shared.idle.fetch_add(1, Ordering::AcqRel);
                waiting = true;
            }
            match queue.recv_timeout(keep_alive) {
                Ok(job) => {
                    waiting = false;
                    run(job);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if shared.try_claim_idle() {
                        log::debug!("shared worker {} retiring after idle timeout", id);
                        return;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    /// Stops accepting new jobs. Idle workers exit once the queue drains. Idempotent.
    pub fn shutdown(&self) {
        if self.sender.write().take().is_some() {
            log::debug!("shared pool '{}' shutting down", self.config.thread_name_prefix);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.read().is_none()
    }

    /// Whether the pool is shut down and every worker thread has exited.
    pub fn is_terminated(&self) -> bool {
        self.is_shutdown() && self.live_threads() == 0
    }

    /// Blocks until every worker thread has exited or `timeout` elapses.
    ///
    /// Returns true if the pool terminated in time.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut live = self.shared.live.lock();
        while *live > 0 {
            if self.shared.all_exited.wait_until(&mut live, deadline).timed_out() {
                return *live == 0 && self.is_shutdown();
            }
        }
        self.is_shutdown()
    }

    /// Number of worker threads currently alive.
    pub fn live_threads(&self) -> usize {
        *self.shared.live.lock()
    }

    /// Whether the calling thread is one of this pool's workers.
    pub fn owns_current_thread(&self) -> bool {
        let me = Arc::as_ptr(&self.shared) as usize;
        OWNER.with(|owner| owner.get() == me)
    }

    /// Number of workers waiting for work.
    pub fn idle_threads(&self) -> usize {
        self.shared.idle.load(Ordering::Acquire)
    }
}

impl JobScheduler for CachedPool {
    fn schedule(&self, job: Job) -> Result<(), PoolError> {
        self.submit(job)
    }

    fn is_shutdown(&self) -> bool {
        CachedPool::is_shutdown(self)
    }
}

impl Drop for CachedPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CachedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedPool")
            .field("live", &self.live_threads())
            .field("idle", &self.idle_threads())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::Counter;
    use std::sync::Barrier;
    use std::thread;

    fn short_lived() -> PoolConfig {
        PoolConfig::default()
            .with_thread_name_prefix("cached-test")
            .with_keep_alive(Duration::from_millis(50))
    }

    #[test]
    fn test_no_threads_before_first_job() {
        let pool = CachedPool::new(short_lived());
        assert_eq!(pool.live_threads(), 0);
        assert!(!pool.is_shutdown());
    }

    #[test]
    fn test_grows_past_any_fixed_width() {
        // 16 jobs that all block on one barrier can only finish if 16 threads exist.
        let pool = CachedPool::new(short_lived());
        let barrier = Arc::new(Barrier::new(16));
        let counter = Counter::new(16);

        for _ in 0..16 {
            let barrier = barrier.clone();
            pool.submit(Job::with_counter(move || { barrier.wait(); }, counter.clone()))
                .unwrap();
        }

        assert!(counter.wait_timeout(Duration::from_secs(10)));
        assert!(pool.live_threads() >= 16);
    }

    #[test]
    fn test_idle_workers_are_reused() {
        let pool = CachedPool::new(PoolConfig::default().with_thread_name_prefix("reuse-test"));
        let first = Counter::new(1);
        pool.submit(Job::with_counter(|| {}, first.clone())).unwrap();
        first.wait();

        // Give the worker time to register as idle.
        let start = Instant::now();
        while pool.idle_threads() == 0 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(1));
        }

        let second = Counter::new(1);
        pool.submit(Job::with_counter(|| {}, second.clone())).unwrap();
        second.wait();
        assert_eq!(pool.live_threads(), 1);

        pool.shutdown();
        assert!(pool.await_termination(Duration::from_secs(5)));
    }

    #[test]
    fn test_idle_workers_retire() {
        let pool = CachedPool::new(short_lived());
        let counter = Counter::new(4);
        for _ in 0..4 {
            pool.submit(Job::with_counter(|| {}, counter.clone())).unwrap();
        }
        counter.wait();

        let start = Instant::now();
        while pool.live_threads() > 0 && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(pool.live_threads(), 0);
        assert!(!pool.is_terminated());
    }

    #[test]
    fn test_owns_only_its_own_workers() {
        let pool = CachedPool::new(short_lived());
        let other = CachedPool::new(short_lived());
        assert!(!pool.owns_current_thread());

        let pool = Arc::new(pool);
        let other = Arc::new(other);
        let seen = Arc::new(Mutex::new(None));
        let counter = Counter::new(1);
        let (p, o, s) = (pool.clone(), other.clone(), seen.clone());
        pool.submit(Job::with_counter(
            move || *s.lock() = Some((p.owns_current_thread(), o.owns_current_thread())),
            counter.clone(),
        ))
        .unwrap();
        counter.wait();

        assert_eq!(*seen.lock(), Some((true, false)));
    }

    #[test]
    fn test_shutdown_rejects_and_terminates() {
        let pool = CachedPool::new(PoolConfig::default());
        let counter = Counter::new(1);
        pool.submit(Job::with_counter(
            || thread::sleep(Duration::from_millis(20)),
            counter.clone(),
        ))
        .unwrap();

        pool.shutdown();
        pool.shutdown();
        assert!(matches!(pool.submit(Job::new(|| {})), Err(PoolError::Shutdown)));
        assert!(pool.await_termination(Duration::from_secs(5)));
        assert!(counter.is_complete());
        assert!(pool.is_terminated());
    }
}
