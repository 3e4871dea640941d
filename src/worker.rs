//! Fixed-size worker pool.
//!
//! Worker threads block on a shared queue and execute jobs until the pool
//! is shut down and the queue has drained. A [`WorkerPool`] caps effective
//! parallelism at its thread count, so it serves both as the private
//! per-batch pool and as a bounded pool supplied by callers.

use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::job::{Job, panic_message};
use crate::scheduler::JobScheduler;
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::RwLock;
use std::thread::{self, JoinHandle};

/// A worker thread that executes jobs from a queue.
pub struct Worker {
    id: usize,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawns a worker thread that runs jobs from `queue` until it disconnects.
    fn spawn(id: usize, builder: thread::Builder, queue: Receiver<Job>) -> Result<Self, PoolError> {
        let handle = builder.spawn(move || Worker::run_loop(id, queue))?;

        Ok(Worker {
            id,
            handle: Some(handle),
        })
    }

    /// Main execution loop for the worker thread.
    fn run_loop(id: usize, queue: Receiver<Job>) {
        // recv fails only once every sender is gone and the queue is empty
        while let Ok(job) = queue.recv() {
            if let Err(payload) = job.execute() {
                log::error!("job panicked on worker {}: {}", id, panic_message(payload.as_ref()));
            }
        }
        log::debug!("worker {} exiting", id);
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Waits for the worker thread to finish.
    pub fn join(mut self) -> thread::Result<()> {
        if let Some(handle) = self.handle.take() {
            handle.join()
        } else {
            Ok(())
        }
    }
}

/// A pool with a fixed number of worker threads.
pub struct WorkerPool {
    workers: Vec<Worker>,
    sender: RwLock<Option<Sender<Job>>>,
}

impl WorkerPool {
    /// Creates a new worker pool with `num_threads` threads (at least one).
    pub fn new(num_threads: usize) -> Result<Self, PoolError> {
        Self::with_config(
            num_threads,
            &PoolConfig::default().with_thread_name_prefix("rustpar-worker"),
        )
    }

    /// Creates a new worker pool, naming and sizing threads from `config`.
    pub fn with_config(num_threads: usize, config: &PoolConfig) -> Result<Self, PoolError> {
        let num_threads = num_threads.max(1);
        let (sender, receiver) = channel::unbounded();
        let mut workers = Vec::with_capacity(num_threads);

        for id in 0..num_threads {
            let builder = config.thread_builder(&config.thread_name_prefix, id);
            match Worker::spawn(id, builder, receiver.clone()) {
                Ok(worker) => workers.push(worker),
                Err(e) => {
                    // Disconnect the queue so the workers already running exit.
                    drop(sender);
                    for worker in workers {
                        let _ = worker.join();
                    }
                    return Err(e);
                }
            }
        }

        log::debug!(
            "started worker pool '{}' with {} threads",
            config.thread_name_prefix,
            num_threads
        );

        Ok(WorkerPool {
            workers,
            sender: RwLock::new(Some(sender)),
        })
    }

    /// Submits a single job to the pool queue.
    pub fn submit(&self, job: Job) -> Result<(), PoolError> {
        match self.sender.read().as_ref() {
            Some(sender) => sender.send(job).map_err(|_| PoolError::Shutdown),
            None => Err(PoolError::Shutdown),
        }
    }

    /// Returns the number of worker threads in the pool.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Stops accepting new jobs. Jobs already queued still run. Idempotent.
    pub fn shutdown(&self) {
        self.sender.write().take();
    }

    /// Shuts down the pool and waits for all threads to finish.
    ///
    /// Returns Ok if all workers shut down successfully, or Err with the
    /// number of workers that panicked.
    pub fn join(mut self) -> Result<(), usize> {
        self.shutdown();
        let mut failed_count = 0;
        for worker in std::mem::take(&mut self.workers) {
            let worker_id = worker.id();
            if worker.join().is_err() {
                failed_count += 1;
                log::error!("worker {} panicked during execution", worker_id);
            }
        }

        if failed_count > 0 {
            Err(failed_count)
        } else {
            Ok(())
        }
    }
}

impl JobScheduler for WorkerPool {
    fn schedule(&self, job: Job) -> Result<(), PoolError> {
        self.submit(job)
    }

    fn is_shutdown(&self) -> bool {
        self.sender.read().is_none()
    }

    fn max_workers(&self) -> Option<usize> {
        Some(self.size())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.workers.len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}
