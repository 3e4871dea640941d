//! The seam between batch execution and the pools that back it.

use crate::error::PoolError;
use crate::job::{Job, panic_message};

/// Something that accepts jobs for execution: a shared pool, a private
/// pool, or a caller-supplied executor.
pub trait JobScheduler: Send + Sync {
    /// Hands `job` to the scheduler. Fails with [`PoolError::Shutdown`] once
    /// the scheduler has stopped accepting work.
    fn schedule(&self, job: Job) -> Result<(), PoolError>;

    /// Whether the scheduler has stopped accepting work.
    fn is_shutdown(&self) -> bool;

    /// The most jobs this scheduler will run at once, or `None` if unbounded.
    ///
    /// This is the real parallelism ceiling for a batch, whatever width the
    /// batch requested.
    fn max_workers(&self) -> Option<usize> {
        None
    }
}

/// Runs every job immediately on the thread that schedules it.
///
/// Useful as a deterministic stand-in for a pool in tests, and as a
/// last resort when no worker thread can be spawned.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineScheduler;

impl JobScheduler for InlineScheduler {
    fn schedule(&self, job: Job) -> Result<(), PoolError> {
        if let Err(payload) = job.execute() {
            log::error!(
                "inline job panicked: {}",
                panic_message(payload.as_ref())
            );
        }
        Ok(())
    }

    fn is_shutdown(&self) -> bool {
        false
    }

    fn max_workers(&self) -> Option<usize> {
        Some(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_inline_runs_on_caller_thread() {
        let caller = std::thread::current().id();
        let ran_on = Arc::new(parking_lot::Mutex::new(None));
        let ran_on_clone = ran_on.clone();

        InlineScheduler
            .schedule(Job::new(move || {
                *ran_on_clone.lock() = Some(std::thread::current().id());
            }))
            .unwrap();

        assert_eq!(*ran_on.lock(), Some(caller));
    }

    #[test]
    fn test_inline_survives_panic() {
        let count = Arc::new(AtomicUsize::new(0));
        InlineScheduler.schedule(Job::new(|| panic!("inline boom"))).unwrap();

        let c = count.clone();
        InlineScheduler
            .schedule(Job::new(move || {
                c.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(InlineScheduler.max_workers(), Some(1));
    }
}
