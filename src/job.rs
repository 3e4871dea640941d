//! Job definitions and execution logic.
//!
//! Jobs are the units of work accepted by a [`JobScheduler`](crate::JobScheduler).
//! They encapsulate a closure and an optional counter for tracking completion.

use crate::counter::Counter;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// A unit of work to be executed by a pool.
///
/// Jobs consist of a closure to execute and an optional counter
/// that is decremented upon completion, even if the closure panics.
pub struct Job {
    /// The work to be executed
    work: Box<dyn FnOnce() + Send + 'static>,
    /// Optional counter to decrement when the job completes
    counter: Option<Counter>,
}

impl Job {
    /// Creates a new job with the given work function.
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Job {
            work: Box::new(work),
            counter: None,
        }
    }

    /// Creates a job from an already boxed closure.
    pub fn from_boxed(work: Box<dyn FnOnce() + Send + 'static>) -> Self {
        Job {
            work,
            counter: None,
        }
    }

    /// Creates a new job with an associated counter.
    pub fn with_counter<F>(work: F, counter: Counter) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Job {
            work: Box::new(work),
            counter: Some(counter),
        }
    }

    /// Executes the job and decrements its counter if present.
    ///
    /// A panic raised by the work is caught and returned as the error payload
    /// so the executing worker thread survives.
    pub fn execute(self) -> Result<(), Box<dyn Any + Send + 'static>> {
        let result = panic::catch_unwind(AssertUnwindSafe(self.work));

        if let Some(counter) = self.counter {
            counter.decrement();
        }

        result
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("counter", &self.counter)
            .finish_non_exhaustive()
    }
}

/// Extracts a printable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn test_job_execution() {
        let executed = Arc::new(AtomicBool::new(false));
        let executed_clone = executed.clone();

        let job = Job::new(move || {
            executed_clone.store(true, Ordering::SeqCst);
        });

        assert!(job.execute().is_ok());
        assert!(executed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_job_with_counter() {
        let counter = Counter::new(1);
        let counter_clone = counter.clone();

        let job = Job::with_counter(
            move || {
                // Do some work
            },
            counter_clone,
        );

        assert_eq!(counter.value(), 1);
        job.execute().unwrap();
        assert_eq!(counter.value(), 0);
    }

    #[test]
    fn test_panicking_job_still_decrements() {
        let counter = Counter::new(1);
        let job = Job::with_counter(|| panic!("boom"), counter.clone());

        let payload = job.execute().unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom");
        assert!(counter.is_complete());
    }
}
