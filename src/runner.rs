//! Parallel execution of task batches.
//!
//! A batch is a sequence of tasks plus a requested width. The runner
//! schedules `width` worker loops on a pool; each loop pulls the next task
//! from the shared sequence until it is exhausted. The calling thread blocks
//! until every loop has finished, so tasks may borrow from the caller's stack.
//!
//! Width is a request, not a guarantee. The shared pool grows to whatever
//! width is asked for, but a bounded pool supplied by the caller runs at most
//! [`JobScheduler::max_workers`] loops at once, however many were requested.
//!
//! A task must not start a nested batch on the same bounded pool it runs on.
//! Once every thread of that pool is busy with the outer batch, the nested
//! batch's loops queue behind the tasks waiting for them, and both batches
//! deadlock. The shared pool grows instead, so nesting on it is fine.

use crate::counter::Counter;
use crate::job::{Job, panic_message};
use crate::pool_manager::PoolManager;
use crate::scheduler::{InlineScheduler, JobScheduler};
use parking_lot::Mutex;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Payload of a caught panic.
pub type PanicPayload = Box<dyn Any + Send + 'static>;

static INSTANCE_NUMBER: AtomicU64 = AtomicU64::new(0);

/// A raw failure raised by a fallible task, before classification.
pub enum TaskFailure<R> {
    /// The task returned an error.
    Error(R),
    /// The task panicked.
    Panic(PanicPayload),
}

impl<R> TaskFailure<R> {
    pub fn is_panic(&self) -> bool {
        matches!(self, TaskFailure::Panic(_))
    }

    /// The returned error, if the task did not panic.
    pub fn into_error(self) -> Option<R> {
        match self {
            TaskFailure::Error(e) => Some(e),
            TaskFailure::Panic(_) => None,
        }
    }

    /// Message of a panic payload, if it carried a string.
    pub fn panic_message(&self) -> Option<&str> {
        match self {
            TaskFailure::Error(_) => None,
            TaskFailure::Panic(payload) => Some(panic_message(payload.as_ref())),
        }
    }
}

impl<R: fmt::Debug> fmt::Debug for TaskFailure<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskFailure::Error(e) => f.debug_tuple("Error").field(e).finish(),
            TaskFailure::Panic(payload) => f
                .debug_tuple("Panic")
                .field(&panic_message(payload.as_ref()))
                .finish(),
        }
    }
}

enum Backing {
    Managed(Arc<PoolManager>),
    Scheduler(Arc<dyn JobScheduler>),
}

/// Runs batches of tasks in parallel and joins them before returning.
pub struct TaskRunner {
    backing: Backing,
    base_name: Option<String>,
}

impl TaskRunner {
    /// Runs batches on `manager`'s shared pool, or on a private pool once
    /// the shared one has been shut down.
    pub fn new(manager: Arc<PoolManager>) -> Self {
        TaskRunner {
            backing: Backing::Managed(manager),
            base_name: None,
        }
    }

    /// Runs batches on a caller-supplied scheduler.
    pub fn with_scheduler(scheduler: Arc<dyn JobScheduler>) -> Self {
        TaskRunner {
            backing: Backing::Scheduler(scheduler),
            base_name: None,
        }
    }

    /// Sets the base name batches are labelled with in logs and thread names.
    pub fn with_name(mut self, base_name: impl Into<String>) -> Self {
        self.base_name = Some(base_name.into());
        self
    }

    fn next_name(&self, default_base: &str) -> String {
        let base = self.base_name.as_deref().unwrap_or(default_base);
        format!("{}-{}", base, INSTANCE_NUMBER.fetch_add(1, Ordering::Relaxed))
    }

    /// Runs every task using up to `width` concurrent workers and returns
    /// once all of them have run.
    ///
    /// Tasks are not expected to fail. If one panics, the remaining tasks
    /// still run, and the first panic is resumed on the caller after every
    /// worker has finished.
    pub fn run<I>(&self, tasks: I, width: usize)
    where
        I: IntoIterator,
        I::IntoIter: Send,
        I::Item: FnOnce() + Send,
    {
        let name = self.next_name("ParallelRun");
        self.run_named(tasks, width, &name);
    }

    /// [`run`](Self::run) with an explicit batch name.
    pub fn run_named<I>(&self, tasks: I, width: usize, name: &str)
    where
        I: IntoIterator,
        I::IntoIter: Send,
        I::Item: FnOnce() + Send,
    {
        if let Some(payload) = self.dispatch(tasks.into_iter(), width, name) {
            panic::resume_unwind(payload);
        }
    }

    /// Runs fallible tasks using up to `width` concurrent workers.
    ///
    /// Every failure, returned error or panic, is passed to `classifier`.
    /// The first classified failure recorded is returned once all workers
    /// have finished; later ones are dropped. Tasks that start after a
    /// failure has been recorded are skipped, but tasks already running are
    /// not interrupted.
    pub fn run_fallible<I, T, R, E, C>(&self, tasks: I, width: usize, classifier: C) -> Result<(), E>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send,
        T: FnOnce() -> Result<(), R> + Send,
        C: Fn(TaskFailure<R>) -> E + Sync,
        E: Send,
    {
        let name = self.next_name("ParallelRunExt");
        self.run_fallible_named(tasks, width, classifier, &name)
    }

    /// [`run_fallible`](Self::run_fallible) with an explicit batch name.
    pub fn run_fallible_named<I, T, R, E, C>(
        &self,
        tasks: I,
        width: usize,
        classifier: C,
        name: &str,
    ) -> Result<(), E>
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send,
        T: FnOnce() -> Result<(), R> + Send,
        C: Fn(TaskFailure<R>) -> E + Sync,
        E: Send,
    {
        let failure = FirstFailure::new();
        let failure_ref = &failure;
        let classifier_ref = &classifier;

        let guarded = tasks.into_iter().map(move |task| {
            move || {
                // short-circuit if another task already failed
                if failure_ref.is_set() {
                    return;
                }
                let raised = match panic::catch_unwind(AssertUnwindSafe(task)) {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => TaskFailure::Error(e),
                    Err(payload) => TaskFailure::Panic(payload),
                };
                failure_ref.record(classifier_ref(raised));
            }
        });

        // Only a panicking classifier gets here.
        if let Some(payload) = self.dispatch(guarded, width, name) {
            panic::resume_unwind(payload);
        }

        match failure.into_inner() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn dispatch<It>(&self, tasks: It, width: usize, name: &str) -> Option<PanicPayload>
    where
        It: Iterator + Send,
        It::Item: FnOnce() + Send,
    {
        let width = effective_width(width, tasks.size_hint());
        if width == 0 {
            return None;
        }

        match &self.backing {
            Backing::Scheduler(scheduler) => execute_batch(&**scheduler, tasks, width, name),
            Backing::Managed(manager) => match manager.acquire(width, name) {
                Ok(context) => {
                    let result = execute_batch(context.scheduler(), tasks, width, name);
                    context.finish();
                    result
                }
                Err(e) => {
                    log::warn!("no pool for batch {} ({}), running on caller thread", name, e);
                    execute_batch(&InlineScheduler, tasks, width, name)
                }
            },
        }
    }
}

impl fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backing = match &self.backing {
            Backing::Managed(_) => "managed",
            Backing::Scheduler(_) => "scheduler",
        };
        f.debug_struct("TaskRunner")
            .field("backing", &backing)
            .field("base_name", &self.base_name)
            .finish()
    }
}

/// Number of worker loops worth scheduling: at least one, and no more than
/// the iterator could possibly yield. Zero only for a provably empty batch.
fn effective_width(requested: usize, size_hint: (usize, Option<usize>)) -> usize {
    let requested = requested.max(1);
    match size_hint.1 {
        Some(upper) => requested.min(upper),
        None => requested,
    }
}

/// First-recorded-wins failure slot shared by a batch's tasks.
struct FirstFailure<E> {
    set: AtomicBool,
    slot: Mutex<Option<E>>,
}

impl<E> FirstFailure<E> {
    fn new() -> Self {
        FirstFailure {
            set: AtomicBool::new(false),
            slot: Mutex::new(None),
        }
    }

    fn is_set(&self) -> bool {
        self.set.load(Ordering::Acquire)
    }

    fn record(&self, failure: E) {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            *slot = Some(failure);
            self.set.store(true, Ordering::Release);
        }
    }

    fn into_inner(self) -> Option<E> {
        self.slot.into_inner()
    }
}

/// State shared by the worker loops of one batch.
struct Batch<'n, It> {
    tasks: Mutex<It>,
    panic: Mutex<Option<PanicPayload>>,
    name: &'n str,
}

impl<It> Batch<'_, It>
where
    It: Iterator,
    It::Item: FnOnce(),
{
    /// Runs tasks until the sequence is exhausted.
    fn drain(&self) {
        loop {
            let next = self.tasks.lock().next();
            let Some(task) = next else {
                return;
            };
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                self.record_panic(payload);
            }
        }
    }

    fn record_panic(&self, payload: PanicPayload) {
        log::warn!(
            "task in batch {} panicked: {}",
            self.name,
            panic_message(payload.as_ref())
        );
        let mut slot = self.panic.lock();
        if slot.is_none() {
            *slot = Some(payload);
        }
    }
}

/// Decrements the batch's pending count when a worker loop finishes or is
/// dropped without running.
struct Done(Counter);

impl Drop for Done {
    fn drop(&mut self) {
        self.0.decrement();
    }
}

/// Waits for every scheduled worker loop when dropped, including while
/// unwinding out of a panicking scheduler.
struct JoinOnDrop(Counter);

impl Drop for JoinOnDrop {
    fn drop(&mut self) {
        self.0.wait();
    }
}

/// Extends a worker loop's lifetime to `'static` so it can be queued on a pool.
///
/// # Safety
/// The caller must not let anything the closure borrows go out of scope until
/// the closure has run or been dropped.
unsafe fn erase_lifetime<'a>(
    work: Box<dyn FnOnce() + Send + 'a>,
) -> Box<dyn FnOnce() + Send + 'static> {
    unsafe { std::mem::transmute(work) }
}

fn execute_batch<It>(
    scheduler: &dyn JobScheduler,
    tasks: It,
    width: usize,
    name: &str,
) -> Option<PanicPayload>
where
    It: Iterator + Send,
    It::Item: FnOnce() + Send,
{
    let batch = Batch {
        tasks: Mutex::new(tasks),
        panic: Mutex::new(None),
        name,
    };
    // Declared after `batch`, so it is dropped, and waits, first.
    let pending = JoinOnDrop(Counter::new(0));

    log::debug!("batch {} starting {} worker(s)", name, width);

    let mut rejected = 0;
    for _ in 0..width {
        pending.0.increment();
        let done = Done(pending.0.clone());
        let batch_ref = &batch;
        let work = Box::new(move || {
            let _done = done;
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| batch_ref.drain())) {
                batch_ref.record_panic(payload);
            }
        });
        // SAFETY: `batch` outlives `pending`, which waits for zero before it
        // is dropped, even on unwind. Every worker loop holds a `Done` that
        // decrements it only after its last use of `batch`, or when the loop
        // is dropped unrun.
        let job = Job::from_boxed(unsafe { erase_lifetime(work) });
        if let Err(e) = scheduler.schedule(job) {
            rejected += 1;
            log::debug!("batch {} worker rejected: {}", name, e);
        }
    }

    pending.0.wait();

    if rejected > 0 {
        log::warn!(
            "batch {}: {} of {} worker(s) rejected, finishing on caller thread",
            name,
            rejected,
            width
        );
    }
    // Picks up anything a rejected or dropped worker left behind.
    batch.drain();

    log::debug!("batch {} finished", name);
    batch.panic.into_inner()
}
