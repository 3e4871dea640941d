//! Error types for pool and scheduler operations.

use std::io;

/// Errors raised by worker pools and schedulers.
///
/// Task failures are not represented here; they are classified by the caller
/// of [`TaskRunner::run_fallible`](crate::runner::TaskRunner::run_fallible).
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// The pool has been shut down and no longer accepts jobs.
    #[error("pool has been shut down and rejects new jobs")]
    Shutdown,

    /// The operating system refused to start a worker thread.
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] io::Error),
}
