//! Kernel error types.

use thiserror::Error;

use crate::clock::SimTime;

/// Fatal simulation failure: an error escaped a top-level task.
///
/// This is a programming/configuration error, not a simulated-domain
/// failure — the run stops and the diagnostic names the task, the virtual
/// time, and the underlying error.
#[derive(Debug, Error)]
#[error("task '{task}' failed at {at}: {source}")]
pub struct SimAbort {
    /// Label of the task that failed.
    pub task: String,
    /// Virtual time at which the failure surfaced.
    pub at: SimTime,
    /// The escaped error.
    #[source]
    pub source: anyhow::Error,
}

pub type KernelResult<T> = Result<T, SimAbort>;
