//! Scheduling error types.

use thiserror::Error;

/// Failure reported by a host scheduling capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The scheduler exists but does not implement this kind of scheduling.
    ///
    /// This is the only error that makes [`TaskScheduler`](crate::TaskScheduler)
    /// retry on the region scheduler.
    #[error("operation not supported by this scheduler: {0}")]
    Unsupported(&'static str),

    /// The host refused the task (plugin disabled, invalid arguments, ...).
    #[error("task rejected: {0}")]
    Rejected(String),

    /// Any other host failure.
    #[error("host failure: {0}")]
    Failed(String),
}

/// Result type for host capability calls.
pub type HostResult<T> = Result<T, HostError>;

/// Failure submitting a task through [`TaskScheduler`](crate::TaskScheduler).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedError {
    /// The host failed for a reason other than "unsupported".
    #[error(transparent)]
    Host(#[from] HostError),

    /// The primary scheduler reported "unsupported" and there is nothing to fall back to.
    #[error("`{operation}` is unsupported by the primary scheduler and no region scheduler is available")]
    NoFallback { operation: &'static str },
}

/// Result type for task submission.
pub type SchedResult<T> = Result<T, SchedError>;

/// Failure running work on an entity's owning thread.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AffinityError {
    /// The entity's scheduler retired before the work ran.
    #[error("entity scheduler retired before execution")]
    OwnerRetired,

    /// The waiting thread was interrupted.
    #[error("interrupted while waiting for the owning thread")]
    Interrupted,

    /// The work panicked on the owning thread.
    #[error("task panicked: {0}")]
    TaskPanicked(String),

    /// The work could not be submitted.
    #[error(transparent)]
    Schedule(#[from] SchedError),
}
