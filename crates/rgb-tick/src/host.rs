//! Scheduling capabilities a host may expose.
//!
//! A host implements the global-tick model, the region-partitioned model, or
//! both surfaces with one of them declining every call. The core never asks
//! which; it submits and reacts to [`HostError::Unsupported`].
//!
//! ```text
//! PrimaryScheduler        one tick thread, tick-based delays, u32 task ids
//! RegionScheduler
//!   ├─ GlobalScheduler    the ownerless "global" tick thread, tick-based delays
//!   └─ AsyncScheduler     worker pool, wall-clock delays
//! EntityAffinity<E>       optional: ownership query + per-entity scheduler
//! ```

use std::sync::Arc;
use std::time::Duration;

use crate::{HostResult, Task};

/// Handle to a task submitted to a region-model scheduler.
///
/// Dropping a handle does not cancel the task.
pub trait ScheduledTask: Send + Sync {
    /// Cancel the task. Cancelling twice, or after completion, does nothing.
    fn cancel(&self);

    /// Whether [`cancel`](Self::cancel) took effect.
    fn is_cancelled(&self) -> bool;
}

/// The global-tick scheduler: one thread runs everything, in ticks.
///
/// Every submission may answer [`HostError::Unsupported`](crate::HostError::Unsupported)
/// instead of scheduling, which is how a region-model host announces itself.
pub trait PrimaryScheduler: Send + Sync {
    /// Run on the tick thread at the next tick.
    fn run_task(&self, task: Task) -> HostResult<u32>;

    /// Run on the tick thread after `delay_ticks`.
    fn run_task_later(&self, task: Task, delay_ticks: u64) -> HostResult<u32>;

    /// Run on the tick thread after `delay_ticks`, then every `period_ticks`.
    fn run_task_timer(&self, task: Task, delay_ticks: u64, period_ticks: u64) -> HostResult<u32>;

    /// Run on a worker thread as soon as possible.
    fn run_task_async(&self, task: Task) -> HostResult<u32>;

    /// Run on a worker thread after `delay_ticks`.
    fn run_task_later_async(&self, task: Task, delay_ticks: u64) -> HostResult<u32>;

    /// Run on a worker thread after `delay_ticks`, then every `period_ticks`.
    fn run_task_timer_async(
        &self,
        task: Task,
        delay_ticks: u64,
        period_ticks: u64,
    ) -> HostResult<u32>;

    /// Cancel a task by id. Unknown ids are ignored.
    fn cancel_task(&self, id: u32);

    /// Whether the caller is the single tick thread of the global-tick model.
    fn is_primary_thread(&self) -> bool;
}

/// The region model's scheduler for ownerless work, measured in ticks.
pub trait GlobalScheduler: Send + Sync {
    /// Run on the global tick thread at the next tick. No handle is returned.
    fn execute(&self, task: Task) -> HostResult<()>;

    /// Run on the global tick thread after `delay_ticks` (at least 1).
    fn run_delayed(&self, task: Task, delay_ticks: u64) -> HostResult<Box<dyn ScheduledTask>>;

    /// Run on the global tick thread after `initial_delay_ticks`, then every
    /// `period_ticks` (both at least 1).
    fn run_at_fixed_rate(
        &self,
        task: Task,
        initial_delay_ticks: u64,
        period_ticks: u64,
    ) -> HostResult<Box<dyn ScheduledTask>>;
}

/// The region model's worker pool, measured in wall-clock time.
pub trait AsyncScheduler: Send + Sync {
    /// Run on a worker as soon as possible.
    fn run_now(&self, task: Task) -> HostResult<Box<dyn ScheduledTask>>;

    /// Run on a worker after `delay`.
    fn run_delayed(&self, task: Task, delay: Duration) -> HostResult<Box<dyn ScheduledTask>>;

    /// Run on a worker after `initial_delay`, then every `period`.
    fn run_at_fixed_rate(
        &self,
        task: Task,
        initial_delay: Duration,
        period: Duration,
    ) -> HostResult<Box<dyn ScheduledTask>>;
}

/// Entry point of the region-partitioned model.
pub trait RegionScheduler: Send + Sync {
    /// Scheduler for work with no owning region.
    fn global(&self) -> &dyn GlobalScheduler;

    /// Scheduler for work that may run on any worker.
    fn async_scheduler(&self) -> &dyn AsyncScheduler;

    /// Whether the caller is the global tick thread.
    fn is_global_tick_thread(&self) -> bool;
}

/// Scheduler bound to one entity; runs work on whichever thread owns it.
pub trait EntityScheduler: Send + Sync {
    /// Run `task` on the owning thread after `delay_ticks`.
    ///
    /// If the entity is removed before the task runs, `retired` runs instead.
    /// Returns `false`, running neither, if the entity is already retired.
    fn execute(&self, task: Task, retired: Task, delay_ticks: u64) -> bool;
}

/// Optional per-entity thread affinity.
pub trait EntityAffinity<E: ?Sized>: Send + Sync {
    /// Whether the calling thread currently owns `entity`.
    fn is_owned_by_current_region(&self, entity: &E) -> bool;

    /// Scheduler bound to `entity`, if the host has one for it.
    fn entity_scheduler(&self, entity: &E) -> Option<Arc<dyn EntityScheduler>>;
}
