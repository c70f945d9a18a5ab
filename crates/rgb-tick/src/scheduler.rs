//! Task submission that adapts to the host's concurrency model.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tracing::{debug, info, warn};

use crate::{
    HostError, HostResult, PrimaryScheduler, RegionScheduler, SchedError, SchedResult,
    ScheduledTask, SchedulerConfig, Task, TaskId, TaskRegistry,
};

/// Concurrency model a host implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostModel {
    /// One tick thread runs all synchronous work.
    Primary,
    /// Regions own their own threads; ownerless work runs on a global thread.
    Partitioned,
}

/// Category of scheduling whose model is learned independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    /// Work bound to the tick thread (or the global tick thread).
    Sync,
    /// Work that may run on any worker.
    Async,
}

impl Lane {
    const fn index(self) -> usize {
        match self {
            Self::Sync => 0,
            Self::Async => 1,
        }
    }
}

const MODEL_UNKNOWN: u8 = 0;
const MODEL_PRIMARY: u8 = 1;
const MODEL_PARTITIONED: u8 = 2;

/// The model detected for one lane, written once.
struct ModelCell(AtomicU8);

impl ModelCell {
    const fn new() -> Self {
        Self(AtomicU8::new(MODEL_UNKNOWN))
    }

    fn get(&self) -> Option<HostModel> {
        match self.0.load(Ordering::Acquire) {
            MODEL_PRIMARY => Some(HostModel::Primary),
            MODEL_PARTITIONED => Some(HostModel::Partitioned),
            _ => None,
        }
    }

    /// Record `model` unless one is already known. Returns whether it was recorded.
    fn learn(&self, model: HostModel) -> bool {
        let value = match model {
            HostModel::Primary => MODEL_PRIMARY,
            HostModel::Partitioned => MODEL_PARTITIONED,
        };
        self.0
            .compare_exchange(MODEL_UNKNOWN, value, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Where a submission ended up.
enum Routed<T> {
    Primary(u32),
    Fallback(T),
}

impl Routed<TaskId> {
    const fn task_id(self) -> TaskId {
        match self {
            Self::Primary(id) => TaskId::Primary(id),
            Self::Fallback(id) => id,
        }
    }
}

/// Submits work to whichever concurrency model the host implements.
///
/// Every submission goes to the [`PrimaryScheduler`] first. If it answers
/// [`HostError::Unsupported`], the same task is reissued on the
/// [`RegionScheduler`] and the lane is remembered as partitioned, so later
/// submissions skip the primary attempt. Any other error is returned as is.
///
/// ```text
/// run_repeating(work, 20)
///   ├─ primary.run_task_timer(work, 20, 20) ─────────────► TaskId::Primary(n)
///   └─ Unsupported
///        └─ regions.global().run_at_fixed_rate(work, 20, 20)
///             └─ registry.allocate() + register(handle) ─► TaskId::Fallback(k)
/// ```
///
/// Region-model delays are clamped to at least one tick. The async scheduler
/// measures time in wall-clock units, so its delays are `ticks * tick_duration`.
pub struct TaskScheduler {
    primary: Arc<dyn PrimaryScheduler>,
    regions: Option<Arc<dyn RegionScheduler>>,
    registry: Arc<TaskRegistry>,
    config: SchedulerConfig,
    models: [ModelCell; 2],
}

impl TaskScheduler {
    /// Create a scheduler over a primary scheduler only.
    #[must_use]
    pub fn new(primary: Arc<dyn PrimaryScheduler>) -> Self {
        Self {
            primary,
            regions: None,
            registry: Arc::new(TaskRegistry::new()),
            config: SchedulerConfig::default(),
            models: [ModelCell::new(), ModelCell::new()],
        }
    }

    /// Add the region scheduler used when the primary declines.
    #[must_use]
    pub fn with_regions(mut self, regions: Arc<dyn RegionScheduler>) -> Self {
        self.regions = Some(regions);
        self
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Record the model of a lane up front instead of learning it on first use.
    ///
    /// Has no effect if the lane's model is already known.
    #[must_use]
    pub fn with_model(self, lane: Lane, model: HostModel) -> Self {
        self.models[lane.index()].learn(model);
        self
    }

    /// The primary scheduler.
    #[must_use]
    pub fn primary(&self) -> &dyn PrimaryScheduler {
        self.primary.as_ref()
    }

    /// The region scheduler, if configured.
    #[must_use]
    pub fn regions(&self) -> Option<&dyn RegionScheduler> {
        self.regions.as_deref()
    }

    /// Fallback id bookkeeping.
    #[must_use]
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Model detected for `lane`, if any submission has revealed it yet.
    ///
    /// The first answer sticks. A lane learned as [`HostModel::Primary`]
    /// still falls back per submission if the primary scheduler later
    /// declines, but the recorded model does not change.
    #[must_use]
    pub fn model(&self, lane: Lane) -> Option<HostModel> {
        self.models[lane.index()].get()
    }

    /// Run `work` once on the tick thread (or global tick thread).
    pub fn run_once<F>(&self, work: F) -> SchedResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let task = Task::once(work);
        let primary_task = task.clone();
        self.submit(
            Lane::Sync,
            "run_once",
            |primary| primary.run_task(primary_task),
            |regions| Ok(regions.global().execute(task)?),
        )
        .map(|_| ())
    }

    /// Run `work` once on the tick thread after `delay_ticks`.
    pub fn run_once_delayed<F>(&self, work: F, delay_ticks: u64) -> SchedResult<TaskId>
    where
        F: FnOnce() + Send + 'static,
    {
        let task = Task::once(work);
        let primary_task = task.clone();
        let ticks = SchedulerConfig::region_ticks(delay_ticks);
        self.submit(
            Lane::Sync,
            "run_once_delayed",
            |primary| primary.run_task_later(primary_task, delay_ticks),
            |regions| self.submit_one_shot(task, |task| regions.global().run_delayed(task, ticks)),
        )
        .map(Routed::task_id)
    }

    /// Run `work` on the tick thread every `period_ticks`, first after one period.
    pub fn run_repeating<F>(&self, work: F, period_ticks: u64) -> SchedResult<TaskId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let task = Task::new(work);
        let primary_task = task.clone();
        let ticks = SchedulerConfig::region_ticks(period_ticks);
        self.submit(
            Lane::Sync,
            "run_repeating",
            |primary| primary.run_task_timer(primary_task, period_ticks, period_ticks),
            |regions| {
                self.submit_repeating(|| regions.global().run_at_fixed_rate(task, ticks, ticks))
            },
        )
        .map(Routed::task_id)
    }

    /// Run `work` once on any worker.
    pub fn run_async_once<F>(&self, work: F) -> SchedResult<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let task = Task::once(work);
        let primary_task = task.clone();
        self.submit(
            Lane::Async,
            "run_async_once",
            |primary| primary.run_task_async(primary_task),
            |regions| {
                // No id is returned to the caller, so the handle is not kept
                regions.async_scheduler().run_now(task)?;
                Ok(())
            },
        )
        .map(|_| ())
    }

    /// Run `work` once on any worker after `delay_ticks`.
    pub fn run_async_delayed<F>(&self, work: F, delay_ticks: u64) -> SchedResult<TaskId>
    where
        F: FnOnce() + Send + 'static,
    {
        let task = Task::once(work);
        let primary_task = task.clone();
        let delay = self.config.region_duration(delay_ticks);
        self.submit(
            Lane::Async,
            "run_async_delayed",
            |primary| primary.run_task_later_async(primary_task, delay_ticks),
            |regions| {
                self.submit_one_shot(task, |task| {
                    regions.async_scheduler().run_delayed(task, delay)
                })
            },
        )
        .map(Routed::task_id)
    }

    /// Run `work` on any worker every `period_ticks`, first after one period.
    pub fn run_async_repeating<F>(&self, work: F, period_ticks: u64) -> SchedResult<TaskId>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let task = Task::new(work);
        let primary_task = task.clone();
        let period = self.config.region_duration(period_ticks);
        self.submit(
            Lane::Async,
            "run_async_repeating",
            |primary| primary.run_task_timer_async(primary_task, period_ticks, period_ticks),
            |regions| {
                self.submit_repeating(|| {
                    regions
                        .async_scheduler()
                        .run_at_fixed_rate(task, period, period)
                })
            },
        )
        .map(Routed::task_id)
    }

    /// Cancel a task from either backend. Unknown or finished ids are ignored.
    pub fn cancel(&self, id: TaskId) {
        self.registry.cancel(id, self.primary.as_ref());
    }

    /// Cancel a task by its raw integer encoding. `-1` means "no task".
    pub fn cancel_raw(&self, raw: i32) {
        if let Some(id) = TaskId::from_raw(raw) {
            self.cancel(id);
        }
    }

    /// Whether the caller runs on the tick thread, or on the region model's
    /// global tick thread.
    #[must_use]
    pub fn is_caller_on_primary_context(&self) -> bool {
        self.primary.is_primary_thread()
            || self
                .regions
                .as_ref()
                .is_some_and(|regions| regions.is_global_tick_thread())
    }

    fn submit<T>(
        &self,
        lane: Lane,
        operation: &'static str,
        primary: impl FnOnce(&dyn PrimaryScheduler) -> HostResult<u32>,
        fallback: impl FnOnce(&dyn RegionScheduler) -> SchedResult<T>,
    ) -> SchedResult<Routed<T>> {
        if self.model(lane) != Some(HostModel::Partitioned) {
            match primary(self.primary.as_ref()) {
                Ok(id) => {
                    self.learn(lane, HostModel::Primary);
                    return Ok(Routed::Primary(id));
                }
                Err(HostError::Unsupported(what)) => {
                    if self.model(lane) == Some(HostModel::Primary) {
                        warn!(
                            ?lane,
                            operation,
                            what,
                            "primary scheduler declined after accepting earlier work, using region scheduler"
                        );
                    } else {
                        debug!(operation, what, "primary scheduler declined, using region scheduler");
                        self.learn(lane, HostModel::Partitioned);
                    }
                }
                Err(error) => return Err(error.into()),
            }
        }

        let regions = self
            .regions
            .as_deref()
            .ok_or(SchedError::NoFallback { operation })?;
        fallback(regions).map(Routed::Fallback)
    }

    fn learn(&self, lane: Lane, model: HostModel) {
        if self.models[lane.index()].learn(model) {
            info!(?lane, ?model, "detected host scheduling model");
        }
    }

    /// Submit a one-shot task whose id is released once it has run.
    fn submit_one_shot(
        &self,
        task: Task,
        submit: impl FnOnce(Task) -> HostResult<Box<dyn ScheduledTask>>,
    ) -> SchedResult<TaskId> {
        let id = self.registry.allocate();
        let registry = Arc::clone(&self.registry);
        let wrapped = Task::new(move || {
            let _release = ForgetOnDrop {
                registry: &registry,
                id,
            };
            task.run();
        });

        match submit(wrapped) {
            Ok(handle) => {
                self.registry.register(id, handle);
                Ok(id)
            }
            Err(error) => {
                self.registry.release(id);
                Err(error.into())
            }
        }
    }

    fn submit_repeating(
        &self,
        submit: impl FnOnce() -> HostResult<Box<dyn ScheduledTask>>,
    ) -> SchedResult<TaskId> {
        let handle = submit()?;
        let id = self.registry.allocate();
        self.registry.register(id, handle);
        Ok(id)
    }
}

/// Releases a one-shot id when its task returns or unwinds.
struct ForgetOnDrop<'a> {
    registry: &'a TaskRegistry,
    id: TaskId,
}

impl Drop for ForgetOnDrop<'_> {
    fn drop(&mut self) {
        self.registry.forget(self.id);
    }
}

impl core::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("has_regions", &self.regions.is_some())
            .field("sync_model", &self.model(Lane::Sync))
            .field("async_model", &self.model(Lane::Async))
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}
