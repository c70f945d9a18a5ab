//! A host that partitions the world into regions, each ticking on its own
//! thread, plus a global thread for ownerless work.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, after, select};
use hashbrown::HashMap;
use parking_lot::Mutex;
use rgb_probe::{HostValue, ProbeError, ProbeResult, Reflect};
use rgb_tick::{
    AsyncScheduler, EntityAffinity, EntityScheduler, GlobalScheduler, HostError, HostResult,
    PrimaryScheduler, RegionScheduler, ScheduledTask, Task,
};
use tracing::{debug, trace, warn};

use crate::tick_loop::{Placement, SimHandle, TickThread, TimerQueue, drive, run_guarded};
use crate::{SimError, SimResult};

/// Name of the tick counter accessor the server exposes.
pub const TICK_METHOD: &str = "getTickCount";

/// Handle to an entity living in a [`RegionServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SimEntity(u64);

impl SimEntity {
    pub const fn id(self) -> u64 {
        self.0
    }
}

struct EntityTask {
    task: Task,
    retired: Task,
    due: u64,
}

struct EntityState {
    region: usize,
    retired: bool,
    pending: Vec<EntityTask>,
}

struct Shared {
    tick: AtomicU64,
    global: TimerQueue,
    entities: Mutex<HashMap<SimEntity, EntityState>>,
    next_entity: AtomicU64,
}

impl Shared {
    fn now(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    fn run_region(&self, region: usize, tick: u64) {
        let due: Vec<EntityTask> = {
            let mut entities = self.entities.lock();
            let mut due = Vec::new();
            for state in entities.values_mut() {
                if state.region != region || state.retired {
                    continue;
                }
                let (ready, later): (Vec<_>, Vec<_>) = core::mem::take(&mut state.pending)
                    .into_iter()
                    .partition(|task| task.due <= tick);
                state.pending = later;
                due.extend(ready);
            }
            due
        };

        if !due.is_empty() {
            trace!(region, tick, count = due.len(), "running entity tasks");
        }
        for task in due {
            run_guarded(&task.task);
        }
    }
}

/// Tasks for the global tick thread.
pub struct GlobalRegion {
    shared: Arc<Shared>,
}

impl GlobalScheduler for GlobalRegion {
    fn execute(&self, task: Task) -> HostResult<()> {
        self.shared
            .global
            .schedule(task, self.shared.now(), 0, None, Placement::Tick);
        Ok(())
    }

    fn run_delayed(&self, task: Task, delay_ticks: u64) -> HostResult<Box<dyn ScheduledTask>> {
        if delay_ticks == 0 {
            return Err(HostError::Rejected("delay must be at least one tick".to_owned()));
        }
        let handle = self.shared.global.schedule(
            task,
            self.shared.now(),
            delay_ticks,
            None,
            Placement::Tick,
        );
        Ok(Box::new(handle))
    }

    fn run_at_fixed_rate(
        &self,
        task: Task,
        initial_delay_ticks: u64,
        period_ticks: u64,
    ) -> HostResult<Box<dyn ScheduledTask>> {
        if initial_delay_ticks == 0 || period_ticks == 0 {
            return Err(HostError::Rejected(
                "delay and period must be at least one tick".to_owned(),
            ));
        }
        let handle = self.shared.global.schedule(
            task,
            self.shared.now(),
            initial_delay_ticks,
            Some(period_ticks),
            Placement::Tick,
        );
        Ok(Box::new(handle))
    }
}

/// Wall-clock scheduler backed by one thread per task.
///
/// Every pending task stops when the server is dropped.
pub struct AsyncPool {
    shutdown: Receiver<()>,
}

impl AsyncPool {
    fn spawn(
        &self,
        task: Task,
        delay: Option<Duration>,
        period: Option<Duration>,
    ) -> HostResult<Box<dyn ScheduledTask>> {
        let handle = SimHandle::default();
        let cancelled = handle.flag();
        let shutdown = self.shutdown.clone();

        let wait = move |duration: Duration| -> bool {
            select! {
                recv(shutdown) -> _ => false,
                recv(after(duration)) -> _ => !cancelled.load(Ordering::Acquire),
            }
        };

        thread::Builder::new()
            .name("sim-async".to_owned())
            .spawn(move || {
                if let Some(delay) = delay {
                    if !wait(delay) {
                        return;
                    }
                }
                run_guarded(&task);
                if let Some(period) = period {
                    while wait(period) {
                        run_guarded(&task);
                    }
                }
            })
            .map_err(|error| HostError::Failed(error.to_string()))?;

        Ok(Box::new(handle))
    }
}

impl AsyncScheduler for AsyncPool {
    fn run_now(&self, task: Task) -> HostResult<Box<dyn ScheduledTask>> {
        self.spawn(task, None, None)
    }

    fn run_delayed(&self, task: Task, delay: Duration) -> HostResult<Box<dyn ScheduledTask>> {
        self.spawn(task, Some(delay), None)
    }

    fn run_at_fixed_rate(
        &self,
        task: Task,
        initial_delay: Duration,
        period: Duration,
    ) -> HostResult<Box<dyn ScheduledTask>> {
        self.spawn(task, Some(initial_delay), Some(period))
    }
}

/// Per-entity scheduler; tasks follow the entity between regions.
pub struct SimEntityScheduler {
    shared: Arc<Shared>,
    entity: SimEntity,
}

impl EntityScheduler for SimEntityScheduler {
    fn execute(&self, task: Task, retired: Task, delay_ticks: u64) -> bool {
        let due = self.shared.now() + delay_ticks.max(1);
        let mut entities = self.shared.entities.lock();
        match entities.get_mut(&self.entity) {
            Some(state) if !state.retired => {
                state.pending.push(EntityTask { task, retired, due });
                true
            }
            _ => false,
        }
    }
}

/// Region-partitioned host.
///
/// Ticks only advance through [`step`](Self::step): each tick runs the
/// global thread first, then every region thread in parallel. Entities are
/// owned by exactly one region; their tasks run on that region's thread.
/// The legacy [`PrimaryScheduler`] surface declines every call.
pub struct RegionServer {
    shared: Arc<Shared>,
    global_scheduler: GlobalRegion,
    async_pool: AsyncPool,
    global: TickThread,
    regions: Vec<TickThread>,
    _shutdown: Sender<()>,
}

impl RegionServer {
    /// Start a server with `regions` region threads (at least one).
    pub fn start(regions: usize) -> SimResult<Self> {
        let shared = Arc::new(Shared {
            tick: AtomicU64::new(0),
            global: TimerQueue::default(),
            entities: Mutex::new(HashMap::new()),
            next_entity: AtomicU64::new(1),
        });

        let body = Arc::clone(&shared);
        let global = TickThread::spawn("sim-global".to_owned(), move |tick| {
            body.global.run_due(tick);
        })?;

        let regions = (0..regions.max(1))
            .map(|index| {
                let body = Arc::clone(&shared);
                TickThread::spawn(format!("sim-region-{index}"), move |tick| {
                    body.run_region(index, tick);
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (shutdown_tx, shutdown) = crossbeam_channel::bounded(0);
        debug!(regions = regions.len(), "region server started");

        Ok(Self {
            global_scheduler: GlobalRegion {
                shared: Arc::clone(&shared),
            },
            async_pool: AsyncPool { shutdown },
            shared,
            global,
            regions,
            _shutdown: shutdown_tx,
        })
    }

    /// Advance `ticks` ticks, returning once every thread has finished the last one.
    ///
    /// Must not be called from one of the server's threads.
    pub fn step(&self, ticks: u64) {
        if self.is_server_thread() {
            warn!("step called from a server thread, ignoring");
            return;
        }
        for _ in 0..ticks {
            let tick = self.shared.tick.fetch_add(1, Ordering::AcqRel) + 1;
            let _ = self.global.tick(tick).recv();
            let finished: Vec<_> = self.regions.iter().map(|region| region.tick(tick)).collect();
            for done in finished {
                let _ = done.recv();
            }
        }
    }

    /// Run `work` on another thread, stepping one tick at a time until it returns.
    ///
    /// Lets a test block on work that needs ticks to make progress.
    pub fn drive<T: Send>(&self, work: impl FnOnce() -> T + Send) -> T {
        drive(|| self.step(1), work)
    }

    pub fn current_tick(&self) -> u64 {
        self.shared.now()
    }

    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Region whose thread is the caller, if any.
    pub fn current_region(&self) -> Option<usize> {
        self.regions.iter().position(TickThread::is_current)
    }

    /// Add an entity owned by `region`.
    pub fn spawn_entity(&self, region: usize) -> SimResult<SimEntity> {
        self.check_region(region)?;
        let entity = SimEntity(self.shared.next_entity.fetch_add(1, Ordering::Relaxed));
        self.shared.entities.lock().insert(
            entity,
            EntityState {
                region,
                retired: false,
                pending: Vec::new(),
            },
        );
        Ok(entity)
    }

    /// Hand `entity` to another region; its pending tasks go with it.
    pub fn move_entity(&self, entity: SimEntity, region: usize) -> SimResult<()> {
        self.check_region(region)?;
        let mut entities = self.shared.entities.lock();
        let state = entities
            .get_mut(&entity)
            .ok_or(SimError::UnknownEntity(entity.0))?;
        state.region = region;
        Ok(())
    }

    /// Remove `entity`. Pending tasks do not run; their retirement callbacks do.
    pub fn retire_entity(&self, entity: SimEntity) -> SimResult<()> {
        let pending = {
            let mut entities = self.shared.entities.lock();
            let state = entities
                .get_mut(&entity)
                .ok_or(SimError::UnknownEntity(entity.0))?;
            state.retired = true;
            core::mem::take(&mut state.pending)
        };

        debug!(entity = entity.0, pending = pending.len(), "entity retired");
        for task in pending {
            run_guarded(&task.retired);
        }
        Ok(())
    }

    /// Region owning `entity`, if it is alive.
    pub fn region_of(&self, entity: SimEntity) -> Option<usize> {
        self.shared
            .entities
            .lock()
            .get(&entity)
            .filter(|state| !state.retired)
            .map(|state| state.region)
    }

    /// Global tasks still queued, including repeating ones.
    pub fn pending_global(&self) -> usize {
        self.shared.global.len()
    }

    fn check_region(&self, index: usize) -> SimResult<()> {
        if index < self.regions.len() {
            Ok(())
        } else {
            Err(SimError::NoSuchRegion {
                index,
                count: self.regions.len(),
            })
        }
    }

    fn is_server_thread(&self) -> bool {
        self.global.is_current() || self.current_region().is_some()
    }
}

impl PrimaryScheduler for RegionServer {
    fn run_task(&self, _task: Task) -> HostResult<u32> {
        Err(HostError::Unsupported("run_task"))
    }

    fn run_task_later(&self, _task: Task, _delay_ticks: u64) -> HostResult<u32> {
        Err(HostError::Unsupported("run_task_later"))
    }

    fn run_task_timer(&self, _task: Task, _delay_ticks: u64, _period_ticks: u64) -> HostResult<u32> {
        Err(HostError::Unsupported("run_task_timer"))
    }

    fn run_task_async(&self, _task: Task) -> HostResult<u32> {
        Err(HostError::Unsupported("run_task_async"))
    }

    fn run_task_later_async(&self, _task: Task, _delay_ticks: u64) -> HostResult<u32> {
        Err(HostError::Unsupported("run_task_later_async"))
    }

    fn run_task_timer_async(
        &self,
        _task: Task,
        _delay_ticks: u64,
        _period_ticks: u64,
    ) -> HostResult<u32> {
        Err(HostError::Unsupported("run_task_timer_async"))
    }

    fn cancel_task(&self, _id: u32) {}

    fn is_primary_thread(&self) -> bool {
        false
    }
}

impl RegionScheduler for RegionServer {
    fn global(&self) -> &dyn GlobalScheduler {
        &self.global_scheduler
    }

    fn async_scheduler(&self) -> &dyn AsyncScheduler {
        &self.async_pool
    }

    fn is_global_tick_thread(&self) -> bool {
        self.global.is_current()
    }
}

impl EntityAffinity<SimEntity> for RegionServer {
    fn is_owned_by_current_region(&self, entity: &SimEntity) -> bool {
        match (self.current_region(), self.region_of(*entity)) {
            (Some(current), Some(owner)) => current == owner,
            _ => false,
        }
    }

    fn entity_scheduler(&self, entity: &SimEntity) -> Option<Arc<dyn EntityScheduler>> {
        if !self.shared.entities.lock().contains_key(entity) {
            return None;
        }
        Some(Arc::new(SimEntityScheduler {
            shared: Arc::clone(&self.shared),
            entity: *entity,
        }))
    }
}

impl Reflect for RegionServer {
    fn has_field(&self, _name: &str) -> bool {
        false
    }

    fn has_method(&self, name: &str) -> bool {
        name == TICK_METHOD
    }

    fn read_field(&self, name: &str) -> ProbeResult<HostValue> {
        Err(ProbeError::NoSuchMember(name.to_owned()))
    }

    fn invoke(&self, name: &str) -> ProbeResult<HostValue> {
        match name {
            TICK_METHOD => Ok(HostValue::from(self.current_tick())),
            other => Err(ProbeError::NoSuchMember(other.to_owned())),
        }
    }
}

impl core::fmt::Debug for RegionServer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegionServer")
            .field("tick", &self.current_tick())
            .field("regions", &self.regions.len())
            .finish_non_exhaustive()
    }
}
