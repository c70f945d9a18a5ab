//! A host with one tick thread that runs every synchronous task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::Mutex;
use rgb_probe::{HostValue, ProbeError, ProbeResult, Reflect};
use rgb_tick::{HostError, HostResult, PrimaryScheduler, ScheduledTask, Task};
use tracing::{debug, warn};

use crate::SimResult;
use crate::tick_loop::{Placement, SimHandle, TickThread, TimerQueue, drive};

/// Name of the tick counter field the server exposes.
pub const TICK_FIELD: &str = "currentTick";

struct Shared {
    tick: AtomicU64,
    next_id: AtomicU32,
    queue: TimerQueue,
    tasks: Mutex<HashMap<u32, SimHandle>>,
    disabled: AtomicBool,
}

/// Single-threaded global-tick host.
///
/// Ticks only advance through [`step`](Self::step). Synchronous tasks run on
/// the tick thread; async tasks run on worker threads started and joined
/// within the tick they fall due in. Delays are in ticks, and a delay of zero
/// means the next tick.
pub struct TickServer {
    shared: Arc<Shared>,
    thread: TickThread,
}

impl TickServer {
    pub fn start() -> SimResult<Self> {
        let shared = Arc::new(Shared {
            tick: AtomicU64::new(0),
            next_id: AtomicU32::new(0),
            queue: TimerQueue::default(),
            tasks: Mutex::new(HashMap::new()),
            disabled: AtomicBool::new(false),
        });

        let body = Arc::clone(&shared);
        let thread = TickThread::spawn("sim-tick".to_owned(), move |tick| {
            body.queue.run_due(tick);
        })?;

        debug!("tick server started");
        Ok(Self { shared, thread })
    }

    /// Advance `ticks` ticks, returning once the last one has finished.
    ///
    /// Must not be called from the tick thread.
    pub fn step(&self, ticks: u64) {
        if self.thread.is_current() {
            warn!("step called from the tick thread, ignoring");
            return;
        }
        for _ in 0..ticks {
            let tick = self.shared.tick.fetch_add(1, Ordering::AcqRel) + 1;
            let _ = self.thread.tick(tick).recv();
        }
    }

    /// Run `work` on another thread, stepping one tick at a time until it returns.
    ///
    /// Lets a test block on work that needs ticks to make progress.
    pub fn drive<T: Send>(&self, work: impl FnOnce() -> T + Send) -> T {
        drive(|| self.step(1), work)
    }

    /// Number of ticks completed or in progress.
    pub fn current_tick(&self) -> u64 {
        self.shared.tick.load(Ordering::Acquire)
    }

    /// Reject every later submission, like a host unloading the caller.
    pub fn disable(&self) {
        self.shared.disabled.store(true, Ordering::Release);
    }

    /// Tasks still queued, including repeating ones.
    pub fn pending(&self) -> usize {
        self.shared.queue.len()
    }

    fn submit(
        &self,
        task: Task,
        delay: u64,
        period: Option<u64>,
        placement: Placement,
    ) -> HostResult<u32> {
        if self.shared.disabled.load(Ordering::Acquire) {
            return Err(HostError::Rejected("server is disabled".to_owned()));
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = self
            .shared
            .queue
            .schedule(task, self.current_tick(), delay, period, placement);
        self.shared.tasks.lock().insert(id, handle);
        Ok(id)
    }
}

impl PrimaryScheduler for TickServer {
    fn run_task(&self, task: Task) -> HostResult<u32> {
        self.submit(task, 0, None, Placement::Tick)
    }

    fn run_task_later(&self, task: Task, delay_ticks: u64) -> HostResult<u32> {
        self.submit(task, delay_ticks, None, Placement::Tick)
    }

    fn run_task_timer(&self, task: Task, delay_ticks: u64, period_ticks: u64) -> HostResult<u32> {
        self.submit(task, delay_ticks, Some(period_ticks), Placement::Tick)
    }

    fn run_task_async(&self, task: Task) -> HostResult<u32> {
        self.submit(task, 0, None, Placement::Worker)
    }

    fn run_task_later_async(&self, task: Task, delay_ticks: u64) -> HostResult<u32> {
        self.submit(task, delay_ticks, None, Placement::Worker)
    }

    fn run_task_timer_async(
        &self,
        task: Task,
        delay_ticks: u64,
        period_ticks: u64,
    ) -> HostResult<u32> {
        self.submit(task, delay_ticks, Some(period_ticks), Placement::Worker)
    }

    fn cancel_task(&self, id: u32) {
        if let Some(handle) = self.shared.tasks.lock().remove(&id) {
            handle.cancel();
        }
    }

    fn is_primary_thread(&self) -> bool {
        self.thread.is_current()
    }
}

impl Reflect for TickServer {
    fn has_field(&self, name: &str) -> bool {
        name == TICK_FIELD
    }

    fn read_field(&self, name: &str) -> ProbeResult<HostValue> {
        match name {
            TICK_FIELD => Ok(HostValue::from(self.current_tick())),
            other => Err(ProbeError::NoSuchMember(other.to_owned())),
        }
    }
}

impl core::fmt::Debug for TickServer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TickServer")
            .field("tick", &self.current_tick())
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}
