//! Threads driven one tick at a time and the timed queues they drain.

use std::io;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use rgb_tick::{ScheduledTask, Task};
use tracing::{trace, warn};

enum Command {
    Tick(u64, Sender<()>),
    Stop,
}

/// A named thread that runs its body once per tick it is sent.
pub(crate) struct TickThread {
    commands: Sender<Command>,
    id: ThreadId,
    handle: Option<JoinHandle<()>>,
}

impl TickThread {
    pub(crate) fn spawn(name: String, mut body: impl FnMut(u64) + Send + 'static) -> io::Result<Self> {
        let (commands, rx) = crossbeam_channel::unbounded::<Command>();
        let handle = thread::Builder::new().name(name).spawn(move || {
            for command in rx {
                match command {
                    Command::Tick(tick, done) => {
                        body(tick);
                        let _ = done.send(());
                    }
                    Command::Stop => break,
                }
            }
        })?;

        Ok(Self {
            commands,
            id: handle.thread().id(),
            handle: Some(handle),
        })
    }

    pub(crate) fn is_current(&self) -> bool {
        thread::current().id() == self.id
    }

    /// Start tick `tick`; the returned channel yields once it has finished.
    pub(crate) fn tick(&self, tick: u64) -> Receiver<()> {
        let (done, finished) = crossbeam_channel::bounded(1);
        if self.commands.send(Command::Tick(tick, done)).is_err() {
            warn!(tick, "tick thread is gone");
        }
        finished
    }
}

impl Drop for TickThread {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Stop);
        if let Some(handle) = self.handle.take() {
            if !self.is_current() && handle.join().is_err() {
                warn!("tick thread panicked");
            }
        }
    }
}

/// Cancellation handle returned by simulated schedulers.
#[derive(Debug, Clone, Default)]
pub struct SimHandle {
    cancelled: Arc<AtomicBool>,
}

impl SimHandle {
    pub(crate) fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancelled)
    }
}

impl ScheduledTask for SimHandle {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Where a due task runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Placement {
    /// On the draining tick thread.
    Tick,
    /// On a short-lived worker thread, joined before the tick ends.
    Worker,
}

struct Timed {
    task: Task,
    due: u64,
    period: Option<u64>,
    placement: Placement,
    handle: SimHandle,
}

/// Tasks keyed by the tick they become due on.
#[derive(Default)]
pub(crate) struct TimerQueue {
    entries: Mutex<Vec<Timed>>,
}

impl TimerQueue {
    /// Queue `task` to run `delay` ticks after `now` (at least one), then
    /// every `period` ticks if given.
    pub(crate) fn schedule(
        &self,
        task: Task,
        now: u64,
        delay: u64,
        period: Option<u64>,
        placement: Placement,
    ) -> SimHandle {
        let handle = SimHandle::default();
        self.entries.lock().push(Timed {
            task,
            due: now + delay.max(1),
            period: period.map(|period| period.max(1)),
            placement,
            handle: handle.clone(),
        });
        handle
    }

    /// Run every task due at `now`, then requeue the periodic ones.
    pub(crate) fn run_due(&self, now: u64) {
        let due: Vec<Timed> = {
            let mut entries = self.entries.lock();
            entries.retain(|timed| !timed.handle.is_cancelled());
            let (due, later): (Vec<_>, Vec<_>) = core::mem::take(&mut *entries)
                .into_iter()
                .partition(|timed| timed.due <= now);
            *entries = later;
            due
        };

        if due.is_empty() {
            return;
        }
        trace!(tick = now, count = due.len(), "running due tasks");

        thread::scope(|scope| {
            for timed in &due {
                if timed.handle.is_cancelled() {
                    continue;
                }
                match timed.placement {
                    Placement::Tick => run_guarded(&timed.task),
                    Placement::Worker => {
                        let task = &timed.task;
                        scope.spawn(move || run_guarded(task));
                    }
                }
            }
        });

        let mut entries = self.entries.lock();
        for mut timed in due {
            if let Some(period) = timed.period {
                if !timed.handle.is_cancelled() {
                    timed.due = now + period;
                    entries.push(timed);
                }
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

/// Run a task, logging instead of unwinding through the tick thread.
pub(crate) fn run_guarded(task: &Task) {
    if catch_unwind(AssertUnwindSafe(|| task.run())).is_err() {
        warn!("scheduled task panicked");
    }
}

/// Pause between ticks while [`drive`] waits on its worker.
const DRIVE_INTERVAL: Duration = Duration::from_millis(1);

/// Run `work` on a scoped thread and call `step` until it returns.
pub(crate) fn drive<T: Send>(step: impl Fn(), work: impl FnOnce() -> T + Send) -> T {
    thread::scope(|scope| {
        let worker = scope.spawn(work);
        while !worker.is_finished() {
            step();
            thread::sleep(DRIVE_INTERVAL);
        }
        match worker.join() {
            Ok(value) => value,
            Err(payload) => resume_unwind(payload),
        }
    })
}
