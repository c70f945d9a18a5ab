//! Running work on the thread that owns an entity and waiting for the result.

use core::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_channel::{Receiver, Sender, select};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::{AffinityError, EntityAffinity, Task, TaskScheduler};

/// Delay, in ticks, before an entity task runs on its owner.
const ENTITY_DELAY_TICKS: u64 = 1;

type Outcome<T> = Result<T, AffinityError>;

/// Cooperative interruption for a blocked
/// [`EntityExecutor::run_on_owner_and_wait_interruptibly`] call.
///
/// Clones share state. Once interrupted, a token stays interrupted.
#[derive(Clone)]
pub struct InterruptToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    interrupted: AtomicBool,
    // Dropped on interrupt; every waiter selecting on `signal` wakes up.
    trigger: Mutex<Option<Sender<()>>>,
    signal: Receiver<()>,
}

impl InterruptToken {
    #[must_use]
    pub fn new() -> Self {
        let (trigger, signal) = crossbeam_channel::bounded(0);
        Self {
            inner: Arc::new(TokenInner {
                interrupted: AtomicBool::new(false),
                trigger: Mutex::new(Some(trigger)),
                signal,
            }),
        }
    }

    /// Wake every waiter using this token.
    pub fn interrupt(&self) {
        self.inner.interrupted.store(true, Ordering::Release);
        drop(self.inner.trigger.lock().take());
    }

    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.inner.interrupted.load(Ordering::Acquire)
    }
}

impl Default for InterruptToken {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for InterruptToken {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InterruptToken")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

/// Single-assignment slot shared by the task and its retirement callback.
///
/// Whichever resolves first wins; later outcomes are dropped.
struct ResultSlot<T> {
    resolved: AtomicBool,
    tx: Sender<Outcome<T>>,
}

impl<T> ResultSlot<T> {
    fn new(tx: Sender<Outcome<T>>) -> Self {
        Self {
            resolved: AtomicBool::new(false),
            tx,
        }
    }

    fn resolve(&self, outcome: Outcome<T>) {
        if self.resolved.swap(true, Ordering::AcqRel) {
            return;
        }
        // The waiter may have given up; the outcome is discarded then.
        let _ = self.tx.try_send(outcome);
    }
}

/// Runs work on the thread that owns an entity, blocking the caller until
/// the work has run.
///
/// On a region-partitioned host the work goes to the entity's own scheduler.
/// If the entity is removed before the work runs, the call resolves with
/// [`AffinityError::OwnerRetired`] instead of waiting forever. Hosts without
/// entity ownership get the work through [`TaskScheduler::run_once`].
///
/// A panic in the work is caught on the owning thread and returned as
/// [`AffinityError::TaskPanicked`].
pub struct EntityExecutor<E: ?Sized + 'static> {
    scheduler: Arc<TaskScheduler>,
    affinity: Option<Arc<dyn EntityAffinity<E>>>,
}

impl<E: ?Sized + 'static> EntityExecutor<E> {
    #[must_use]
    pub fn new(scheduler: Arc<TaskScheduler>) -> Self {
        Self {
            scheduler,
            affinity: None,
        }
    }

    /// Use the host's entity ownership.
    #[must_use]
    pub fn with_affinity(mut self, affinity: Arc<dyn EntityAffinity<E>>) -> Self {
        self.affinity = Some(affinity);
        self
    }

    #[must_use]
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.scheduler
    }

    /// Whether work for `entity` may run inline on the calling thread.
    #[must_use]
    pub fn is_owning_thread(&self, entity: &E) -> bool {
        self.scheduler.primary().is_primary_thread()
            || self
                .affinity
                .as_ref()
                .is_some_and(|affinity| affinity.is_owned_by_current_region(entity))
    }

    /// Run `work` on the owner of `entity` and wait for its result.
    ///
    /// Runs inline when the caller already owns the entity. There is no
    /// timeout.
    pub fn run_on_owner_and_wait<T, F>(&self, entity: &E, work: F) -> Result<T, AffinityError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_owning_thread(entity) {
            return run_captured(work);
        }

        let rx = self.dispatch(entity, work)?;
        rx.recv().unwrap_or(Err(AffinityError::OwnerRetired))
    }

    /// Like [`run_on_owner_and_wait`](Self::run_on_owner_and_wait), but
    /// returns [`AffinityError::Interrupted`] once `interrupt` fires.
    ///
    /// The submitted work is not cancelled; its result is discarded.
    pub fn run_on_owner_and_wait_interruptibly<T, F>(
        &self,
        entity: &E,
        work: F,
        interrupt: &InterruptToken,
    ) -> Result<T, AffinityError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_owning_thread(entity) {
            return run_captured(work);
        }

        let rx = self.dispatch(entity, work)?;
        if let Ok(outcome) = rx.try_recv() {
            return outcome;
        }
        if interrupt.is_interrupted() {
            return Err(AffinityError::Interrupted);
        }

        select! {
            recv(rx) -> outcome => outcome.unwrap_or(Err(AffinityError::OwnerRetired)),
            recv(interrupt.inner.signal) -> _ => {
                trace!("entity task wait interrupted");
                Err(AffinityError::Interrupted)
            }
        }
    }

    /// Submit `work` and hand back the receiving end of its result slot.
    ///
    /// The slot itself lives only in the submitted callbacks, so a host that
    /// drops both without running either disconnects the receiver.
    fn dispatch<T, F>(&self, entity: &E, work: F) -> Result<Receiver<Outcome<T>>, AffinityError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let slot = Arc::new(ResultSlot::new(tx));

        let run_slot = Arc::clone(&slot);
        let task = Task::once(move || run_slot.resolve(run_captured(work)));

        let entity_scheduler = self
            .affinity
            .as_ref()
            .and_then(|affinity| affinity.entity_scheduler(entity));

        match entity_scheduler {
            Some(entity_scheduler) => {
                let retired_slot = Arc::clone(&slot);
                let retired = Task::once(move || {
                    debug!("entity retired before its task ran");
                    retired_slot.resolve(Err(AffinityError::OwnerRetired));
                });

                if !entity_scheduler.execute(task, retired, ENTITY_DELAY_TICKS) {
                    debug!("entity already retired, task not scheduled");
                    slot.resolve(Err(AffinityError::OwnerRetired));
                }
            }
            None => {
                self.scheduler.run_once(move || task.run())?;
            }
        }

        Ok(rx)
    }
}

impl<E: ?Sized + 'static> core::fmt::Debug for EntityExecutor<E> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EntityExecutor")
            .field("scheduler", &self.scheduler)
            .field("has_affinity", &self.affinity.is_some())
            .finish()
    }
}

fn run_captured<T>(work: impl FnOnce() -> T) -> Outcome<T> {
    catch_unwind(AssertUnwindSafe(work))
        .map_err(|payload| AffinityError::TaskPanicked(panic_message(&*payload)))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{EntityScheduler, HostError, HostResult, PrimaryScheduler, SchedError};

    struct Mob;

    /// Primary scheduler that runs `run_task` on a fresh thread.
    #[derive(Default)]
    struct Primary {
        on_primary: bool,
        unsupported: bool,
    }

    impl PrimaryScheduler for Primary {
        fn run_task(&self, task: Task) -> HostResult<u32> {
            if self.unsupported {
                return Err(HostError::Unsupported("legacy scheduler"));
            }
            thread::spawn(move || task.run());
            Ok(0)
        }

        fn run_task_later(&self, _task: Task, _delay: u64) -> HostResult<u32> {
            Err(HostError::Unsupported("legacy scheduler"))
        }

        fn run_task_timer(&self, _task: Task, _delay: u64, _period: u64) -> HostResult<u32> {
            Err(HostError::Unsupported("legacy scheduler"))
        }

        fn run_task_async(&self, _task: Task) -> HostResult<u32> {
            Err(HostError::Unsupported("legacy scheduler"))
        }

        fn run_task_later_async(&self, _task: Task, _delay: u64) -> HostResult<u32> {
            Err(HostError::Unsupported("legacy scheduler"))
        }

        fn run_task_timer_async(&self, _task: Task, _delay: u64, _period: u64) -> HostResult<u32> {
            Err(HostError::Unsupported("legacy scheduler"))
        }

        fn cancel_task(&self, _id: u32) {}

        fn is_primary_thread(&self) -> bool {
            self.on_primary
        }
    }

    enum Owner {
        /// Runs the task on another thread.
        Thread,
        /// Reports the entity as already gone.
        Gone,
        /// Accepts the task, then retires the entity instead of running it.
        Retiring,
        /// Accepts the task and silently drops both callbacks.
        Dropping,
        /// Accepts the task and keeps it without running it.
        Holding(Mutex<Vec<Task>>),
    }

    impl EntityScheduler for Owner {
        fn execute(&self, task: Task, retired: Task, delay_ticks: u64) -> bool {
            assert_eq!(delay_ticks, ENTITY_DELAY_TICKS);
            match self {
                Self::Thread => {
                    thread::spawn(move || task.run());
                    true
                }
                Self::Gone => false,
                Self::Retiring => {
                    thread::spawn(move || retired.run());
                    true
                }
                Self::Dropping => true,
                Self::Holding(held) => {
                    held.lock().push(task);
                    true
                }
            }
        }
    }

    struct Affinity {
        owned: bool,
        owner: Option<Arc<Owner>>,
    }

    impl EntityAffinity<Mob> for Affinity {
        fn is_owned_by_current_region(&self, _entity: &Mob) -> bool {
            self.owned
        }

        fn entity_scheduler(&self, _entity: &Mob) -> Option<Arc<dyn EntityScheduler>> {
            self.owner
                .clone()
                .map(|owner| owner as Arc<dyn EntityScheduler>)
        }
    }

    fn executor(primary: Primary, affinity: Option<Affinity>) -> EntityExecutor<Mob> {
        let scheduler = Arc::new(TaskScheduler::new(Arc::new(primary)));
        let executor = EntityExecutor::new(scheduler);
        match affinity {
            Some(affinity) => executor.with_affinity(Arc::new(affinity)),
            None => executor,
        }
    }

    fn remote(owner: Owner) -> EntityExecutor<Mob> {
        executor(
            Primary::default(),
            Some(Affinity {
                owned: false,
                owner: Some(Arc::new(owner)),
            }),
        )
    }

    #[test]
    fn test_runs_inline_on_primary_thread() {
        let executor = executor(
            Primary {
                on_primary: true,
                unsupported: true,
            },
            None,
        );
        let caller = thread::current().id();

        let ran_on = executor
            .run_on_owner_and_wait(&Mob, || thread::current().id())
            .unwrap();

        assert_eq!(ran_on, caller);
    }

    #[test]
    fn test_runs_inline_in_owning_region() {
        let executor = executor(
            Primary::default(),
            Some(Affinity {
                owned: true,
                owner: Some(Arc::new(Owner::Gone)),
            }),
        );
        let caller = thread::current().id();

        let ran_on = executor
            .run_on_owner_and_wait(&Mob, || thread::current().id())
            .unwrap();

        assert_eq!(ran_on, caller);
    }

    #[test]
    fn test_runs_on_owner_thread_exactly_once() {
        let executor = remote(Owner::Thread);
        let runs = Arc::new(AtomicUsize::new(0));
        let caller = thread::current().id();

        let counter = Arc::clone(&runs);
        let ran_on = executor
            .run_on_owner_and_wait(&Mob, move || {
                counter.fetch_add(1, Ordering::SeqCst);
                thread::current().id()
            })
            .unwrap();

        assert_ne!(ran_on, caller);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_without_affinity_uses_run_once() {
        let executor = executor(Primary::default(), None);

        assert_eq!(executor.run_on_owner_and_wait(&Mob, || 6 * 7), Ok(42));
    }

    #[test]
    fn test_submission_failure_is_reported() {
        let executor = executor(
            Primary {
                on_primary: false,
                unsupported: true,
            },
            None,
        );

        assert_eq!(
            executor.run_on_owner_and_wait(&Mob, || ()),
            Err(AffinityError::Schedule(SchedError::NoFallback {
                operation: "run_once"
            }))
        );
    }

    #[test]
    fn test_entity_already_retired() {
        let executor = remote(Owner::Gone);

        assert_eq!(
            executor.run_on_owner_and_wait(&Mob, || ()),
            Err(AffinityError::OwnerRetired)
        );
    }

    #[test]
    fn test_entity_retires_before_running() {
        let executor = remote(Owner::Retiring);

        assert_eq!(
            executor.run_on_owner_and_wait(&Mob, || ()),
            Err(AffinityError::OwnerRetired)
        );
    }

    #[test]
    fn test_dropped_callbacks_do_not_hang() {
        let executor = remote(Owner::Dropping);

        assert_eq!(
            executor.run_on_owner_and_wait(&Mob, || ()),
            Err(AffinityError::OwnerRetired)
        );
    }

    #[test]
    fn test_panic_is_captured_on_owner() {
        let executor = remote(Owner::Thread);

        let result: Outcome<()> = executor.run_on_owner_and_wait(&Mob, || panic!("boom"));

        assert_eq!(result, Err(AffinityError::TaskPanicked("boom".to_owned())));
    }

    #[test]
    fn test_panic_is_captured_inline() {
        let executor = executor(
            Primary {
                on_primary: true,
                unsupported: false,
            },
            None,
        );
        let index = 7;

        let result: Outcome<()> =
            executor.run_on_owner_and_wait(&Mob, move || panic!("index {index} out of range"));

        assert_eq!(
            result,
            Err(AffinityError::TaskPanicked("index 7 out of range".to_owned()))
        );
    }

    #[test]
    fn test_interrupt_before_wait() {
        let owner = Arc::new(Owner::Holding(Mutex::new(Vec::new())));
        let executor = executor(
            Primary::default(),
            Some(Affinity {
                owned: false,
                owner: Some(Arc::clone(&owner)),
            }),
        );
        let token = InterruptToken::new();
        token.interrupt();

        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let result = executor.run_on_owner_and_wait_interruptibly(
            &Mob,
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
            },
            &token,
        );

        assert_eq!(result, Err(AffinityError::Interrupted));
        assert!(token.is_interrupted());

        // The task still runs later; its result goes nowhere.
        let Owner::Holding(held) = owner.as_ref() else {
            unreachable!()
        };
        for task in held.lock().drain(..) {
            task.run();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_interrupt_wakes_blocked_waiter() {
        let executor = remote(Owner::Holding(Mutex::new(Vec::new())));
        let token = InterruptToken::new();

        let interrupter = token.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            interrupter.interrupt();
        });

        let result = executor.run_on_owner_and_wait_interruptibly(&Mob, || (), &token);
        handle.join().unwrap();

        assert_eq!(result, Err(AffinityError::Interrupted));
    }

    #[test]
    fn test_interruptible_wait_returns_result() {
        let executor = remote(Owner::Thread);
        let token = InterruptToken::default();

        assert_eq!(
            executor.run_on_owner_and_wait_interruptibly(&Mob, || "done", &token),
            Ok("done")
        );
        assert!(!token.is_interrupted());
    }

    #[test]
    fn test_slot_resolves_once() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let slot = ResultSlot::new(tx);

        slot.resolve(Ok(1));
        slot.resolve(Err(AffinityError::OwnerRetired));

        assert_eq!(rx.recv(), Ok(Ok(1)));
        assert!(rx.try_recv().is_err());
    }
}
