//! One id space for tasks from both backends.

use std::sync::atomic::{AtomicU32, Ordering};

use hashbrown::HashMap;
use parking_lot::Mutex;
use tracing::trace;

use crate::{PrimaryScheduler, ScheduledTask, TaskId};

enum Slot {
    /// Allocated, handle not registered yet.
    Pending,
    /// Cancellable region-model task.
    Live(Box<dyn ScheduledTask>),
    /// A one-shot task that finished before its handle was registered.
    Finished,
}

/// Allocates fallback task ids and routes cancellation.
///
/// Region-model handles cannot be expressed as host task ids, so each one is
/// stored here under a freshly allocated [`TaskId::Fallback`]. Primary ids
/// are never stored; cancelling one goes straight to the primary scheduler.
pub struct TaskRegistry {
    next: AtomicU32,
    slots: Mutex<HashMap<u32, Slot>>,
}

impl TaskRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Allocate a fallback id that has never been handed out before.
    ///
    /// The id stays reserved until it is registered, forgotten or released.
    pub fn allocate(&self) -> TaskId {
        let seq = self.next.fetch_add(1, Ordering::Relaxed);
        self.slots.lock().insert(seq, Slot::Pending);
        TaskId::Fallback(seq)
    }

    /// Store the cancellation handle for a fallback id.
    ///
    /// Primary ids are ignored. If the task already reported completion
    /// through [`forget`](Self::forget), the handle is dropped instead.
    pub fn register(&self, id: TaskId, handle: Box<dyn ScheduledTask>) {
        let TaskId::Fallback(seq) = id else {
            return;
        };

        let mut slots = self.slots.lock();
        match slots.remove(&seq) {
            Some(Slot::Finished) => trace!(%id, "task finished before registration"),
            Some(Slot::Pending | Slot::Live(_)) | None => {
                slots.insert(seq, Slot::Live(handle));
            }
        }
    }

    /// Drop the handle of a one-shot task that has run.
    ///
    /// Leaves a marker only when the handle is still to be registered, so
    /// ids that were cancelled mid-run leave nothing behind.
    pub fn forget(&self, id: TaskId) {
        let TaskId::Fallback(seq) = id else {
            return;
        };

        let mut slots = self.slots.lock();
        match slots.remove(&seq) {
            // Completion raced ahead of `register`
            Some(Slot::Pending | Slot::Finished) => {
                slots.insert(seq, Slot::Finished);
            }
            Some(Slot::Live(_)) | None => {}
        }
    }

    /// Give back an allocated id whose submission failed.
    pub fn release(&self, id: TaskId) {
        if let TaskId::Fallback(seq) = id {
            self.slots.lock().remove(&seq);
        }
    }

    /// Cancel a task from either backend.
    ///
    /// Unknown, finished and already-cancelled ids are no-ops.
    pub fn cancel(&self, id: TaskId, primary: &dyn PrimaryScheduler) {
        match id {
            TaskId::Primary(raw) => {
                trace!(%id, "cancelling on primary scheduler");
                primary.cancel_task(raw);
            }
            TaskId::Fallback(seq) => {
                let handle = {
                    let mut slots = self.slots.lock();
                    match slots.remove(&seq) {
                        Some(Slot::Live(handle)) => Some(handle),
                        Some(slot @ (Slot::Pending | Slot::Finished)) => {
                            slots.insert(seq, slot);
                            None
                        }
                        None => None,
                    }
                };

                if let Some(handle) = handle {
                    trace!(%id, "cancelling on region scheduler");
                    handle.cancel();
                }
            }
        }
    }

    /// Whether a cancellation handle is stored for `id`.
    #[must_use]
    pub fn contains(&self, id: TaskId) -> bool {
        match id {
            TaskId::Primary(_) => false,
            TaskId::Fallback(seq) => matches!(self.slots.lock().get(&seq), Some(Slot::Live(_))),
        }
    }

    /// Number of stored cancellation handles.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.slots
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Live(_)))
            .count()
    }

    /// Slots of any kind, including reserved and finished ids.
    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("next", &self.next.load(Ordering::Relaxed))
            .field("outstanding", &self.outstanding())
            .finish()
    }
}
