//! Units of work and the handles that identify them.

use core::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// A unit of work handed to a host scheduler.
///
/// Tasks are cheap to clone so a submission can be reissued on another
/// backend after the first one declined it. A task built with [`Task::once`]
/// runs its closure at most once no matter how many clones are invoked.
#[derive(Clone)]
pub struct Task {
    run: Arc<dyn Fn() + Send + Sync>,
}

impl Task {
    /// A task that may run any number of times.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self { run: Arc::new(run) }
    }

    /// A task whose closure runs at most once.
    pub fn once<F>(run: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let slot = Mutex::new(Some(run));
        Self::new(move || {
            let run = slot.lock().take();
            if let Some(run) = run {
                run();
            }
        })
    }

    /// Run the task on the current thread.
    pub fn run(&self) {
        (self.run)();
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").finish_non_exhaustive()
    }
}

/// Identifier of a scheduled task, tagged with the backend that owns it.
///
/// Primary ids are the host's own task ids. Fallback ids are allocated by the
/// [`TaskRegistry`](crate::TaskRegistry) and never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskId {
    /// Owned by the global-tick scheduler.
    Primary(u32),
    /// Owned by the region scheduler, cancelled through the registry.
    Fallback(u32),
}

impl TaskId {
    /// Raw value meaning "no task".
    pub const NONE_RAW: i32 = -1;

    /// Encode as a single integer.
    ///
    /// Primary ids map to themselves (saturating at `i32::MAX`), fallback ids
    /// to `-2, -3, ...` in allocation order. `-1` is never produced.
    #[must_use]
    pub fn to_raw(self) -> i32 {
        match self {
            Self::Primary(id) => i32::try_from(id).unwrap_or(i32::MAX),
            Self::Fallback(seq) => i32::try_from(seq).map_or(i32::MIN, |seq| -1 - seq),
        }
    }

    /// Decode a raw integer; [`Self::NONE_RAW`] decodes to `None`.
    #[must_use]
    pub const fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0.. => Some(Self::Primary(raw.unsigned_abs())),
            Self::NONE_RAW => None,
            _ => Some(Self::Fallback((-1 - raw).unsigned_abs())),
        }
    }

    /// Whether the id belongs to the region scheduler.
    #[must_use]
    pub const fn is_fallback(self) -> bool {
        matches!(self, Self::Fallback(_))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary(id) => write!(f, "primary#{id}"),
            Self::Fallback(seq) => write!(f, "region#{seq}"),
        }
    }
}
