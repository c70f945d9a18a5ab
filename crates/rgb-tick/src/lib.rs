//! Tick-based task scheduling for global-tick and region-partitioned hosts.
//!
//! A host runs synchronous work in one of two ways. Either a single tick
//! thread runs everything in fixed time steps, or the world is split into
//! regions that each tick on their own thread, with a separate global thread
//! for work that no region owns. [`TaskScheduler`] hides the difference.
//!
//! # Submission
//!
//! ```text
//! run_*(work)
//!   ┌──────────────────────┐  Ok(id)       ┌──────────────────┐
//!   │  PrimaryScheduler    │──────────────►│ TaskId::Primary  │
//!   └──────────────────────┘               └──────────────────┘
//!          │ Unsupported
//!          ▼
//!   ┌──────────────────────┐  handle       ┌──────────────────┐
//!   │  RegionScheduler     │──────────────►│ TaskRegistry     │──► TaskId::Fallback
//!   │  global / async      │               └──────────────────┘
//!   └──────────────────────┘
//! ```
//!
//! The model learned for each [`Lane`] is remembered, so a partitioned host
//! pays for the declined primary attempt once per lane.
//!
//! # Entity affinity
//!
//! On a partitioned host an entity may only be touched by the thread of the
//! region that currently owns it. [`EntityExecutor`] runs a closure there and
//! blocks until it has run, or until the entity is removed.

mod affinity;
mod config;
mod error;
mod host;
mod registry;
mod scheduler;
mod task;

pub use affinity::{EntityExecutor, InterruptToken};
pub use config::{DEFAULT_TICK_MILLIS, SchedulerConfig, TICK_MILLIS_ENV};
pub use error::{AffinityError, HostError, HostResult, SchedError, SchedResult};
pub use host::{
    AsyncScheduler, EntityAffinity, EntityScheduler, GlobalScheduler, PrimaryScheduler,
    RegionScheduler, ScheduledTask,
};
pub use registry::TaskRegistry;
pub use scheduler::{HostModel, Lane, TaskScheduler};
pub use task::{Task, TaskId};
