//! Simulated hosts for driving `rgb-tick` end to end.
//!
//! Neither server has a clock of its own: ticks advance only when a test
//! calls `step`, so tick-based behavior is deterministic. Work still runs on
//! real threads, which is what the thread-affinity checks need.
//!
//! - [`TickServer`] runs every synchronous task on one tick thread.
//! - [`RegionServer`] runs a global tick thread and one thread per region.
//!   Entities belong to one region at a time and can move or be retired.
//!   Its legacy scheduling surface declines every call.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use rgb_host_sim::RegionServer;
//! use rgb_tick::{HostModel, Lane, TaskScheduler};
//!
//! let server = Arc::new(RegionServer::start(2).unwrap());
//! let scheduler = TaskScheduler::new(server.clone()).with_regions(server.clone());
//!
//! let id = scheduler.run_repeating(|| {}, 20).unwrap();
//! assert!(id.is_fallback());
//! assert_eq!(scheduler.model(Lane::Sync), Some(HostModel::Partitioned));
//!
//! scheduler.cancel(id);
//! ```

mod error;
mod region_server;
mod tick_loop;
mod tick_server;

pub use error::{SimError, SimResult};
pub use region_server::{
    AsyncPool, GlobalRegion, RegionServer, SimEntity, SimEntityScheduler, TICK_METHOD,
};
pub use tick_loop::SimHandle;
pub use tick_server::{TICK_FIELD, TickServer};
