//! Runtime capability discovery for host tick counters.
//!
//! Hosts do not publish their tick counter through a stable contract, so the
//! probe looks for it by name: a fixed, prioritized list of field names, then
//! a list of zero-argument accessor names. The first match for a host type is
//! cached for the rest of the process.
//!
//! ```text
//! current_tick(host)
//!   ├─ typed source registered for the type? ──► read it
//!   ├─ accessor cached for the type?         ──► read it
//!   ├─ scan FIELD_CANDIDATES, then METHOD_CANDIDATES
//!   │     first hit ──► cache, read
//!   └─ anything fails ──► UNKNOWN_TICK (0)
//! ```
//!
//! Reading never fails from the caller's point of view. The counter is a
//! diagnostic, and there is no better value to report than "unknown".

mod error;
mod probe;
mod reflect;
mod source;
mod value;

pub use error::{ProbeError, ProbeResult};
pub use probe::{
    Accessor, FIELD_CANDIDATES, METHOD_CANDIDATES, ProbeConfig, TickProbe, UNKNOWN_TICK,
    current_tick,
};
pub use reflect::Reflect;
pub use source::{TickSource, TickSources};
pub use value::{HostValue, saturate};
