//! Tick counter discovery with a per-type accessor cache.

use std::any::{TypeId, type_name};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::LazyLock;
use std::sync::atomic::{AtomicU64, Ordering};

use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::value::saturate;
use crate::{HostValue, ProbeError, ProbeResult, Reflect, TickSources};

/// Tick reported when the host's counter cannot be read.
pub const UNKNOWN_TICK: i32 = 0;

/// Data member names tried in order.
pub const FIELD_CANDIDATES: &[&str] = &[
    "currentTick",
    "tickCount",
    "fullTick",
    "fullTickCount",
    "ticks",
    "currentTicks",
    "au",
    "ac",
];

/// Zero-argument accessor names tried in order, after every field.
pub const METHOD_CANDIDATES: &[&str] = &[
    "getCurrentTick",
    "getTickCount",
    "getFullTick",
    "getTicks",
    "getFullTickCount",
    "getTick",
];

/// How a tick counter is reached on a particular host type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Accessor {
    /// Read this data member.
    Field(&'static str),
    /// Invoke this zero-argument accessor.
    Method(&'static str),
}

impl Accessor {
    /// Member name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Field(name) | Self::Method(name) => name,
        }
    }

    fn read(self, host: &dyn Reflect) -> ProbeResult<HostValue> {
        match self {
            Self::Field(name) => host.read_field(name),
            Self::Method(name) => host.invoke(name),
        }
    }
}

/// Candidate member names, in priority order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    pub fields: Vec<&'static str>,
    pub methods: Vec<&'static str>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            fields: FIELD_CANDIDATES.to_vec(),
            methods: METHOD_CANDIDATES.to_vec(),
        }
    }
}

/// Discovers and reads a host's tick counter.
///
/// Discovery scans the candidate names once per host type and caches the
/// winning [`Accessor`]. A type with no matching member is rescanned on every
/// call; callers that need O(1) failure must remember it themselves.
///
/// Concurrent first discoveries for one type may both scan. They compute the
/// same accessor, so the last insert wins harmlessly.
pub struct TickProbe {
    config: ProbeConfig,
    cache: RwLock<HashMap<TypeId, Accessor>>,
    sources: TickSources,
    scans: AtomicU64,
}

static GLOBAL: LazyLock<TickProbe> = LazyLock::new(TickProbe::new);

impl TickProbe {
    /// Create a probe with the default candidate names.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ProbeConfig::default())
    }

    /// Create a probe with custom candidate names.
    #[must_use]
    pub fn with_config(config: ProbeConfig) -> Self {
        Self {
            config,
            cache: RwLock::new(HashMap::new()),
            sources: TickSources::new(),
            scans: AtomicU64::new(0),
        }
    }

    /// The process-wide probe.
    #[must_use]
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Typed sources consulted before name probing.
    #[must_use]
    pub fn sources(&self) -> &TickSources {
        &self.sources
    }

    /// Number of candidate scans performed so far.
    #[must_use]
    pub fn scan_count(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    /// Cached accessor for `H`, if one was discovered.
    #[must_use]
    pub fn cached<H: Reflect>(&self) -> Option<Accessor> {
        self.cache.read().get(&TypeId::of::<H>()).copied()
    }

    /// Find the member exposing the tick counter on `H`.
    ///
    /// Fields are tried before methods; the first name the type declares wins
    /// and is cached for the rest of the process.
    pub fn discover<H: Reflect>(&self, host: &H) -> Option<Accessor> {
        if let Some(accessor) = self.cached::<H>() {
            return Some(accessor);
        }

        self.scans.fetch_add(1, Ordering::Relaxed);

        let accessor = self
            .config
            .fields
            .iter()
            .copied()
            .find(|name| host.has_field(name))
            .map(Accessor::Field)
            .or_else(|| {
                self.config
                    .methods
                    .iter()
                    .copied()
                    .find(|name| host.has_method(name))
                    .map(Accessor::Method)
            });

        match accessor {
            Some(accessor) => {
                debug!(host = type_name::<H>(), ?accessor, "discovered tick accessor");
                self.cache.write().insert(TypeId::of::<H>(), accessor);
            }
            None => debug!(host = type_name::<H>(), "no tick accessor among candidates"),
        }

        accessor
    }

    /// Read the tick counter, or `None` on any failure.
    ///
    /// A host that panics while being inspected counts as a failure.
    pub fn try_current_tick<H: Reflect>(&self, host: &H) -> Option<i32> {
        match catch_unwind(AssertUnwindSafe(|| self.read_current_tick(host))) {
            Ok(tick) => tick,
            Err(_) => {
                debug!(host = type_name::<H>(), "host panicked while reading tick counter");
                None
            }
        }
    }

    fn read_current_tick<H: Reflect>(&self, host: &H) -> Option<i32> {
        if let Some(ticks) = self.sources.tick_count(host) {
            return Some(saturate(ticks));
        }

        let accessor = self.discover(host)?;
        match read_tick(accessor, host) {
            Ok(tick) => Some(tick),
            Err(error) => {
                debug!(host = type_name::<H>(), %error, "failed to read tick counter");
                None
            }
        }
    }

    /// Read the tick counter, falling back to [`UNKNOWN_TICK`] on any failure.
    pub fn current_tick<H: Reflect>(&self, host: &H) -> i32 {
        self.try_current_tick(host).unwrap_or(UNKNOWN_TICK)
    }
}

impl Default for TickProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for TickProbe {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TickProbe")
            .field("cached", &self.cache.read().len())
            .field("sources", &self.sources)
            .field("scans", &self.scan_count())
            .finish_non_exhaustive()
    }
}

fn read_tick(accessor: Accessor, host: &dyn Reflect) -> ProbeResult<i32> {
    let value = accessor.read(host)?;
    value
        .to_tick()
        .ok_or_else(|| ProbeError::NotNumeric(accessor.name().to_owned()))
}

/// Read `host`'s tick counter through the process-wide probe.
pub fn current_tick<H: Reflect>(host: &H) -> i32 {
    TickProbe::global().current_tick(host)
}
