//! Scheduler configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Environment variable overriding [`SchedulerConfig::tick_millis`].
pub const TICK_MILLIS_ENV: &str = "RGB_TICK_MILLIS";

/// Length of one host tick, in milliseconds, at 20 ticks per second.
pub const DEFAULT_TICK_MILLIS: u64 = 50;

/// Configuration for [`TaskScheduler`](crate::TaskScheduler).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Length of one tick. Used to convert tick counts into wall-clock time
    /// for the region model's async scheduler.
    pub tick_millis: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_millis: DEFAULT_TICK_MILLIS,
        }
    }
}

impl SchedulerConfig {
    /// Read overrides from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through `lookup`; unparsable values keep the default.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(raw) = lookup(TICK_MILLIS_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(millis) if millis > 0 => config.tick_millis = millis,
                _ => warn!(value = %raw, "ignoring invalid {TICK_MILLIS_ENV}"),
            }
        }

        config
    }

    /// Length of one tick.
    #[must_use]
    pub fn tick_duration(&self) -> Duration {
        Duration::from_millis(self.tick_millis.max(1))
    }

    /// Tick count accepted by the region model: never below one.
    #[must_use]
    pub const fn region_ticks(ticks: u64) -> u64 {
        if ticks == 0 { 1 } else { ticks }
    }

    /// Wall-clock equivalent of `ticks`, never below one tick.
    #[must_use]
    pub fn region_duration(&self, ticks: u64) -> Duration {
        let ticks = u32::try_from(Self::region_ticks(ticks)).unwrap_or(u32::MAX);
        self.tick_duration().saturating_mul(ticks)
    }
}
