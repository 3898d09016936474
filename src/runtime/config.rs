//! Scheduler configuration types.
//!
//! These types hold the concrete values that drive scheduler behavior. In
//! most cases you should use [`SchedulerBuilder`](super::builder::SchedulerBuilder)
//! rather than creating a [`SchedulerConfig`] directly.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `fault_policy` | `Strict` |
//! | `idle_park_timeout` | 10 ms |
//! | `slowmo` | zero |
//! | `wait_for_one` | false |
//! | `max_ticks` | `None` |
//! | `threads.queue_capacity` | 1000 |
//! | `threads.name_prefix` | `"weft-thread"` |
//! | `threads.join_timeout` | 1 s |

use std::str::FromStr;
use std::time::Duration;

use crate::error::Error;

/// Default length of the queues between a bridged thread and its boxes.
pub const DEFAULT_THREAD_QUEUE_CAPACITY: usize = 1000;
/// Default name prefix for bridged threads.
pub const DEFAULT_THREAD_NAME_PREFIX: &str = "weft-thread";

/// What the scheduler does when a unit faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultPolicy {
    /// Terminate the unit and return the fault from the run loop.
    #[default]
    Strict,
    /// Terminate only the unit, record the fault, keep running.
    Resilient,
}

impl FromStr for FaultPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strict" | "mortal" => Ok(Self::Strict),
            "resilient" | "immortal" => Ok(Self::Resilient),
            other => Err(Error::invalid_config(format!(
                "unknown fault policy {other:?} (expected strict or resilient)"
            ))),
        }
    }
}

/// Configuration for thread-bridged components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadConfig {
    /// Length of each queue between the thread and a box.
    pub queue_capacity: usize,
    /// Name prefix for spawned threads.
    pub name_prefix: String,
    /// How long stopping a scheduler waits for a bridged thread to exit.
    pub join_timeout: Duration,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_THREAD_QUEUE_CAPACITY,
            name_prefix: DEFAULT_THREAD_NAME_PREFIX.to_string(),
            join_timeout: Duration::from_secs(1),
        }
    }
}

impl ThreadConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.queue_capacity == 0 {
            self.queue_capacity = 1;
        }
        if self.name_prefix.is_empty() {
            self.name_prefix = DEFAULT_THREAD_NAME_PREFIX.to_string();
        }
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Fault handling mode.
    pub fault_policy: FaultPolicy,
    /// How long an idle run loop parks before re-checking for work.
    pub idle_park_timeout: Duration,
    /// Delay inserted between ticks, for watching a system run slowly.
    pub slowmo: Duration,
    /// Keep running with no units until at least one has been activated.
    pub wait_for_one: bool,
    /// Upper bound on ticks per run call.
    pub max_ticks: Option<u64>,
    /// Thread bridge settings.
    pub threads: ThreadConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fault_policy: FaultPolicy::Strict,
            idle_park_timeout: Duration::from_millis(10),
            slowmo: Duration::ZERO,
            wait_for_one: false,
            max_ticks: None,
            threads: ThreadConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.idle_park_timeout.is_zero() {
            self.idle_park_timeout = Duration::from_millis(1);
        }
        if self.max_ticks == Some(0) {
            self.max_ticks = None;
        }
        self.threads.normalize();
    }
}
