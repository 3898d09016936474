//! Scheduler builder.
//!
//! The builder is move-based: each method consumes `self` and returns the
//! updated builder, so configuration chains without borrowing hazards.
//!
//! ```ignore
//! use weft::runtime::SchedulerBuilder;
//!
//! let mut scheduler = SchedulerBuilder::resilient()
//!     .idle_park_timeout(Duration::from_millis(5))
//!     .with_env_overrides()?
//!     .build();
//! ```

use std::time::Duration;

use crate::error::Error;
use crate::runtime::config::{FaultPolicy, SchedulerConfig};
use crate::runtime::env_config;
use crate::runtime::scheduler::Scheduler;

/// Builder for constructing a [`Scheduler`] with custom configuration.
#[derive(Debug, Clone, Default)]
pub struct SchedulerBuilder {
    config: SchedulerConfig,
}

impl SchedulerBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
        }
    }

    /// Preset: a unit fault halts the run loop.
    #[must_use]
    pub fn strict() -> Self {
        Self::new().fault_policy(FaultPolicy::Strict)
    }

    /// Preset: a unit fault terminates only that unit.
    #[must_use]
    pub fn resilient() -> Self {
        Self::new().fault_policy(FaultPolicy::Resilient)
    }

    /// Set the fault policy.
    #[must_use]
    pub fn fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.config.fault_policy = policy;
        self
    }

    /// Set how long an idle run loop parks between checks.
    #[must_use]
    pub fn idle_park_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_park_timeout = timeout;
        self
    }

    /// Insert a delay between ticks.
    #[must_use]
    pub fn slowmo(mut self, delay: Duration) -> Self {
        self.config.slowmo = delay;
        self
    }

    /// Keep running with no units until one has been activated.
    #[must_use]
    pub fn wait_for_one(mut self, wait: bool) -> Self {
        self.config.wait_for_one = wait;
        self
    }

    /// Bound the number of ticks per run call (`None` = unbounded).
    #[must_use]
    pub fn max_ticks(mut self, limit: Option<u64>) -> Self {
        self.config.max_ticks = limit;
        self
    }

    /// Set the queue length between bridged threads and their boxes.
    #[must_use]
    pub fn thread_queue_capacity(mut self, capacity: usize) -> Self {
        self.config.threads.queue_capacity = capacity;
        self
    }

    /// Set the name prefix for bridged threads.
    #[must_use]
    pub fn thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.threads.name_prefix = prefix.into();
        self
    }

    /// Set how long a stopping scheduler waits for bridged threads.
    #[must_use]
    pub fn thread_join_timeout(mut self, timeout: Duration) -> Self {
        self.config.threads.join_timeout = timeout;
        self
    }

    /// Apply `WEFT_*` environment variables on top of the current settings.
    pub fn with_env_overrides(mut self) -> Result<Self, Error> {
        env_config::apply_env_overrides(&mut self.config)?;
        Ok(self)
    }

    /// Build from a TOML file, with environment variables applied on top.
    #[cfg(feature = "config-file")]
    pub fn from_toml(path: impl AsRef<std::path::Path>) -> Result<Self, Error> {
        let toml = env_config::parse_toml_file(path.as_ref())?;
        let mut builder = Self::new();
        env_config::apply_toml_config(&mut builder.config, &toml)?;
        builder.with_env_overrides()
    }

    /// Build from TOML text. Environment variables are not consulted.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(text: &str) -> Result<Self, Error> {
        let toml = env_config::parse_toml_str(text)?;
        let mut builder = Self::new();
        env_config::apply_toml_config(&mut builder.config, &toml)?;
        Ok(builder)
    }

    /// The configuration built so far.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Build a scheduler from this configuration.
    #[must_use]
    pub fn build(self) -> Scheduler {
        Scheduler::new(self.config)
    }
}
