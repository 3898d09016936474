//! Environment variable and config file support for [`SchedulerBuilder`](super::builder::SchedulerBuilder).
//!
//! # Configuration Precedence
//!
//! Later sources override earlier ones. Start from
//! [`SchedulerConfig::default()`], apply a TOML file if one is given (needs
//! the `config-file` feature), then any `WEFT_*` variables that are set.
//! Builder methods called after loading win over all of these.
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `WEFT_FAULT_POLICY` | `strict`/`resilient` | `fault_policy` |
//! | `WEFT_IDLE_PARK_MS` | `u64` | `idle_park_timeout` |
//! | `WEFT_SLOWMO_MS` | `u64` | `slowmo` |
//! | `WEFT_WAIT_FOR_ONE` | `bool` | `wait_for_one` |
//! | `WEFT_MAX_TICKS` | `u64` (0 = unbounded) | `max_ticks` |
//! | `WEFT_THREAD_QUEUE_CAPACITY` | `usize` | `threads.queue_capacity` |
//! | `WEFT_THREAD_NAME_PREFIX` | `String` | `threads.name_prefix` |
//! | `WEFT_THREAD_JOIN_TIMEOUT_MS` | `u64` | `threads.join_timeout` |

use std::time::Duration;

use crate::error::Error;
use crate::runtime::config::{FaultPolicy, SchedulerConfig};

/// Environment variable name for the fault policy.
pub const ENV_FAULT_POLICY: &str = "WEFT_FAULT_POLICY";
/// Environment variable name for the idle park timeout in milliseconds.
pub const ENV_IDLE_PARK_MS: &str = "WEFT_IDLE_PARK_MS";
/// Environment variable name for the inter-tick delay in milliseconds.
pub const ENV_SLOWMO_MS: &str = "WEFT_SLOWMO_MS";
/// Environment variable name for the wait-for-first-unit toggle.
pub const ENV_WAIT_FOR_ONE: &str = "WEFT_WAIT_FOR_ONE";
/// Environment variable name for the per-run tick limit.
pub const ENV_MAX_TICKS: &str = "WEFT_MAX_TICKS";
/// Environment variable name for bridged thread queue length.
pub const ENV_THREAD_QUEUE_CAPACITY: &str = "WEFT_THREAD_QUEUE_CAPACITY";
/// Environment variable name for bridged thread name prefix.
pub const ENV_THREAD_NAME_PREFIX: &str = "WEFT_THREAD_NAME_PREFIX";
/// Environment variable name for the bridged thread join timeout in milliseconds.
pub const ENV_THREAD_JOIN_TIMEOUT_MS: &str = "WEFT_THREAD_JOIN_TIMEOUT_MS";

/// Apply environment variable overrides to a [`SchedulerConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut SchedulerConfig) -> Result<(), Error> {
    if let Some(val) = read_env(ENV_FAULT_POLICY) {
        config.fault_policy = parse_fault_policy(ENV_FAULT_POLICY, &val)?;
    }
    if let Some(val) = read_env(ENV_IDLE_PARK_MS) {
        config.idle_park_timeout = parse_millis(ENV_IDLE_PARK_MS, &val)?;
    }
    if let Some(val) = read_env(ENV_SLOWMO_MS) {
        config.slowmo = parse_millis(ENV_SLOWMO_MS, &val)?;
    }
    if let Some(val) = read_env(ENV_WAIT_FOR_ONE) {
        config.wait_for_one = parse_bool(ENV_WAIT_FOR_ONE, &val)?;
    }
    if let Some(val) = read_env(ENV_MAX_TICKS) {
        let limit = parse_u64(ENV_MAX_TICKS, &val)?;
        config.max_ticks = (limit > 0).then_some(limit);
    }
    if let Some(val) = read_env(ENV_THREAD_QUEUE_CAPACITY) {
        config.threads.queue_capacity = parse_usize(ENV_THREAD_QUEUE_CAPACITY, &val)?;
    }
    if let Some(val) = read_env(ENV_THREAD_NAME_PREFIX) {
        config.threads.name_prefix = val;
    }
    if let Some(val) = read_env(ENV_THREAD_JOIN_TIMEOUT_MS) {
        config.threads.join_timeout = parse_millis(ENV_THREAD_JOIN_TIMEOUT_MS, &val)?;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize, Error> {
    val.trim().parse::<usize>().map_err(|e| {
        Error::invalid_config(format!(
            "invalid value for {var_name}: expected unsigned integer, got {val:?} ({e})"
        ))
    })
}

fn parse_u64(var_name: &str, val: &str) -> Result<u64, Error> {
    val.trim().parse::<u64>().map_err(|e| {
        Error::invalid_config(format!(
            "invalid value for {var_name}: expected u64, got {val:?} ({e})"
        ))
    })
}

fn parse_millis(var_name: &str, val: &str) -> Result<Duration, Error> {
    parse_u64(var_name, val).map(Duration::from_millis)
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool, Error> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::invalid_config(format!(
            "invalid value for {var_name}: expected bool (true/false/1/0/yes/no), got {val:?}"
        ))),
    }
}

fn parse_fault_policy(var_name: &str, val: &str) -> Result<FaultPolicy, Error> {
    val.parse::<FaultPolicy>().map_err(|e| {
        Error::invalid_config(format!(
            "invalid value for {var_name}: got {val:?} ({})",
            e.message().unwrap_or("unrecognised")
        ))
    })
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable scheduler configuration.
///
/// ```toml
/// [scheduler]
/// fault_policy = "resilient"
/// idle_park_ms = 10
/// slowmo_ms = 0
/// wait_for_one = false
/// max_ticks = 0
///
/// [threads]
/// queue_capacity = 1000
/// name_prefix = "myapp-thread"
/// join_timeout_ms = 1000
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct SchedulerTomlConfig {
    /// Scheduler loop settings.
    #[serde(default)]
    pub scheduler: SchedulerToml,
    /// Thread bridge settings.
    #[serde(default)]
    pub threads: ThreadsToml,
}

/// Scheduler section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct SchedulerToml {
    /// `strict` or `resilient`.
    pub fault_policy: Option<String>,
    /// Idle park timeout in milliseconds.
    pub idle_park_ms: Option<u64>,
    /// Delay between ticks in milliseconds.
    pub slowmo_ms: Option<u64>,
    /// Wait for the first unit before draining.
    pub wait_for_one: Option<bool>,
    /// Tick limit per run call (0 = unbounded).
    pub max_ticks: Option<u64>,
}

/// Thread bridge section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct ThreadsToml {
    /// Queue length between a bridged thread and each box.
    pub queue_capacity: Option<usize>,
    /// Name prefix for bridged threads.
    pub name_prefix: Option<String>,
    /// Join timeout in milliseconds.
    pub join_timeout_ms: Option<u64>,
}

/// Apply a parsed TOML config to a [`SchedulerConfig`].
///
/// Only fields that are `Some` in the TOML struct override the config.
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut SchedulerConfig, toml: &SchedulerTomlConfig) -> Result<(), Error> {
    if let Some(ref v) = toml.scheduler.fault_policy {
        config.fault_policy = parse_fault_policy("scheduler.fault_policy", v)?;
    }
    if let Some(v) = toml.scheduler.idle_park_ms {
        config.idle_park_timeout = Duration::from_millis(v);
    }
    if let Some(v) = toml.scheduler.slowmo_ms {
        config.slowmo = Duration::from_millis(v);
    }
    if let Some(v) = toml.scheduler.wait_for_one {
        config.wait_for_one = v;
    }
    if let Some(v) = toml.scheduler.max_ticks {
        config.max_ticks = (v > 0).then_some(v);
    }
    if let Some(v) = toml.threads.queue_capacity {
        config.threads.queue_capacity = v;
    }
    if let Some(ref v) = toml.threads.name_prefix {
        config.threads.name_prefix.clone_from(v);
    }
    if let Some(v) = toml.threads.join_timeout_ms {
        config.threads.join_timeout = Duration::from_millis(v);
    }
    Ok(())
}

/// Parse a TOML string into a [`SchedulerTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(toml_str: &str) -> Result<SchedulerTomlConfig, Error> {
    toml::from_str(toml_str)
        .map_err(|e| Error::invalid_config(format!("failed to parse TOML config: {e}")))
}

/// Read and parse a TOML file into a [`SchedulerTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_file(path: &std::path::Path) -> Result<SchedulerTomlConfig, Error> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::invalid_config(format!(
            "failed to read config file {}: {e}",
            path.display()
        ))
    })?;
    parse_toml_str(&content)
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn with_clean_env<F, R>(f: F) -> R
    where
        F: FnOnce() -> R,
    {
        let _guard = crate::test_utils::env_lock();
        clean_env_locked();
        f()
    }

    // Helper: set env var for the duration of a closure, then unset.
    fn with_env<F, R>(var: &str, val: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        with_clean_env(|| {
            std::env::set_var(var, val);
            let result = f();
            std::env::remove_var(var);
            result
        })
    }

    fn with_envs<F, R>(vars: &[(&str, &str)], f: F) -> R
    where
        F: FnOnce() -> R,
    {
        with_clean_env(|| {
            for (k, v) in vars {
                std::env::set_var(k, v);
            }
            let result = f();
            for (k, _) in vars {
                std::env::remove_var(k);
            }
            result
        })
    }

    fn clean_env_locked() {
        for var in &[
            ENV_FAULT_POLICY,
            ENV_IDLE_PARK_MS,
            ENV_SLOWMO_MS,
            ENV_WAIT_FOR_ONE,
            ENV_MAX_TICKS,
            ENV_THREAD_QUEUE_CAPACITY,
            ENV_THREAD_NAME_PREFIX,
            ENV_THREAD_JOIN_TIMEOUT_MS,
        ] {
            std::env::remove_var(var);
        }
    }

    // --- parse helpers ---

    #[test]
    fn parse_usize_valid() {
        assert_eq!(super::parse_usize("TEST", "42").unwrap(), 42);
        assert_eq!(super::parse_usize("TEST", " 100 ").unwrap(), 100);
        assert_eq!(super::parse_usize("TEST", "0").unwrap(), 0);
    }

    #[test]
    fn parse_usize_invalid() {
        assert!(super::parse_usize("TEST", "abc").is_err());
        assert!(super::parse_usize("TEST", "-1").is_err());
        assert!(super::parse_usize("TEST", "").is_err());
    }

    #[test]
    fn parse_millis_valid() {
        assert_eq!(
            super::parse_millis("TEST", "250").unwrap(),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn parse_bool_all_truthy() {
        for val in &["true", "1", "yes", "on", "TRUE", "Yes", "ON"] {
            assert!(
                super::parse_bool("TEST", val).unwrap(),
                "expected true for {val}"
            );
        }
    }

    #[test]
    fn parse_bool_all_falsy() {
        for val in &["false", "0", "no", "off", "FALSE", "No", "OFF"] {
            assert!(
                !super::parse_bool("TEST", val).unwrap(),
                "expected false for {val}"
            );
        }
    }

    #[test]
    fn parse_bool_invalid() {
        assert!(super::parse_bool("TEST", "maybe").is_err());
        assert!(super::parse_bool("TEST", "").is_err());
    }

    // --- apply_env_overrides ---

    #[test]
    fn env_overrides_fault_policy() {
        with_env(ENV_FAULT_POLICY, "resilient", || {
            let mut config = SchedulerConfig::default();
            apply_env_overrides(&mut config).unwrap();
            assert_eq!(config.fault_policy, FaultPolicy::Resilient);
        });
    }

    #[test]
    fn env_overrides_timings() {
        with_envs(
            &[
                (ENV_IDLE_PARK_MS, "25"),
                (ENV_SLOWMO_MS, "5"),
                (ENV_THREAD_JOIN_TIMEOUT_MS, "300"),
            ],
            || {
                let mut config = SchedulerConfig::default();
                apply_env_overrides(&mut config).unwrap();
                assert_eq!(config.idle_park_timeout, Duration::from_millis(25));
                assert_eq!(config.slowmo, Duration::from_millis(5));
                assert_eq!(config.threads.join_timeout, Duration::from_millis(300));
            },
        );
    }

    #[test]
    fn env_overrides_max_ticks_zero_means_unbounded() {
        with_env(ENV_MAX_TICKS, "0", || {
            let mut config = SchedulerConfig {
                max_ticks: Some(10),
                ..SchedulerConfig::default()
            };
            apply_env_overrides(&mut config).unwrap();
            assert_eq!(config.max_ticks, None);
        });
    }

    #[test]
    fn env_overrides_thread_settings() {
        with_envs(
            &[
                (ENV_THREAD_QUEUE_CAPACITY, "16"),
                (ENV_THREAD_NAME_PREFIX, "pump"),
                (ENV_WAIT_FOR_ONE, "yes"),
            ],
            || {
                let mut config = SchedulerConfig::default();
                apply_env_overrides(&mut config).unwrap();
                assert_eq!(config.threads.queue_capacity, 16);
                assert_eq!(config.threads.name_prefix, "pump");
                assert!(config.wait_for_one);
            },
        );
    }

    #[test]
    fn env_overrides_unset_vars_leave_defaults() {
        with_clean_env(|| {
            let defaults = SchedulerConfig::default();
            let mut config = SchedulerConfig::default();
            apply_env_overrides(&mut config).unwrap();
            assert_eq!(config, defaults);
        });
    }

    #[test]
    fn env_overrides_invalid_value_returns_error() {
        with_env(ENV_THREAD_QUEUE_CAPACITY, "not_a_number", || {
            let mut config = SchedulerConfig::default();
            let err = apply_env_overrides(&mut config).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidConfig);
            let msg = err.to_string();
            assert!(
                msg.contains(ENV_THREAD_QUEUE_CAPACITY),
                "error should mention var name: {msg}"
            );
            assert!(
                msg.contains("not_a_number"),
                "error should mention bad value: {msg}"
            );
        });
    }

    #[test]
    fn env_overrides_invalid_policy_returns_error() {
        with_env(ENV_FAULT_POLICY, "sometimes", || {
            let mut config = SchedulerConfig::default();
            let msg = apply_env_overrides(&mut config).unwrap_err().to_string();
            assert!(msg.contains("sometimes"));
        });
    }
}
