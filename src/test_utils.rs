//! Test utilities for weft.
//!
//! Shared helpers for unit tests:
//! - Consistent tracing-based logging initialization
//! - Phase/section macros for readable test output
//! - A serialising lock for tests that touch environment variables
//! - Small scheduler drivers

use crate::runtime::{RunExit, RunReport, Scheduler, SchedulerBuilder};
use std::sync::{Mutex, Once};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Tick budget used by [`run_to_completion`].
pub const DEFAULT_TEST_TICK_LIMIT: u64 = 10_000;

/// Initialize test logging with trace-level output.
///
/// Safe to call multiple times; only initializes once.
pub fn init_test_logging() {
    init_test_logging_with_level(tracing::Level::TRACE);
}

/// Initialize test logging with a custom level.
///
/// The first call wins; later calls are no-ops.
pub fn init_test_logging_with_level(level: tracing::Level) {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the global environment lock for tests that mutate env vars.
pub(crate) fn env_lock() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// A strict scheduler with a short idle park and a tick budget.
#[must_use]
pub fn test_scheduler() -> Scheduler {
    SchedulerBuilder::strict()
        .idle_park_timeout(std::time::Duration::from_millis(1))
        .max_ticks(Some(DEFAULT_TEST_TICK_LIMIT))
        .build()
}

/// Runs `scheduler` until no unit is runnable, panicking if that takes more
/// than [`DEFAULT_TEST_TICK_LIMIT`] ticks.
pub fn run_to_completion(scheduler: &mut Scheduler) -> RunReport {
    let report = scheduler.run_until_idle().expect("scheduler run failed");
    assert!(
        report.exit != RunExit::TickLimit,
        "scheduler still busy after {DEFAULT_TEST_TICK_LIMIT} ticks"
    );
    tracing::debug!(ticks = report.ticks, exit = ?report.exit, "scheduler drained");
    report
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        let __cond: bool = $cond;
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!(__cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}
