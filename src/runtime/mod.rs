//! Scheduler runtime.
//!
//! This module contains the scheduling machinery:
//!
//! - [`config`]: Scheduler configuration types
//! - [`builder`]: Fluent scheduler builder
//! - [`env_config`]: `WEFT_*` environment variables and TOML config files
//! - [`handle`]: Thread-safe request handle (wake, pause, activate, stop)
//! - [`scheduler`]: The round-robin tick loop
//!
//! # Quick Start
//!
//! ```ignore
//! use weft::runtime::SchedulerBuilder;
//! use weft::unit::{unit_fn, Resume};
//!
//! let mut scheduler = SchedulerBuilder::new().build();
//! scheduler.register(unit_fn("hello", |cx| {
//!     tracing::info!(tick = cx.tick(), "hello");
//!     Ok(Resume::Done)
//! }));
//! scheduler.run()?;
//! ```
//!
//! # Fault Policies
//!
//! ```ignore
//! // Any unit fault stops the run loop and is returned to the caller.
//! let strict = SchedulerBuilder::strict().build();
//!
//! // A faulting unit is terminated; everything else keeps running.
//! let mut resilient = SchedulerBuilder::resilient().build();
//! resilient.run()?;
//! for fault in resilient.take_faults() {
//!     eprintln!("{} faulted: {}", fault.name, fault.error);
//! }
//! ```

pub mod builder;
pub mod config;
pub mod env_config;
pub mod handle;
pub mod scheduler;

pub use builder::SchedulerBuilder;
pub use config::{FaultPolicy, SchedulerConfig, ThreadConfig};
pub use handle::SchedulerHandle;
pub use scheduler::{FaultReport, RunExit, RunReport, Scheduler, TickReport, UnitInfo};
