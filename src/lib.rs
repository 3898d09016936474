//! Weft: a cooperative microprocess scheduler with linked mailboxes.
//!
//! # Overview
//!
//! Weft runs many small units of work on one thread, one slice at a time. A
//! unit never blocks: each resume does a bounded piece of work and says
//! whether it wants to run again next tick, sleep until woken, or finish.
//! Units talk through named mailboxes joined by linkages, so a producer never
//! needs to know who consumes its output.
//!
//! # Core Guarantees
//!
//! - **Round-robin fairness**: every runnable unit is resumed exactly once per tick
//! - **Fault isolation**: in resilient mode a failing unit is removed and reported,
//!   its peers keep running
//! - **Ordered delivery**: messages between two boxes arrive in the order sent
//! - **Backpressure**: a bounded inbox refuses sends and wakes the producer once
//!   the consumer collects
//! - **Optimistic transactions**: commits never block and never publish a write
//!   computed from stale reads
//!
//! # Module Structure
//!
//! - [`types`]: Identifiers for units, boxes and linkages
//! - [`error`]: Error types and retry strategies
//! - [`message`]: Messages and lifecycle signals
//! - [`unit`]: The [`Microprocess`] trait and resume outcomes
//! - [`cx`]: The context a unit sees while it runs
//! - [`runtime`]: The scheduler, its handle and configuration
//! - [`mailbox`]: Postboxes and named box sets
//! - [`link`]: Linkages and the per-component postoffice
//! - [`component`]: Units with mailboxes and a lifecycle
//! - [`components`]: Stock forwarding, collecting, timeout and introspection behaviours
//! - [`threaded`]: Components whose body runs on its own OS thread
//! - [`stm`]: Versioned key-value store with optimistic transactions
//! - [`registry`]: Per-scheduler service and value registry

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod component;
pub mod components;
pub mod cx;
pub mod error;
pub mod link;
pub mod mailbox;
pub mod message;
pub mod registry;
pub mod runtime;
pub mod stm;
pub mod threaded;
pub mod types;
pub mod unit;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenient access to core types
pub use component::{link_pipeline, Behaviour, Component, ComponentCx, ComponentHandle};
pub use cx::Cx;
pub use error::{Error, ErrorKind, RecvError, Result, SendError};
pub use link::{LinkKind, Linkage, Postoffice};
pub use mailbox::{BoxSpec, Capacity, Postbox, CONTROL, INBOX, OUTBOX, SIGNAL};
pub use message::{Message, Signal};
pub use registry::ServiceRegistry;
pub use runtime::{FaultPolicy, RunExit, Scheduler, SchedulerBuilder, SchedulerConfig, SchedulerHandle};
pub use stm::{StmError, Store, Transaction, Var};
pub use threaded::{spawn_thread_bridge, ThreadBridgeHandle, ThreadCx, ThreadedComponent};
pub use types::{BoxId, LinkageId, UnitId};
pub use unit::{unit_fn, Exit, Microprocess, Resume, UnitState};
