//! Core types shared across the runtime.

pub mod id;

pub use id::{BoxId, LinkageId, UnitId};
