//! Named mailboxes.
//!
//! - [`postbox`]: a single thread-safe box with forwarding and wake-ups
//! - [`boxes`]: the validated set of boxes owned by one component

pub mod boxes;
pub mod postbox;

pub use boxes::{BoxSpec, Boxes, CONTROL, INBOX, OUTBOX, SIGNAL};
pub use postbox::{Capacity, Direction, Postbox};
