//! Identifier types for runtime entities.
//!
//! Scheduling units, mailboxes and linkages are identified by opaque ids drawn
//! from process-wide counters, so an id is never reused for the lifetime of
//! the process, even across independent schedulers.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static UNIT_COUNTER: AtomicU64 = AtomicU64::new(1);
static BOX_COUNTER: AtomicU64 = AtomicU64::new(1);
static LINKAGE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A unique identifier for a scheduling unit.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnitId(u64);

impl UnitId {
    /// Allocates a fresh unit id.
    #[must_use]
    pub fn next() -> Self {
        Self(UNIT_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Creates a unit id for testing purposes.
    #[doc(hidden)]
    #[must_use]
    pub const fn new_for_test(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnitId({})", self.0)
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "U{}", self.0)
    }
}

/// A unique identifier for a mailbox.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoxId(u64);

impl BoxId {
    /// Allocates a fresh box id.
    #[must_use]
    pub(crate) fn next() -> Self {
        Self(BOX_COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Debug for BoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BoxId({})", self.0)
    }
}

impl fmt::Display for BoxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// Opaque reference to a registered linkage.
///
/// Returned by [`Postoffice::link`](crate::link::Postoffice::link) and used
/// to remove that specific linkage.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LinkageId(u64);

impl LinkageId {
    /// Allocates a fresh linkage id.
    #[must_use]
    pub(crate) fn next() -> Self {
        Self(LINKAGE_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for LinkageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkageId({})", self.0)
    }
}

impl fmt::Display for LinkageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}
