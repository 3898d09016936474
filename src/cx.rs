//! Per-resume context handed to a unit.
//!
//! A [`Cx`] is the only way a unit reaches its scheduler: it carries the
//! unit's identity, the current tick and timestamp, and a handle for waking,
//! spawning and registry access. There is no ambient scheduler.

use std::time::Instant;

use crate::registry::ServiceRegistry;
use crate::runtime::SchedulerHandle;
use crate::types::UnitId;
use crate::unit::Microprocess;

/// Context for one resume of one unit.
#[derive(Debug)]
pub struct Cx<'a> {
    unit: UnitId,
    tick: u64,
    now: Instant,
    handle: &'a SchedulerHandle,
}

impl<'a> Cx<'a> {
    pub(crate) fn new(unit: UnitId, tick: u64, now: Instant, handle: &'a SchedulerHandle) -> Self {
        Self {
            unit,
            tick,
            now,
            handle,
        }
    }

    /// The unit being resumed.
    #[must_use]
    pub fn unit_id(&self) -> UnitId {
        self.unit
    }

    /// Number of the tick in progress, starting at 1.
    #[must_use]
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Timestamp taken at the start of the tick.
    #[must_use]
    pub fn now(&self) -> Instant {
        self.now
    }

    /// The scheduler's handle.
    #[must_use]
    pub fn handle(&self) -> &'a SchedulerHandle {
        self.handle
    }

    /// The scheduler's service registry.
    #[must_use]
    pub fn registry(&self) -> &'a ServiceRegistry {
        self.handle.registry()
    }

    /// Spawns a child unit. It becomes runnable on the next tick, and this
    /// unit is woken when it terminates.
    pub fn spawn(&self, unit: Box<dyn Microprocess>) -> UnitId {
        self.handle.activate_child(self.unit, unit)
    }

    /// Wakes another unit.
    pub fn wake(&self, unit: UnitId) {
        self.handle.wake(unit);
    }

    /// Requests that the scheduler stop after this tick.
    pub fn request_stop(&self) {
        self.handle.request_stop();
    }
}
