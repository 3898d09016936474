//! Thread-safe handle to a scheduler.
//!
//! The scheduler itself is owned by the thread that runs it. Everything other
//! threads (or units) may need to do to it goes through a [`SchedulerHandle`]:
//! wake or pause a unit, hand over a new unit for activation, or ask the loop
//! to stop. Requests are queued and applied by the scheduler between ticks.
//!
//! Wake requests are deduplicated, and every request also signals the
//! scheduler's parker so an idle loop resumes without polling.
//!
//! The handle also carries the scheduler's roster: the ids and names of its
//! live units, republished whenever a unit is admitted or retired. Units that
//! [watch](SchedulerHandle::watch_roster) it are woken on every change.

use crossbeam_queue::SegQueue;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Wake, Waker};
use std::time::{Duration, Instant};

use crate::registry::ServiceRegistry;
use crate::runtime::config::ThreadConfig;
use crate::types::UnitId;
use crate::unit::Microprocess;

static SCHEDULER_COUNTER: AtomicU64 = AtomicU64::new(1);

/// A unit waiting to be admitted by the scheduler.
pub(crate) struct Activation {
    pub(crate) unit: Box<dyn Microprocess>,
    pub(crate) parent: Option<UnitId>,
}

/// Wakes the scheduler loop when it is parked.
#[derive(Debug, Default)]
struct Parker {
    notified: Mutex<bool>,
    cond: Condvar,
}

impl Parker {
    fn unpark(&self) {
        let mut notified = self.notified.lock();
        *notified = true;
        self.cond.notify_one();
    }

    /// Blocks until unparked or `timeout` elapses. Returns true if unparked.
    fn park_timeout(&self, timeout: Duration) -> bool {
        let mut notified = self.notified.lock();
        if !*notified {
            self.cond.wait_for(&mut notified, timeout);
        }
        std::mem::replace(&mut *notified, false)
    }
}

/// Live units as last published by the scheduler.
#[derive(Debug, Default)]
struct Roster {
    version: u64,
    units: BTreeMap<UnitId, String>,
    watchers: Vec<UnitId>,
}

struct Shared {
    id: u64,
    started: Instant,
    woken: Mutex<Vec<UnitId>>,
    paused: Mutex<Vec<UnitId>>,
    activations: SegQueue<Activation>,
    stop_requested: AtomicBool,
    parker: Parker,
    roster: Mutex<Roster>,
    registry: ServiceRegistry,
    threads: ThreadConfig,
}

/// Cloneable, `Send + Sync` handle to a scheduler's request queues.
#[derive(Clone)]
pub struct SchedulerHandle {
    shared: Arc<Shared>,
}

impl SchedulerHandle {
    pub(crate) fn new(threads: ThreadConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: SCHEDULER_COUNTER.fetch_add(1, Ordering::Relaxed),
                started: Instant::now(),
                woken: Mutex::new(Vec::new()),
                paused: Mutex::new(Vec::new()),
                activations: SegQueue::new(),
                stop_requested: AtomicBool::new(false),
                parker: Parker::default(),
                roster: Mutex::new(Roster::default()),
                registry: ServiceRegistry::new(),
                threads,
            }),
        }
    }

    /// Numeric id of the scheduler this handle belongs to.
    #[must_use]
    pub fn scheduler_id(&self) -> u64 {
        self.shared.id
    }

    /// Time the scheduler was created.
    #[must_use]
    pub fn started_at(&self) -> Instant {
        self.shared.started
    }

    /// Requests that a sleeping unit become runnable.
    ///
    /// Safe to call from any thread. Waking a runnable or unknown unit has no
    /// effect; a wake issued in the same tick as a pause wins over the pause.
    pub fn wake(&self, unit: UnitId) {
        {
            let mut woken = self.shared.woken.lock();
            if !woken.contains(&unit) {
                woken.push(unit);
            }
        }
        self.shared.parker.unpark();
    }

    /// Requests that a runnable unit be put to sleep after the current tick.
    pub fn pause(&self, unit: UnitId) {
        let mut paused = self.shared.paused.lock();
        if !paused.contains(&unit) {
            paused.push(unit);
        }
    }

    /// Hands a unit to the scheduler. It becomes runnable on the next tick.
    pub fn activate(&self, unit: Box<dyn Microprocess>) -> UnitId {
        self.enqueue(unit, None)
    }

    /// Hands a child unit to the scheduler; `parent` is woken when it terminates.
    pub fn activate_child(&self, parent: UnitId, unit: Box<dyn Microprocess>) -> UnitId {
        self.enqueue(unit, Some(parent))
    }

    fn enqueue(&self, unit: Box<dyn Microprocess>, parent: Option<UnitId>) -> UnitId {
        let id = unit.id();
        self.shared.activations.push(Activation { unit, parent });
        self.shared.parker.unpark();
        id
    }

    /// Asks the scheduler loop to stop at the end of the current tick.
    pub fn request_stop(&self) {
        self.shared.stop_requested.store(true, Ordering::Release);
        self.shared.parker.unpark();
    }

    /// Returns true once [`request_stop`](Self::request_stop) has been called.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::Acquire)
    }

    /// The scheduler's service registry.
    #[must_use]
    pub fn registry(&self) -> &ServiceRegistry {
        &self.shared.registry
    }

    /// Settings for thread-bridged components created against this scheduler.
    #[must_use]
    pub fn thread_config(&self) -> &ThreadConfig {
        &self.shared.threads
    }

    /// Ids and names of the scheduler's live units, in id order.
    #[must_use]
    pub fn live_units(&self) -> BTreeMap<UnitId, String> {
        self.shared.roster.lock().units.clone()
    }

    /// Counts roster changes. Equal values mean an unchanged roster.
    #[must_use]
    pub fn roster_version(&self) -> u64 {
        self.shared.roster.lock().version
    }

    /// Wakes `unit` whenever a unit is admitted or retired, until `unit`
    /// itself is retired.
    pub fn watch_roster(&self, unit: UnitId) {
        let mut roster = self.shared.roster.lock();
        if !roster.watchers.contains(&unit) {
            roster.watchers.push(unit);
        }
    }

    pub(crate) fn roster_admit(&self, unit: UnitId, name: &str) {
        let watchers = {
            let mut roster = self.shared.roster.lock();
            roster.units.insert(unit, name.to_string());
            roster.version += 1;
            roster.watchers.clone()
        };
        self.wake_all(&watchers);
    }

    pub(crate) fn roster_retire(&self, unit: UnitId) {
        let watchers = {
            let mut roster = self.shared.roster.lock();
            roster.units.remove(&unit);
            roster.watchers.retain(|watcher| *watcher != unit);
            roster.version += 1;
            roster.watchers.clone()
        };
        self.wake_all(&watchers);
    }

    fn wake_all(&self, units: &[UnitId]) {
        for unit in units {
            self.wake(*unit);
        }
    }

    /// Creates a [`Waker`] that wakes `unit` on this scheduler.
    #[must_use]
    pub fn waker_for(&self, unit: UnitId) -> Waker {
        Waker::from(Arc::new(UnitWaker {
            handle: self.clone(),
            unit,
        }))
    }

    pub(crate) fn drain_woken(&self) -> Vec<UnitId> {
        std::mem::take(&mut *self.shared.woken.lock())
    }

    pub(crate) fn drain_paused(&self) -> Vec<UnitId> {
        std::mem::take(&mut *self.shared.paused.lock())
    }

    pub(crate) fn pop_activation(&self) -> Option<Activation> {
        self.shared.activations.pop()
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.shared.activations.is_empty()
            || !self.shared.woken.lock().is_empty()
            || !self.shared.paused.lock().is_empty()
    }

    pub(crate) fn clear_stop(&self) {
        self.shared.stop_requested.store(false, Ordering::Release);
    }

    pub(crate) fn park_timeout(&self, timeout: Duration) -> bool {
        self.shared.parker.park_timeout(timeout)
    }
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("scheduler_id", &self.shared.id)
            .field("pending_activations", &self.shared.activations.len())
            .field("stop_requested", &self.is_stop_requested())
            .finish()
    }
}

struct UnitWaker {
    handle: SchedulerHandle,
    unit: UnitId,
}

impl Wake for UnitWaker {
    fn wake(self: Arc<Self>) {
        self.handle.wake(self.unit);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.handle.wake(self.unit);
    }
}
