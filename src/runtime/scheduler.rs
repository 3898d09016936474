//! Round-robin cooperative scheduler.
//!
//! # Tick protocol
//!
//! Each tick:
//!
//! 1. Pending requests are applied: pause requests first, then wake requests
//!    (so a wake issued alongside a pause wins), then queued activations.
//! 2. The run queue is snapshotted and every unit in the snapshot is resumed
//!    exactly once, in the order it became runnable.
//! 3. Units that yielded go to the back of the next run queue; units that
//!    paused go to sleep; finished or faulted units are removed for good.
//!
//! Units spawned during a tick are admitted at the start of the next one,
//! so they never run in the tick that created them.
//!
//! # Faults
//!
//! A unit that returns `Err` or panics is terminated. Under
//! [`FaultPolicy::Strict`] the fault is returned from [`Scheduler::tick`] and
//! the run loop halts; under [`FaultPolicy::Resilient`] the fault is logged,
//! recorded as a [`FaultReport`], and every other unit keeps running.

use std::any::Any;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;
use tracing::{debug, debug_span, error, info, trace, warn};

use crate::cx::Cx;
use crate::error::{Error, ErrorKind, Result};
use crate::runtime::builder::SchedulerBuilder;
use crate::runtime::config::{FaultPolicy, SchedulerConfig};
use crate::runtime::handle::{Activation, SchedulerHandle};
use crate::types::UnitId;
use crate::unit::{Exit, Microprocess, Resume, UnitState};

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Tick number.
    pub tick: u64,
    /// Units resumed.
    pub resumed: usize,
    /// Units that yielded.
    pub yielded: usize,
    /// Units that paused.
    pub paused: usize,
    /// Units that completed.
    pub terminated: usize,
    /// Units that faulted.
    pub faulted: usize,
}

/// A fault swallowed in resilient mode.
#[derive(Debug, Clone)]
pub struct FaultReport {
    /// The faulting unit.
    pub unit: UnitId,
    /// Its name at the time of the fault.
    pub name: String,
    /// Tick in which it faulted.
    pub tick: u64,
    /// The fault.
    pub error: Error,
}

/// One live unit, as seen by [`Scheduler::snapshot`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitInfo {
    /// The unit.
    pub id: UnitId,
    /// Its name.
    pub name: String,
    /// Runnable or sleeping.
    pub state: UnitState,
    /// The unit that spawned it, if any.
    pub parent: Option<UnitId>,
    /// Times it has been resumed.
    pub resumes: u64,
}

/// Why a run call returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// No units remain.
    Drained,
    /// Units remain but none is runnable.
    Idle,
    /// A stop was requested.
    Stopped,
    /// The configured tick limit was reached.
    TickLimit,
}

/// Summary of a run call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    /// Ticks executed by this call.
    pub ticks: u64,
    /// Why the call returned.
    pub exit: RunExit,
}

struct Slot {
    unit: Box<dyn Microprocess>,
    state: UnitState,
    parent: Option<UnitId>,
    resumes: u64,
}

/// A single-threaded cooperative scheduler.
///
/// The scheduler value is owned by the thread that drives it; other threads
/// interact through its [`SchedulerHandle`].
pub struct Scheduler {
    config: SchedulerConfig,
    handle: SchedulerHandle,
    units: BTreeMap<UnitId, Slot>,
    run_queue: VecDeque<UnitId>,
    retired: HashSet<UnitId>,
    faults: Vec<FaultReport>,
    tick: u64,
    last_tick_at: Option<Instant>,
    ever_activated: bool,
}

impl Scheduler {
    /// Creates a scheduler from a configuration.
    #[must_use]
    pub fn new(mut config: SchedulerConfig) -> Self {
        config.normalize();
        let handle = SchedulerHandle::new(config.threads.clone());
        debug!(
            scheduler = handle.scheduler_id(),
            fault_policy = ?config.fault_policy,
            "scheduler created"
        );
        Self {
            config,
            handle,
            units: BTreeMap::new(),
            run_queue: VecDeque::new(),
            retired: HashSet::new(),
            faults: Vec::new(),
            tick: 0,
            last_tick_at: None,
            ever_activated: false,
        }
    }

    /// Returns a builder with default configuration.
    #[must_use]
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// The scheduler's configuration.
    #[must_use]
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// A handle usable from units and other threads.
    #[must_use]
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Adds a unit in the runnable state. It runs on the next tick.
    pub fn register(&mut self, unit: Box<dyn Microprocess>) -> UnitId {
        self.admit(unit, None)
    }

    fn admit(&mut self, unit: Box<dyn Microprocess>, parent: Option<UnitId>) -> UnitId {
        let id = unit.id();
        if self.units.contains_key(&id) || self.retired.contains(&id) {
            warn!(unit = %id, "ignoring duplicate registration");
            return id;
        }
        debug!(unit = %id, name = %unit.name(), parent = ?parent, "unit activated");
        self.handle.roster_admit(id, unit.name());
        self.units.insert(
            id,
            Slot {
                unit,
                state: UnitState::Runnable,
                parent,
                resumes: 0,
            },
        );
        self.run_queue.push_back(id);
        self.ever_activated = true;
        id
    }

    fn apply_requests(&mut self) {
        for id in self.handle.drain_paused() {
            if let Some(slot) = self.units.get_mut(&id) {
                if slot.state == UnitState::Runnable {
                    slot.state = UnitState::Sleeping;
                    self.run_queue.retain(|queued| *queued != id);
                    trace!(unit = %id, "unit paused by request");
                }
            }
        }
        for id in self.handle.drain_woken() {
            if let Some(slot) = self.units.get_mut(&id) {
                if slot.state == UnitState::Sleeping {
                    slot.state = UnitState::Runnable;
                    self.run_queue.push_back(id);
                    trace!(unit = %id, "unit woken");
                }
            }
        }
        while let Some(Activation { unit, parent }) = self.handle.pop_activation() {
            self.admit(unit, parent);
        }
    }

    /// Runs exactly one tick.
    pub fn tick(&mut self) -> Result<TickReport> {
        self.apply_requests();
        self.tick += 1;
        let tick = self.tick;
        let now = Instant::now();
        self.last_tick_at = Some(now);

        let span = debug_span!("tick", tick);
        let _guard = span.enter();

        let mut report = TickReport {
            tick,
            ..TickReport::default()
        };
        let batch: Vec<UnitId> = self.run_queue.drain(..).collect();

        for (index, id) in batch.iter().copied().enumerate() {
            let Some(slot) = self.units.get_mut(&id) else {
                continue;
            };
            if slot.state != UnitState::Runnable {
                continue;
            }
            slot.resumes += 1;
            report.resumed += 1;

            let outcome = {
                let mut cx = Cx::new(id, tick, now, &self.handle);
                let unit = &mut slot.unit;
                catch_unwind(AssertUnwindSafe(|| unit.resume(&mut cx)))
            };

            let fault = match outcome {
                Ok(Ok(Resume::Yield)) => {
                    report.yielded += 1;
                    self.run_queue.push_back(id);
                    None
                }
                Ok(Ok(Resume::Pause)) => {
                    report.paused += 1;
                    slot.state = UnitState::Sleeping;
                    trace!(unit = %id, "unit paused");
                    None
                }
                Ok(Ok(Resume::Done)) => {
                    report.terminated += 1;
                    self.terminate(id, &Exit::Completed);
                    None
                }
                Ok(Err(err)) => Some(err),
                Err(payload) => Some(Error::unit_fault(
                    id,
                    format!("panicked: {}", panic_message(payload.as_ref())),
                )),
            };

            if let Some(err) = fault {
                report.faulted += 1;
                if let Err(fatal) = self.handle_fault(id, err) {
                    // Units not yet resumed this tick keep their place at the front.
                    let rest: Vec<UnitId> = batch[index + 1..].to_vec();
                    for queued in rest.into_iter().rev() {
                        self.run_queue.push_front(queued);
                    }
                    return Err(fatal);
                }
            }
        }

        trace!(
            resumed = report.resumed,
            yielded = report.yielded,
            paused = report.paused,
            terminated = report.terminated,
            faulted = report.faulted,
            "tick complete"
        );
        Ok(report)
    }

    fn handle_fault(&mut self, id: UnitId, err: Error) -> Result<()> {
        let name = self
            .units
            .get(&id)
            .map_or_else(String::new, |slot| slot.unit.name().to_string());
        let fault = if err.kind() == ErrorKind::UnitFault {
            err
        } else {
            Error::unit_fault(id, format!("unit {name} failed: {err}")).with_source(err)
        };
        self.terminate(id, &Exit::Faulted(fault.clone()));

        match self.config.fault_policy {
            FaultPolicy::Strict => {
                error!(unit = %id, name = %name, error = %fault, "unit fault, halting scheduler");
                Err(fault)
            }
            FaultPolicy::Resilient => {
                warn!(unit = %id, name = %name, error = %fault, "unit fault, unit terminated");
                self.faults.push(FaultReport {
                    unit: id,
                    name,
                    tick: self.tick,
                    error: fault,
                });
                Ok(())
            }
        }
    }

    fn terminate(&mut self, id: UnitId, exit: &Exit) {
        let Some(mut slot) = self.units.remove(&id) else {
            return;
        };
        self.run_queue.retain(|queued| *queued != id);
        self.retired.insert(id);
        self.handle.roster_retire(id);
        slot.state = UnitState::Terminated;

        let mut cx = Cx::new(id, self.tick, Instant::now(), &self.handle);
        let unit = &mut slot.unit;
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| unit.on_terminate(&mut cx, exit))) {
            warn!(
                unit = %id,
                panic = %panic_message(payload.as_ref()),
                "termination hook panicked"
            );
        }
        debug!(
            unit = %id,
            name = %slot.unit.name(),
            resumes = slot.resumes,
            exit = ?exit,
            "unit terminated"
        );
        if let Some(parent) = slot.parent {
            self.handle.wake(parent);
        }
    }

    fn stop_all(&mut self) {
        self.handle.clear_stop();
        let live: Vec<UnitId> = self.units.keys().copied().collect();
        info!(units = live.len(), "scheduler stopping");
        for id in live {
            self.terminate(id, &Exit::Stopped);
        }
    }

    fn tick_limit_reached(&self, ticks: u64) -> bool {
        self.config.max_ticks.is_some_and(|limit| ticks >= limit)
    }

    fn pace(&self) {
        if !self.config.slowmo.is_zero() {
            std::thread::sleep(self.config.slowmo);
        }
    }

    /// Ticks until no unit is runnable.
    ///
    /// Returns [`RunExit::Idle`] if sleeping units remain, [`RunExit::Drained`]
    /// if none do. Never parks.
    pub fn run_until_idle(&mut self) -> Result<RunReport> {
        let mut ticks = 0;
        loop {
            if self.handle.is_stop_requested() {
                self.stop_all();
                return Ok(RunReport {
                    ticks,
                    exit: RunExit::Stopped,
                });
            }
            self.apply_requests();
            if self.run_queue.is_empty() {
                let exit = if self.units.is_empty() {
                    RunExit::Drained
                } else {
                    RunExit::Idle
                };
                return Ok(RunReport { ticks, exit });
            }
            if self.tick_limit_reached(ticks) {
                return Ok(RunReport {
                    ticks,
                    exit: RunExit::TickLimit,
                });
            }
            self.tick()?;
            ticks += 1;
            self.pace();
        }
    }

    /// Ticks until no units remain, parking while every unit sleeps.
    ///
    /// A scheduler that never had a unit returns immediately, unless
    /// `wait_for_one` is configured.
    pub fn run(&mut self) -> Result<RunReport> {
        let mut ticks = 0;
        loop {
            if self.handle.is_stop_requested() {
                self.stop_all();
                return Ok(RunReport {
                    ticks,
                    exit: RunExit::Stopped,
                });
            }
            self.apply_requests();
            if self.units.is_empty() {
                if self.config.wait_for_one && !self.ever_activated {
                    self.handle.park_timeout(self.config.idle_park_timeout);
                    continue;
                }
                debug!(ticks, "scheduler drained");
                return Ok(RunReport {
                    ticks,
                    exit: RunExit::Drained,
                });
            }
            if self.run_queue.is_empty() {
                trace!(sleeping = self.units.len(), "all units asleep, parking");
                self.handle.park_timeout(self.config.idle_park_timeout);
                continue;
            }
            if self.tick_limit_reached(ticks) {
                return Ok(RunReport {
                    ticks,
                    exit: RunExit::TickLimit,
                });
            }
            self.tick()?;
            ticks += 1;
            self.pace();
        }
    }

    /// Alias for [`run`](Self::run).
    pub fn run_forever(&mut self) -> Result<RunReport> {
        self.run()
    }

    /// Requests a stop; the run loop returns after the current tick.
    pub fn stop(&self) {
        self.handle.request_stop();
    }

    /// Ids of all live units, in id order.
    #[must_use]
    pub fn list_units(&self) -> Vec<UnitId> {
        self.units.keys().copied().collect()
    }

    /// Every live unit, in id order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<UnitInfo> {
        self.units
            .iter()
            .map(|(id, slot)| UnitInfo {
                id: *id,
                name: slot.unit.name().to_string(),
                state: slot.state,
                parent: slot.parent,
                resumes: slot.resumes,
            })
            .collect()
    }

    /// State of a unit, or `None` if this scheduler never admitted it.
    #[must_use]
    pub fn unit_state(&self, id: UnitId) -> Option<UnitState> {
        self.units.get(&id).map(|slot| slot.state).or_else(|| {
            self.retired
                .contains(&id)
                .then_some(UnitState::Terminated)
        })
    }

    /// Returns true unless the unit is live and runnable.
    #[must_use]
    pub fn is_paused(&self, id: UnitId) -> bool {
        self.unit_state(id) != Some(UnitState::Runnable)
    }

    /// How many times a live unit has been resumed.
    #[must_use]
    pub fn resume_count(&self, id: UnitId) -> Option<u64> {
        self.units.get(&id).map(|slot| slot.resumes)
    }

    /// Number of live units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.units.len()
    }

    /// Returns true if no units are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Number of units that will run next tick.
    #[must_use]
    pub fn runnable_count(&self) -> usize {
        self.run_queue.len()
    }

    /// Ticks run so far.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    /// Timestamp of the most recent tick.
    #[must_use]
    pub fn time(&self) -> Option<Instant> {
        self.last_tick_at
    }

    /// Faults recorded in resilient mode.
    #[must_use]
    pub fn faults(&self) -> &[FaultReport] {
        &self.faults
    }

    /// Takes the recorded faults.
    pub fn take_faults(&mut self) -> Vec<FaultReport> {
        std::mem::take(&mut self.faults)
    }

    /// Returns true if requests are waiting to be applied.
    #[must_use]
    pub fn has_pending_requests(&self) -> bool {
        self.handle.has_pending()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new(SchedulerConfig::default())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if !self.units.is_empty() {
            self.stop_all();
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("handle", &self.handle)
            .field("units", &self.units.len())
            .field("runnable", &self.run_queue.len())
            .field("tick", &self.tick)
            .finish_non_exhaustive()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
