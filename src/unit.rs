//! Scheduling units.
//!
//! A scheduling unit (a *microprocess*) is a piece of work the scheduler
//! resumes repeatedly. Each call to [`Microprocess::resume`] runs the unit up
//! to its next suspension point and reports what happened:
//!
//! - [`Resume::Yield`]: more work to do, schedule again next tick
//! - [`Resume::Pause`]: nothing to do until someone calls `wake`
//! - [`Resume::Done`]: finished, never resume again
//!
//! Returning `Err` (or panicking) is a unit fault. What happens next depends
//! on the scheduler's [`FaultPolicy`](crate::runtime::FaultPolicy).
//!
//! Units keep their own resume state explicitly; see [`FnUnit`] for the
//! closure form and [`Component`](crate::component::Component) for the
//! mailbox-driven form.

use core::fmt;

use crate::cx::Cx;
use crate::error::{Error, Result};
use crate::types::UnitId;

/// Outcome of a single resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resume {
    /// Suspend voluntarily; run again next tick.
    Yield,
    /// Sleep until woken.
    Pause,
    /// Finished.
    Done,
}

/// Scheduler-visible state of a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    /// Will be resumed on the next tick.
    Runnable,
    /// Excluded from ticks until woken.
    Sleeping,
    /// Will never be resumed again.
    Terminated,
}

/// Why a unit terminated.
#[derive(Debug, Clone)]
pub enum Exit {
    /// The unit returned [`Resume::Done`].
    Completed,
    /// The unit returned an error or panicked.
    Faulted(Error),
    /// The scheduler was stopped while the unit was still live.
    Stopped,
}

impl Exit {
    /// Returns true if the unit finished on its own.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

/// A cooperatively scheduled unit of work.
pub trait Microprocess: Send {
    /// Identity of this unit, fixed for its lifetime.
    fn id(&self) -> UnitId;

    /// Human-readable name used in logs.
    fn name(&self) -> &str {
        "microprocess"
    }

    /// Runs until the next suspension point.
    fn resume(&mut self, cx: &mut Cx<'_>) -> Result<Resume>;

    /// Called once after the unit leaves the scheduler, whatever the reason.
    fn on_terminate(&mut self, _cx: &mut Cx<'_>, _exit: &Exit) {}
}

/// A unit driven by a closure.
///
/// The closure owns whatever state it captures, which is how it remembers
/// where it left off between resumes.
pub struct FnUnit<F> {
    id: UnitId,
    name: String,
    body: F,
}

impl<F> FnUnit<F>
where
    F: FnMut(&mut Cx<'_>) -> Result<Resume> + Send,
{
    /// Wraps `body` as a unit named `name`.
    pub fn new(name: impl Into<String>, body: F) -> Self {
        Self {
            id: UnitId::next(),
            name: name.into(),
            body,
        }
    }
}

impl<F> Microprocess for FnUnit<F>
where
    F: FnMut(&mut Cx<'_>) -> Result<Resume> + Send,
{
    fn id(&self) -> UnitId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn resume(&mut self, cx: &mut Cx<'_>) -> Result<Resume> {
        (self.body)(cx)
    }
}

impl<F> fmt::Debug for FnUnit<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnUnit")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Shorthand for [`FnUnit::new`], boxed for handing to a scheduler.
pub fn unit_fn<F>(name: impl Into<String>, body: F) -> Box<dyn Microprocess>
where
    F: FnMut(&mut Cx<'_>) -> Result<Resume> + Send + 'static,
{
    Box::new(FnUnit::new(name, body))
}
