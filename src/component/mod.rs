//! Components: units with named mailboxes and a lifecycle.
//!
//! A [`Component`] wraps a [`Behaviour`] and gives it:
//!
//! - a set of named boxes declared with a [`BoxSpec`] (by default `inbox` and
//!   `control` in, `outbox` and `signal` out)
//! - a [`Postoffice`] that remembers the linkages it created and removes them
//!   when the component terminates
//! - a list of child units
//!
//! Code outside the scheduler talks to a component through a
//! [`ComponentHandle`].
//!
//! # Lifecycle
//!
//! ```text
//! initialise ──► main_body ──► main_body ──► … ──► close_down
//!                  (Yield / Pause)          (Done)
//! ```
//!
//! `initialise` runs once, immediately before the first `main_body`. When
//! `main_body` returns [`Resume::Done`], `close_down` runs and the component
//! terminates. If the scheduler stops the component first, `close_down` still
//! runs from the termination hook.
//!
//! By convention a component that receives [`Signal::ProducerFinished`] or
//! [`Signal::Shutdown`] on `control` finishes what it is doing, forwards the
//! signal on `signal`, and returns `Done`.
//!
//! [`Signal::ProducerFinished`]: crate::message::Signal::ProducerFinished
//! [`Signal::Shutdown`]: crate::message::Signal::Shutdown

mod context;
mod handle;

pub use context::ComponentCx;
pub use handle::ComponentHandle;

use std::fmt;
use tracing::{debug, warn};

use crate::cx::Cx;
use crate::error::{Result, SendError};
use crate::link::Postoffice;
use crate::mailbox::{BoxSpec, Boxes, Postbox, CONTROL, INBOX, OUTBOX, SIGNAL};
use crate::message::Message;
use crate::runtime::SchedulerHandle;
use crate::types::{LinkageId, UnitId};
use crate::unit::{Exit, Microprocess, Resume};

/// The application logic of a component.
pub trait Behaviour: Send {
    /// Runs once before the first [`main_body`](Self::main_body).
    fn initialise(&mut self, _cx: &mut ComponentCx<'_>) -> Result<()> {
        Ok(())
    }

    /// Does one slice of work.
    fn main_body(&mut self, cx: &mut ComponentCx<'_>) -> Result<Resume>;

    /// Runs once as the component finishes.
    fn close_down(&mut self, _cx: &mut ComponentCx<'_>) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Init,
    Main,
    Closed,
}

/// A unit with mailboxes, linkages and children.
pub struct Component {
    id: UnitId,
    name: String,
    boxes: Boxes,
    postoffice: Postoffice,
    children: Vec<UnitId>,
    behaviour: Box<dyn Behaviour>,
    phase: Phase,
}

impl Component {
    /// Builds a component whose boxes wake it through `handle`.
    ///
    /// Fails if `spec` declares a box name twice.
    pub fn new(
        handle: &SchedulerHandle,
        name: impl Into<String>,
        spec: &BoxSpec,
        behaviour: impl Behaviour + 'static,
    ) -> Result<Self> {
        let id = UnitId::next();
        let boxes = Boxes::from_spec(id, spec, Some(handle.clone()))?;
        let name = name.into();
        debug!(unit = %id, name = %name, inboxes = boxes.inboxes().len(), outboxes = boxes.outboxes().len(), "component created");
        Ok(Self {
            id,
            name,
            boxes,
            postoffice: Postoffice::for_unit(id),
            children: Vec::new(),
            behaviour: Box::new(behaviour),
            phase: Phase::Init,
        })
    }

    /// Builds a component with the standard four boxes.
    pub fn standard(
        handle: &SchedulerHandle,
        name: impl Into<String>,
        behaviour: impl Behaviour + 'static,
    ) -> Result<Self> {
        Self::new(handle, name, &BoxSpec::standard(), behaviour)
    }

    /// Id of this component.
    #[must_use]
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Handle to an inbox, for wiring from outside.
    pub fn inbox(&self, name: &str) -> Result<Postbox> {
        self.boxes.require_inbox(name).cloned()
    }

    /// Handle to an outbox, for wiring from outside.
    pub fn outbox(&self, name: &str) -> Result<Postbox> {
        self.boxes.require_outbox(name).cloned()
    }

    /// The component's boxes.
    #[must_use]
    pub fn boxes(&self) -> &Boxes {
        &self.boxes
    }

    /// Linkages owned by this component.
    #[must_use]
    pub fn postoffice(&self) -> &Postoffice {
        &self.postoffice
    }

    /// Links two boxes before the component starts; the linkage is owned by
    /// this component.
    pub fn link(&mut self, source: &Postbox, sink: &Postbox) -> Result<LinkageId> {
        self.postoffice.link(source, sink)
    }

    /// Children added so far.
    #[must_use]
    pub fn children(&self) -> &[UnitId] {
        &self.children
    }

    /// Places a message directly into one of this component's inboxes.
    ///
    /// Meant for test harnesses and bootstrapping; components talk to each
    /// other through linkages.
    pub fn deliver(&self, msg: impl Into<Message>, inbox: &str) -> core::result::Result<(), SendError<Message>> {
        let msg = msg.into();
        match self.boxes.inbox(inbox) {
            Some(postbox) => postbox.send(msg),
            None => Err(SendError::Unknown(msg)),
        }
    }

    /// Boxes this component up for the scheduler.
    #[must_use]
    pub fn boxed(self) -> Box<dyn Microprocess> {
        Box::new(self)
    }

    fn run_close_down(&mut self, cx: &Cx<'_>) -> Result<()> {
        if self.phase == Phase::Closed {
            return Ok(());
        }
        self.phase = Phase::Closed;
        let result = {
            let mut ccx = ComponentCx {
                id: self.id,
                name: &self.name,
                tick: cx.tick(),
                now: cx.now(),
                handle: cx.handle(),
                boxes: &mut self.boxes,
                postoffice: &mut self.postoffice,
                children: &mut self.children,
            };
            self.behaviour.close_down(&mut ccx)
        };
        self.release(cx.handle());
        result
    }

    fn release(&mut self, handle: &SchedulerHandle) {
        let unlinked = self.postoffice.unlink_all();
        let services = handle.registry().deregister_unit(self.id);
        debug!(
            unit = %self.id,
            unlinked,
            services = services.len(),
            "component released"
        );
    }
}

impl Microprocess for Component {
    fn id(&self) -> UnitId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn resume(&mut self, cx: &mut Cx<'_>) -> Result<Resume> {
        if self.phase == Phase::Closed {
            return Ok(Resume::Done);
        }
        let outcome = {
            let mut ccx = ComponentCx {
                id: self.id,
                name: &self.name,
                tick: cx.tick(),
                now: cx.now(),
                handle: cx.handle(),
                boxes: &mut self.boxes,
                postoffice: &mut self.postoffice,
                children: &mut self.children,
            };
            if self.phase == Phase::Init {
                self.behaviour.initialise(&mut ccx)?;
                self.phase = Phase::Main;
            }
            self.behaviour.main_body(&mut ccx)?
        };
        if outcome == Resume::Done {
            self.run_close_down(cx)?;
        }
        Ok(outcome)
    }

    fn on_terminate(&mut self, cx: &mut Cx<'_>, exit: &Exit) {
        if self.phase == Phase::Closed {
            return;
        }
        if matches!(exit, Exit::Stopped) {
            if let Err(err) = self.run_close_down(cx) {
                warn!(unit = %self.id, error = %err, "close_down failed during stop");
            }
        } else {
            self.phase = Phase::Closed;
            self.release(cx.handle());
        }
    }
}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("boxes", &self.boxes)
            .field("linkages", &self.postoffice.len())
            .field("children", &self.children)
            .finish_non_exhaustive()
    }
}

/// Wires components into a chain: each `outbox` to the next `inbox`, and each
/// `signal` to the next `control`. The linkages are recorded in `postoffice`.
pub fn link_pipeline(postoffice: &mut Postoffice, components: &[&Component]) -> Result<Vec<LinkageId>> {
    let mut ids = Vec::with_capacity(components.len().saturating_sub(1) * 2);
    for pair in components.windows(2) {
        let (upstream, downstream) = (pair[0], pair[1]);
        ids.push(postoffice.link(&upstream.outbox(OUTBOX)?, &downstream.inbox(INBOX)?)?);
        ids.push(postoffice.link(&upstream.outbox(SIGNAL)?, &downstream.inbox(CONTROL)?)?);
    }
    Ok(ids)
}
