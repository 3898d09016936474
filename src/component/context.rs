//! The view a component's behaviour gets of itself while it runs.

use std::any::Any;
use std::time::Instant;
use tracing::debug;

use crate::error::{RecvError, Result, SendError};
use crate::link::Postoffice;
use crate::mailbox::{Boxes, Capacity, Postbox};
use crate::message::{Message, Signal};
use crate::registry::ServiceRegistry;
use crate::runtime::SchedulerHandle;
use crate::types::{LinkageId, UnitId};
use crate::unit::Microprocess;

/// Mailbox, linkage and child operations available inside a behaviour hook.
#[derive(Debug)]
pub struct ComponentCx<'a> {
    pub(super) id: UnitId,
    pub(super) name: &'a str,
    pub(super) tick: u64,
    pub(super) now: Instant,
    pub(super) handle: &'a SchedulerHandle,
    pub(super) boxes: &'a mut Boxes,
    pub(super) postoffice: &'a mut Postoffice,
    pub(super) children: &'a mut Vec<UnitId>,
}

impl<'a> ComponentCx<'a> {
    /// Id of the running component.
    #[must_use]
    pub fn id(&self) -> UnitId {
        self.id
    }

    /// Name of the running component.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    /// Tick in progress.
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

    // ── mailboxes ──

    /// Sends `msg` through the named outbox.
    ///
    /// An unlinked outbox accepts and discards. A full destination hands the
    /// message back in [`SendError::Full`]; retry on a later tick.
    pub fn send(&self, msg: impl Into<Message>, outbox: &str) -> core::result::Result<(), SendError<Message>> {
        let msg = msg.into();
        match self.boxes.outbox(outbox) {
            Some(postbox) => postbox.send(msg),
            None => Err(SendError::Unknown(msg)),
        }
    }

    /// Wraps `value` as a payload and sends it through the named outbox.
    pub fn send_value<T: Any + Send>(&self, value: T, outbox: &str) -> core::result::Result<(), SendError<Message>> {
        self.send(Message::new(value), outbox)
    }

    /// Sends a lifecycle signal attributed to this component.
    pub fn send_signal(&self, signal: Signal, outbox: &str) -> core::result::Result<(), SendError<Message>> {
        self.send(signal.forwarded_by(self.id), outbox)
    }

    /// Takes the oldest message from the named inbox.
    pub fn recv(&self, inbox: &str) -> core::result::Result<Message, RecvError> {
        self.boxes.inbox(inbox).ok_or(RecvError::Unknown)?.recv()
    }

    /// Returns true if the named inbox holds a message.
    #[must_use]
    pub fn data_ready(&self, inbox: &str) -> bool {
        self.boxes.inbox(inbox).is_some_and(Postbox::data_ready)
    }

    /// Returns true if any inbox holds a message.
    #[must_use]
    pub fn any_ready(&self) -> bool {
        self.boxes.any_ready()
    }

    /// Takes every message waiting in the named inbox, oldest first.
    pub fn inbox_iter(&self, inbox: &str) -> std::vec::IntoIter<Message> {
        self.boxes
            .inbox(inbox)
            .map(Postbox::drain)
            .unwrap_or_default()
            .into_iter()
    }

    /// Returns true if a send through the named outbox would be refused.
    #[must_use]
    pub fn is_full(&self, outbox: &str) -> bool {
        self.boxes.outbox(outbox).is_some_and(Postbox::is_full)
    }

    /// Handle to one of this component's inboxes.
    pub fn inbox(&self, name: &str) -> Result<Postbox> {
        self.boxes.require_inbox(name).cloned()
    }

    /// Handle to one of this component's outboxes.
    pub fn outbox(&self, name: &str) -> Result<Postbox> {
        self.boxes.require_outbox(name).cloned()
    }

    /// Changes the bound of one of this component's inboxes.
    pub fn set_capacity(&self, inbox: &str, capacity: Capacity) -> Result<()> {
        self.boxes.require_inbox(inbox)?.set_capacity(capacity);
        Ok(())
    }

    /// Adds an inbox; the returned name is `base` made unique.
    pub fn add_inbox(&mut self, base: &str, capacity: Capacity) -> String {
        self.boxes.add_inbox(base, capacity)
    }

    /// Adds an outbox; the returned name is `base` made unique.
    pub fn add_outbox(&mut self, base: &str) -> String {
        self.boxes.add_outbox(base)
    }

    /// Deletes an inbox along with this component's linkages touching it.
    pub fn delete_inbox(&mut self, name: &str) -> Result<()> {
        let postbox = self.boxes.delete_inbox(name)?;
        self.postoffice.unlink_box(&postbox);
        Ok(())
    }

    /// Deletes an outbox along with this component's linkages touching it.
    pub fn delete_outbox(&mut self, name: &str) -> Result<()> {
        let postbox = self.boxes.delete_outbox(name)?;
        self.postoffice.unlink_box(&postbox);
        Ok(())
    }

    // ── linkages ──

    /// Links two boxes; the linkage is owned by this component and removed
    /// when it terminates.
    pub fn link(&mut self, source: &Postbox, sink: &Postbox) -> Result<LinkageId> {
        self.postoffice.link(source, sink)
    }

    /// Removes a linkage this component created.
    pub fn unlink(&mut self, id: LinkageId) -> bool {
        self.postoffice.unlink(id)
    }

    // ── children ──

    /// Activates `child` as a child of this component.
    ///
    /// The child becomes runnable next tick; this component is woken when it
    /// terminates.
    pub fn add_child(&mut self, child: Box<dyn Microprocess>) -> UnitId {
        let id = self.handle.activate_child(self.id, child);
        debug!(parent = %self.id, child = %id, "child added");
        self.children.push(id);
        id
    }

    /// Forgets a child and removes this component's linkages involving it.
    pub fn remove_child(&mut self, child: UnitId) -> bool {
        let before = self.children.len();
        self.children.retain(|c| *c != child);
        let removed = self.children.len() != before;
        if removed {
            let unlinked = self.postoffice.unlink_unit(child);
            debug!(parent = %self.id, child = %child, unlinked = unlinked.len(), "child removed");
        }
        removed
    }

    /// Children added and not yet removed.
    #[must_use]
    pub fn children(&self) -> &[UnitId] {
        self.children
    }

    /// Activates an unrelated unit on the same scheduler.
    pub fn spawn(&self, unit: Box<dyn Microprocess>) -> UnitId {
        self.handle.activate(unit)
    }

    /// Wakes another unit.
    pub fn wake(&self, unit: UnitId) {
        self.handle.wake(unit);
    }
}
