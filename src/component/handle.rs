//! Driving a scheduled component from ordinary code.
//!
//! A [`ComponentHandle`] activates a component and keeps one end of each of
//! its boxes: sends go straight into the component's inboxes, and each
//! outbox is linked to a private unbounded inbox the caller reads from. All
//! of it is safe from any thread, so a plain `main` (or a test) can feed a
//! component while another thread runs the scheduler.

use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::component::Component;
use crate::error::{Error, RecvError, Result, SendError};
use crate::mailbox::{Capacity, Postbox, CONTROL, INBOX, OUTBOX, SIGNAL};
use crate::message::{Message, Signal};
use crate::runtime::SchedulerHandle;
use crate::types::UnitId;

/// Put/get access to a component running on a scheduler.
pub struct ComponentHandle {
    unit: UnitId,
    inboxes: BTreeMap<String, Postbox>,
    collected: BTreeMap<String, Postbox>,
}

impl ComponentHandle {
    /// Wires up every box of `component` and hands it to `handle`'s
    /// scheduler. It runs from the next tick on.
    ///
    /// Fails if one of the component's outboxes already forwards somewhere.
    pub fn activate(handle: &SchedulerHandle, mut component: Component) -> Result<Self> {
        let inboxes: BTreeMap<String, Postbox> = component
            .boxes()
            .inboxes()
            .iter()
            .map(|postbox| (postbox.name().to_string(), postbox.clone()))
            .collect();
        let outboxes: Vec<Postbox> = component.boxes().outboxes().to_vec();

        let mut collected = BTreeMap::new();
        for outbox in outboxes {
            let sink = Postbox::detached_inbox(format!("handle-{}", outbox.name()), Capacity::Unbounded);
            component.link(&outbox, &sink)?;
            collected.insert(outbox.name().to_string(), sink);
        }

        let unit = handle.activate(component.boxed());
        debug!(unit = %unit, inboxes = inboxes.len(), outboxes = collected.len(), "component handle activated");
        Ok(Self {
            unit,
            inboxes,
            collected,
        })
    }

    /// Id of the wrapped component.
    #[must_use]
    pub fn unit_id(&self) -> UnitId {
        self.unit
    }

    /// Delivers `msg` to the named inbox, waking the component.
    ///
    /// Fails with [`SendError::Full`] if the inbox is bounded and full, and
    /// with [`SendError::Unknown`] if there is no such inbox.
    pub fn put(&self, msg: impl Into<Message>, inbox: &str) -> core::result::Result<(), SendError<Message>> {
        let msg = msg.into();
        match self.inboxes.get(inbox) {
            Some(postbox) => postbox.send(msg),
            None => Err(SendError::Unknown(msg)),
        }
    }

    /// Delivers a payload to `inbox`.
    pub fn put_value<T: std::any::Any + Send>(&self, value: T) -> core::result::Result<(), SendError<Message>> {
        self.put(Message::new(value), INBOX)
    }

    /// Takes the oldest message the component sent on the named outbox.
    pub fn get(&self, outbox: &str) -> core::result::Result<Message, RecvError> {
        self.collected.get(outbox).ok_or(RecvError::Unknown)?.recv()
    }

    /// Takes the oldest payload from `outbox` and downcasts it.
    ///
    /// Returns `Ok(None)` if nothing is waiting; fails if the payload is not
    /// a `T`, in which case it is dropped.
    pub fn get_value<T: std::any::Any>(&self) -> Result<Option<T>> {
        match self.get(OUTBOX) {
            Ok(msg) => msg
                .downcast::<T>()
                .map(Some)
                .map_err(|_| Error::user(format!("unexpected payload type on {OUTBOX}"))),
            Err(RecvError::Empty) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    /// Takes the next lifecycle signal the component sent on `signal`.
    #[must_use]
    pub fn get_signal(&self) -> Option<Signal> {
        self.get(SIGNAL).ok().and_then(|msg| msg.as_signal())
    }

    /// Returns true if the named outbox has something to collect.
    #[must_use]
    pub fn data_ready(&self, outbox: &str) -> bool {
        self.collected.get(outbox).is_some_and(Postbox::data_ready)
    }

    /// Sends [`Signal::ProducerFinished`] to `control`.
    pub fn finish(&self) -> core::result::Result<(), SendError<Message>> {
        self.put(Signal::ProducerFinished { from: None }, CONTROL)
    }

    /// Sends [`Signal::Shutdown`] to `control`.
    pub fn shutdown(&self) -> core::result::Result<(), SendError<Message>> {
        self.put(Signal::Shutdown { from: None }, CONTROL)
    }
}

impl fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("unit", &self.unit)
            .field("inboxes", &self.inboxes.keys().collect::<Vec<_>>())
            .field("outboxes", &self.collected.keys().collect::<Vec<_>>())
            .finish()
    }
}
