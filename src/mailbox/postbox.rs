//! A single named mailbox.
//!
//! A [`Postbox`] is a cloneable, thread-safe handle. Boxes form forwarding
//! chains: once a box is linked to a destination, anything sent to it lands
//! in the storage of the last box in the chain, and only that box's capacity
//! is enforced. An outbox at the end of a chain has nowhere to put messages
//! and silently discards them.
//!
//! # Wake-ups
//!
//! - Delivering a message wakes the owner of the box that stored it.
//! - Taking a message wakes the owners of every box upstream of it, so a
//!   producer that hit [`SendError::Full`] is resumed once space frees up.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::trace;

use crate::error::{Error, ErrorKind, RecvError, Result, SendError};
use crate::message::Message;
use crate::runtime::SchedulerHandle;
use crate::types::{BoxId, UnitId};

/// Capacity of a box's local storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Capacity {
    /// No limit.
    #[default]
    Unbounded,
    /// At most `n` messages may be waiting.
    Bounded(usize),
}

impl Capacity {
    fn admits(self, len: usize) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Bounded(limit) => len < limit,
        }
    }
}

/// Which side of a component a box sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Receives messages; has storage.
    Inbox,
    /// Emits messages; discards them unless linked.
    Outbox,
}

struct State {
    queue: VecDeque<Message>,
    capacity: Capacity,
    target: Option<Postbox>,
    sources: Vec<Weak<Inner>>,
}

struct Inner {
    id: BoxId,
    name: String,
    owner: Option<UnitId>,
    direction: Direction,
    notifier: Option<SchedulerHandle>,
    state: Mutex<State>,
}

/// Handle to a named mailbox.
#[derive(Clone)]
pub struct Postbox {
    inner: Arc<Inner>,
}

impl Postbox {
    pub(crate) fn new(
        name: impl Into<String>,
        owner: Option<UnitId>,
        direction: Direction,
        capacity: Capacity,
        notifier: Option<SchedulerHandle>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                id: BoxId::next(),
                name: name.into(),
                owner,
                direction,
                notifier,
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    capacity,
                    target: None,
                    sources: Vec::new(),
                }),
            }),
        }
    }

    /// Creates an inbox that belongs to no unit.
    ///
    /// Useful as a collection point for code outside the scheduler, such as
    /// a test harness or a thread bridge handle.
    #[must_use]
    pub fn detached_inbox(name: impl Into<String>, capacity: Capacity) -> Self {
        Self::new(name, None, Direction::Inbox, capacity, None)
    }

    /// Unique id of this box.
    #[must_use]
    pub fn id(&self) -> BoxId {
        self.inner.id
    }

    /// Name of this box on its owner.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Unit that owns this box, if any.
    #[must_use]
    pub fn owner(&self) -> Option<UnitId> {
        self.inner.owner
    }

    /// Inbox or outbox.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    /// Capacity of this box's own storage.
    #[must_use]
    pub fn capacity(&self) -> Capacity {
        self.inner.state.lock().capacity
    }

    /// Changes the capacity. Messages already stored are kept.
    pub fn set_capacity(&self, capacity: Capacity) {
        self.inner.state.lock().capacity = capacity;
    }

    /// Number of messages in this box's own storage.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().queue.len()
    }

    /// Returns true if this box's own storage is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if a message is waiting in this box.
    #[must_use]
    pub fn data_ready(&self) -> bool {
        !self.is_empty()
    }

    /// Returns true if this box forwards to another box.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        self.inner.state.lock().target.is_some()
    }

    /// The box a send to this box ends up in.
    #[must_use]
    pub fn final_destination(&self) -> Self {
        let mut current = self.clone();
        loop {
            let next = current.inner.state.lock().target.clone();
            match next {
                Some(next) => current = next,
                None => return current,
            }
        }
    }

    /// Returns true if a send would currently fail with [`SendError::Full`].
    #[must_use]
    pub fn is_full(&self) -> bool {
        let dest = self.final_destination();
        if dest.direction() == Direction::Outbox {
            return false;
        }
        let state = dest.inner.state.lock();
        !state.capacity.admits(state.queue.len())
    }

    /// Sends a message through this box.
    ///
    /// Never blocks. Fails with [`SendError::Full`] if the final destination
    /// is bounded and full, handing the message back.
    pub fn send(&self, msg: Message) -> core::result::Result<(), SendError<Message>> {
        let dest = self.final_destination();
        if dest.direction() == Direction::Outbox {
            trace!(
                box_name = %self.name(),
                owner = ?self.owner(),
                "discarding message sent to unlinked outbox"
            );
            return Ok(());
        }
        {
            let mut state = dest.inner.state.lock();
            if !state.capacity.admits(state.queue.len()) {
                return Err(SendError::Full(msg));
            }
            state.queue.push_back(msg);
        }
        dest.notify_owner();
        Ok(())
    }

    /// Takes the oldest message from this box's own storage.
    pub fn recv(&self) -> core::result::Result<Message, RecvError> {
        let msg = self.inner.state.lock().queue.pop_front();
        match msg {
            Some(msg) => {
                self.wake_upstream();
                Ok(msg)
            }
            None => Err(RecvError::Empty),
        }
    }

    /// Takes every waiting message, oldest first.
    pub fn drain(&self) -> Vec<Message> {
        let drained: Vec<Message> = self.inner.state.lock().queue.drain(..).collect();
        if !drained.is_empty() {
            self.wake_upstream();
        }
        drained
    }

    /// Points this box at `dest`. Waiting messages move to the new destination.
    pub(crate) fn attach(&self, dest: &Self) -> Result<()> {
        if dest.final_destination().id() == self.id() {
            return Err(Error::new(ErrorKind::InvalidLink)
                .with_message(format!(
                    "linking {} to {} would form a cycle",
                    self.name(),
                    dest.name()
                ))
                .with_box(self.name()));
        }
        let moved: Vec<Message> = {
            let mut state = self.inner.state.lock();
            if state.target.is_some() {
                return Err(Error::new(ErrorKind::BoxAlreadyLinked)
                    .with_message(format!("{} already forwards to another box", self.name()))
                    .with_box(self.name()));
            }
            state.target = Some(dest.clone());
            state.queue.drain(..).collect()
        };
        dest.inner
            .state
            .lock()
            .sources
            .push(Arc::downgrade(&self.inner));

        if !moved.is_empty() {
            // Already-accepted messages are not subject to the new bound.
            let final_dest = dest.final_destination();
            if final_dest.direction() == Direction::Inbox {
                final_dest.inner.state.lock().queue.extend(moved);
                final_dest.notify_owner();
            }
        }
        Ok(())
    }

    /// Removes this box's forwarding target, returning it.
    pub(crate) fn detach(&self) -> Option<Self> {
        let target = self.inner.state.lock().target.take()?;
        let me = Arc::as_ptr(&self.inner);
        target
            .inner
            .state
            .lock()
            .sources
            .retain(|w| w.strong_count() > 0 && !std::ptr::eq(w.as_ptr(), me));
        Some(target)
    }

    fn notify_owner(&self) {
        if let (Some(handle), Some(owner)) = (&self.inner.notifier, self.inner.owner) {
            handle.wake(owner);
        }
    }

    fn wake_upstream(&self) {
        let mut pending: Vec<Self> = self.upstream();
        while let Some(source) = pending.pop() {
            source.notify_owner();
            pending.extend(source.upstream());
        }
    }

    fn upstream(&self) -> Vec<Self> {
        self.inner
            .state
            .lock()
            .sources
            .iter()
            .filter_map(Weak::upgrade)
            .map(|inner| Self { inner })
            .collect()
    }
}

impl fmt::Debug for Postbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Postbox")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("owner", &self.inner.owner)
            .field("direction", &self.inner.direction)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Postbox {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Postbox {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::init_test_logging;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    fn inbox(name: &str, capacity: Capacity) -> Postbox {
        Postbox::new(name, None, Direction::Inbox, capacity, None)
    }

    fn outbox(name: &str) -> Postbox {
        Postbox::new(name, None, Direction::Outbox, Capacity::Unbounded, None)
    }

    fn value(msg: Message) -> u32 {
        msg.downcast::<u32>().expect("u32 payload")
    }

    #[test]
    fn fifo_order_is_preserved() {
        init_test("fifo_order_is_preserved");
        let b = inbox("inbox", Capacity::Unbounded);
        for i in 0..5_u32 {
            b.send(Message::new(i)).expect("send");
        }
        let got: Vec<u32> = (0..5).map(|_| value(b.recv().expect("recv"))).collect();
        crate::assert_with_log!(got == vec![0, 1, 2, 3, 4], "fifo", vec![0, 1, 2, 3, 4], got);
        assert_eq!(b.recv().unwrap_err(), RecvError::Empty);
        crate::test_complete!("fifo_order_is_preserved");
    }

    #[test]
    fn bounded_box_rejects_when_full() {
        init_test("bounded_box_rejects_when_full");
        let b = inbox("inbox", Capacity::Bounded(1));
        b.send(Message::new(1_u32)).expect("first send");
        let err = b.send(Message::new(2_u32)).unwrap_err();
        assert!(err.is_full());
        assert_eq!(value(err.into_inner()), 2);
        assert!(b.is_full());

        assert_eq!(value(b.recv().expect("recv")), 1);
        b.send(Message::new(3_u32)).expect("send after recv");
        crate::test_complete!("bounded_box_rejects_when_full");
    }

    #[test]
    fn unlinked_outbox_discards() {
        init_test("unlinked_outbox_discards");
        let out = outbox("outbox");
        out.send(Message::new(1_u32)).expect("never fails");
        assert!(out.is_empty());
        assert!(!out.is_full());
        crate::test_complete!("unlinked_outbox_discards");
    }

    #[test]
    fn chain_delivers_to_final_destination() {
        init_test("chain_delivers_to_final_destination");
        let out = outbox("outbox");
        let pass = inbox("inbox", Capacity::Bounded(1));
        let sink = inbox("inbox", Capacity::Unbounded);
        out.attach(&pass).expect("link 1");
        pass.attach(&sink).expect("link 2");

        // The bound in the middle of the chain does not apply.
        for i in 0..3_u32 {
            out.send(Message::new(i)).expect("send");
        }
        assert_eq!(sink.len(), 3);
        assert!(pass.is_empty());
        assert_eq!(out.final_destination(), sink);
        crate::test_complete!("chain_delivers_to_final_destination");
    }

    #[test]
    fn attach_moves_waiting_messages() {
        init_test("attach_moves_waiting_messages");
        let parent_inbox = inbox("inbox", Capacity::Unbounded);
        let child_inbox = inbox("inbox", Capacity::Unbounded);
        parent_inbox.send(Message::new(7_u32)).expect("send");
        parent_inbox.attach(&child_inbox).expect("link");

        assert!(parent_inbox.is_empty());
        assert_eq!(value(child_inbox.recv().expect("recv")), 7);
        crate::test_complete!("attach_moves_waiting_messages");
    }

    #[test]
    fn second_target_is_rejected() {
        init_test("second_target_is_rejected");
        let out = outbox("outbox");
        let a = inbox("a", Capacity::Unbounded);
        let b = inbox("b", Capacity::Unbounded);
        out.attach(&a).expect("first link");
        let err = out.attach(&b).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BoxAlreadyLinked);
        crate::test_complete!("second_target_is_rejected");
    }

    #[test]
    fn cycles_are_rejected() {
        init_test("cycles_are_rejected");
        let a = inbox("a", Capacity::Unbounded);
        let b = inbox("b", Capacity::Unbounded);
        a.attach(&b).expect("a -> b");
        let err = b.attach(&a).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidLink);
        assert!(!b.is_linked());
        crate::test_complete!("cycles_are_rejected");
    }

    #[test]
    fn detach_restores_discarding() {
        init_test("detach_restores_discarding");
        let out = outbox("outbox");
        let sink = inbox("inbox", Capacity::Unbounded);
        out.attach(&sink).expect("link");
        out.send(Message::new(1_u32)).expect("send");
        let old = out.detach().expect("was linked");
        assert_eq!(old, sink);
        out.send(Message::new(2_u32)).expect("send");
        assert_eq!(sink.len(), 1);
        assert!(sink.upstream().is_empty());
        crate::test_complete!("detach_restores_discarding");
    }

    #[test]
    fn delivery_and_collection_wake_owners() {
        init_test("delivery_and_collection_wake_owners");
        let handle = SchedulerHandle::new(crate::runtime::ThreadConfig::default());
        let producer = UnitId::next();
        let consumer = UnitId::next();
        let out = Postbox::new(
            "outbox",
            Some(producer),
            Direction::Outbox,
            Capacity::Unbounded,
            Some(handle.clone()),
        );
        let sink = Postbox::new(
            "inbox",
            Some(consumer),
            Direction::Inbox,
            Capacity::Bounded(1),
            Some(handle.clone()),
        );
        out.attach(&sink).expect("link");

        out.send(Message::new(1_u32)).expect("send");
        assert_eq!(handle.drain_woken(), vec![consumer]);

        sink.recv().expect("recv");
        assert_eq!(handle.drain_woken(), vec![producer]);
        crate::test_complete!("delivery_and_collection_wake_owners");
    }
}
