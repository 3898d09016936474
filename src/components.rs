//! Stock behaviours.
//!
//! - [`Forwarder`]: copies `inbox` to `outbox`, then passes the end-of-stream
//!   signal on and finishes.
//! - [`Collector`]: records every payload it receives into a shared buffer.
//! - [`Timeout`]: emits [`Signal::Shutdown`] on `signal` once a deadline
//!   passes, unless something arrives on `control` first.
//! - [`Introspector`]: reports units joining and leaving the scheduler.
//!
//! There is no timer primitive in the scheduler. A timeout is an ordinary
//! component that reads the tick timestamp, and it is wired like any other:
//! link its `signal` to the `control` of whatever should be cut short.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use crate::component::{Behaviour, ComponentCx};
use crate::error::{Result, SendError};
use crate::mailbox::{CONTROL, INBOX, OUTBOX, SIGNAL};
use crate::message::{Message, Signal};
use crate::types::UnitId;
use crate::unit::Resume;

// ============================================================================
// Forwarder
// ============================================================================

/// Passes every message from `inbox` to `outbox` in order.
///
/// When a signal arrives on `control`, the forwarder first empties `inbox`,
/// then sends the signal on `signal` and finishes. A full destination pauses
/// it until the consumer collects.
#[derive(Debug, Default)]
pub struct Forwarder {
    pending: Option<Message>,
    finishing: Option<Signal>,
    forwarded: u64,
}

impl Forwarder {
    /// Creates a forwarder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages passed on so far.
    #[must_use]
    pub const fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Tries to send `msg`; on a full destination keeps it for later.
    fn push(&mut self, cx: &ComponentCx<'_>, msg: Message) -> Result<bool> {
        match cx.send(msg, OUTBOX) {
            Ok(()) => {
                self.forwarded += 1;
                Ok(true)
            }
            Err(SendError::Full(msg)) => {
                self.pending = Some(msg);
                Ok(false)
            }
            Err(err) => Err(err.into()),
        }
    }
}

impl Behaviour for Forwarder {
    fn main_body(&mut self, cx: &mut ComponentCx<'_>) -> Result<Resume> {
        if let Some(msg) = self.pending.take() {
            if !self.push(cx, msg)? {
                return Ok(Resume::Pause);
            }
        }
        while let Ok(msg) = cx.recv(INBOX) {
            if !self.push(cx, msg)? {
                return Ok(Resume::Pause);
            }
        }

        if self.finishing.is_none() {
            while let Ok(msg) = cx.recv(CONTROL) {
                if let Some(signal) = msg.as_signal() {
                    self.finishing = Some(signal);
                    break;
                }
            }
        }
        if let Some(signal) = self.finishing {
            return match cx.send_signal(signal, SIGNAL) {
                Ok(()) => {
                    debug!(unit = %cx.id(), forwarded = self.forwarded, ?signal, "forwarder finished");
                    Ok(Resume::Done)
                }
                Err(SendError::Full(_)) => Ok(Resume::Pause),
                Err(err) => Err(err.into()),
            };
        }
        Ok(Resume::Pause)
    }
}

// ============================================================================
// Collector
// ============================================================================

/// Shared view of what a [`Collector`] has received.
#[derive(Debug, Clone, Default)]
pub struct Collected {
    items: Arc<Mutex<Vec<Message>>>,
}

impl Collected {
    /// Number of payloads received so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Returns true if nothing has arrived.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Takes everything received so far.
    pub fn take(&self) -> Vec<Message> {
        std::mem::take(&mut *self.items.lock())
    }

    /// Copies out every payload of type `T`, in arrival order.
    #[must_use]
    pub fn values<T: Any + Clone>(&self) -> Vec<T> {
        self.items
            .lock()
            .iter()
            .filter_map(|msg| msg.downcast_ref::<T>().cloned())
            .collect()
    }

    fn push(&self, msg: Message) {
        self.items.lock().push(msg);
    }
}

/// Records payloads from `inbox`; finishes on a `control` signal.
///
/// The signal is passed on through `signal` before the collector finishes.
/// If that destination is full it pauses and tries again when woken.
#[derive(Debug, Default)]
pub struct Collector {
    collected: Collected,
    signal: Option<Signal>,
}

impl Collector {
    /// Creates a collector and the handle to read what it receives.
    #[must_use]
    pub fn new() -> (Self, Collected) {
        let collected = Collected::default();
        (
            Self {
                collected: collected.clone(),
                signal: None,
            },
            collected,
        )
    }

    /// The signal that ended collection, once one has arrived.
    #[must_use]
    pub const fn finished_by(&self) -> Option<Signal> {
        self.signal
    }

    fn collect(&self, cx: &ComponentCx<'_>) {
        for msg in cx.inbox_iter(INBOX) {
            if !msg.is_signal() {
                self.collected.push(msg);
            }
        }
    }
}

impl Behaviour for Collector {
    fn main_body(&mut self, cx: &mut ComponentCx<'_>) -> Result<Resume> {
        self.collect(cx);
        if self.signal.is_none() {
            while let Ok(msg) = cx.recv(CONTROL) {
                if let Some(signal) = msg.as_signal() {
                    self.signal = Some(signal);
                    // Anything that raced in with the signal still counts.
                    self.collect(cx);
                    break;
                }
            }
        }
        let Some(signal) = self.signal else {
            return Ok(Resume::Pause);
        };
        match cx.send_signal(signal, SIGNAL) {
            Ok(()) => {
                debug!(unit = %cx.id(), collected = self.collected.len(), ?signal, "collector finished");
                Ok(Resume::Done)
            }
            Err(SendError::Full(_)) => {
                trace!(unit = %cx.id(), "signal destination full, waiting");
                Ok(Resume::Pause)
            }
            Err(err) => Err(err.into()),
        }
    }
}

// ============================================================================
// Timeout
// ============================================================================

/// Emits [`Signal::Shutdown`] on `signal` once `after` has elapsed.
///
/// Any message on `control` before then makes it stand down quietly. The
/// deadline is measured from the tick in which the timeout first runs.
#[derive(Debug)]
pub struct Timeout {
    after: Duration,
    deadline: Option<Instant>,
    fired: bool,
}

impl Timeout {
    /// A timeout that fires `after` its first tick.
    #[must_use]
    pub const fn new(after: Duration) -> Self {
        Self {
            after,
            deadline: None,
            fired: false,
        }
    }

    /// Returns true once the deadline has passed.
    #[must_use]
    pub const fn fired(&self) -> bool {
        self.fired
    }
}

impl Behaviour for Timeout {
    fn initialise(&mut self, cx: &mut ComponentCx<'_>) -> Result<()> {
        self.deadline = Some(cx.now() + self.after);
        Ok(())
    }

    fn main_body(&mut self, cx: &mut ComponentCx<'_>) -> Result<Resume> {
        if !self.fired && cx.recv(CONTROL).is_ok() {
            debug!(unit = %cx.id(), "timeout stood down");
            return Ok(Resume::Done);
        }
        let deadline = self.deadline.unwrap_or_else(|| cx.now());
        if self.fired || cx.now() >= deadline {
            self.fired = true;
            return match cx.send_signal(Signal::Shutdown { from: None }, SIGNAL) {
                Ok(()) => {
                    debug!(unit = %cx.id(), after_ms = self.after.as_millis(), "timeout fired");
                    Ok(Resume::Done)
                }
                // The target's control box is full; retry once it collects.
                Err(SendError::Full(_)) => Ok(Resume::Pause),
                Err(err) => Err(err.into()),
            };
        }
        trace!(unit = %cx.id(), "timeout waiting");
        Ok(Resume::Yield)
    }
}

// ============================================================================
// Introspector
// ============================================================================

/// A change to the set of live units, as reported by [`Introspector`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologyChange {
    /// Forget everything known so far. Always the first report.
    Reset,
    /// A unit was admitted.
    Added {
        /// The unit.
        id: UnitId,
        /// Its name.
        name: String,
    },
    /// A unit was retired.
    Removed {
        /// The unit.
        id: UnitId,
    },
}

/// Reports changes to the scheduler's live units on `outbox`.
///
/// The first report is [`TopologyChange::Reset`] followed by an `Added` for
/// every unit already live, the introspector included. After that only the
/// differences are sent, and it sleeps while the roster is unchanged.
/// Anything on `inbox` is ignored. A signal on `control` is passed on through
/// `signal` and ends it.
#[derive(Debug, Default)]
pub struct Introspector {
    seen: BTreeMap<UnitId, String>,
    version: Option<u64>,
    outgoing: VecDeque<TopologyChange>,
    finishing: Option<Signal>,
}

impl Introspector {
    /// Creates an introspector that has seen nothing yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn refresh(&mut self, cx: &ComponentCx<'_>) {
        let handle = cx.handle();
        let version = handle.roster_version();
        if self.version == Some(version) {
            return;
        }
        if self.version.is_none() {
            self.outgoing.push_back(TopologyChange::Reset);
        }
        self.version = Some(version);

        let live = handle.live_units();
        for id in self.seen.keys().filter(|id| !live.contains_key(*id)) {
            self.outgoing.push_back(TopologyChange::Removed { id: *id });
        }
        for (id, name) in live.iter().filter(|(id, _)| !self.seen.contains_key(*id)) {
            self.outgoing.push_back(TopologyChange::Added {
                id: *id,
                name: name.clone(),
            });
        }
        self.seen = live;
    }
}

impl Behaviour for Introspector {
    fn initialise(&mut self, cx: &mut ComponentCx<'_>) -> Result<()> {
        cx.handle().watch_roster(cx.id());
        Ok(())
    }

    fn main_body(&mut self, cx: &mut ComponentCx<'_>) -> Result<Resume> {
        if self.finishing.is_none() {
            while let Ok(msg) = cx.recv(CONTROL) {
                if let Some(signal) = msg.as_signal() {
                    self.finishing = Some(signal);
                    break;
                }
            }
        }
        if let Some(signal) = self.finishing {
            return match cx.send_signal(signal, SIGNAL) {
                Ok(()) => {
                    debug!(unit = %cx.id(), known = self.seen.len(), "introspector finished");
                    Ok(Resume::Done)
                }
                Err(SendError::Full(_)) => Ok(Resume::Pause),
                Err(err) => Err(err.into()),
            };
        }

        cx.inbox_iter(INBOX).for_each(drop);
        self.refresh(cx);
        while let Some(change) = self.outgoing.front().cloned() {
            match cx.send_value(change, OUTBOX) {
                Ok(()) => {
                    self.outgoing.pop_front();
                }
                Err(SendError::Full(_)) => return Ok(Resume::Pause),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(Resume::Pause)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{link_pipeline, Component};
    use crate::link::Postoffice;
    use crate::mailbox::{BoxSpec, Capacity, Postbox};
    use crate::runtime::RunExit;
    use crate::test_utils::{run_to_completion, test_scheduler};
    use crate::unit::unit_fn;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn forwarder_chain_delivers_in_order_then_finishes() {
        init_test("forwarder_chain_delivers_in_order_then_finishes");
        let mut scheduler = test_scheduler();
        let handle = scheduler.handle();

        let first = Component::standard(&handle, "fwd-1", Forwarder::new()).expect("fwd-1");
        let second = Component::standard(&handle, "fwd-2", Forwarder::new()).expect("fwd-2");
        let (collector, collected) = Collector::new();
        let sink = Component::standard(&handle, "sink", collector).expect("sink");

        let mut wiring = Postoffice::new();
        link_pipeline(&mut wiring, &[&first, &second, &sink]).expect("pipeline");

        for n in 0..10_u32 {
            first.deliver(Message::new(n), INBOX).expect("deliver");
        }
        first
            .deliver(Signal::ProducerFinished { from: None }, CONTROL)
            .expect("deliver signal");

        scheduler.register(first.boxed());
        scheduler.register(second.boxed());
        scheduler.register(sink.boxed());

        let report = run_to_completion(&mut scheduler);
        crate::assert_with_log!(report.exit == RunExit::Drained, "all finished", RunExit::Drained, report.exit);
        let values = collected.values::<u32>();
        crate::assert_with_log!(values == (0..10).collect::<Vec<_>>(), "fifo through chain", "0..10", values);
        crate::test_complete!("forwarder_chain_delivers_in_order_then_finishes");
    }

    #[test]
    fn forwarder_waits_on_full_destination() {
        init_test("forwarder_waits_on_full_destination");
        let mut scheduler = test_scheduler();
        let handle = scheduler.handle();

        let forwarder = Component::standard(&handle, "fwd", Forwarder::new()).expect("fwd");
        let (collector, collected) = Collector::new();
        let spec = BoxSpec::standard().capacity(INBOX, Capacity::Bounded(1));
        let sink = Component::new(&handle, "sink", &spec, collector).expect("sink");

        let mut wiring = Postoffice::new();
        link_pipeline(&mut wiring, &[&forwarder, &sink]).expect("pipeline");
        for n in 0..5_u32 {
            forwarder.deliver(Message::new(n), INBOX).expect("deliver");
        }
        forwarder
            .deliver(Signal::ProducerFinished { from: None }, CONTROL)
            .expect("deliver signal");

        scheduler.register(forwarder.boxed());
        scheduler.register(sink.boxed());
        let report = run_to_completion(&mut scheduler);

        assert_eq!(report.exit, RunExit::Drained);
        assert_eq!(collected.values::<u32>(), vec![0, 1, 2, 3, 4]);
        crate::test_complete!("forwarder_waits_on_full_destination");
    }

    #[test]
    fn collector_holds_signal_until_downstream_has_room() {
        init_test("collector_holds_signal_until_downstream_has_room");
        let mut scheduler = test_scheduler();
        let handle = scheduler.handle();

        let (collector, collected) = Collector::new();
        let sink = Component::standard(&handle, "sink", collector).expect("sink");
        let sink_id = sink.id();
        let tail = Postbox::detached_inbox("tail", Capacity::Bounded(1));
        tail.send(Message::new("occupied")).expect("fill tail");

        let mut wiring = Postoffice::new();
        wiring
            .link(&sink.outbox(SIGNAL).expect("signal"), &tail)
            .expect("link");
        sink.deliver(Message::new(7_u32), INBOX).expect("deliver");
        sink.deliver(Signal::ProducerFinished { from: None }, CONTROL)
            .expect("deliver signal");
        scheduler.register(sink.boxed());

        let report = scheduler.run_until_idle().expect("run");
        crate::assert_with_log!(report.exit == RunExit::Idle, "parked on full tail", RunExit::Idle, report.exit);
        crate::assert_with_log!(tail.len() == 1, "signal not dropped or pushed", 1, tail.len());
        assert_eq!(collected.values::<u32>(), vec![7]);

        let occupied = tail.recv().expect("occupied");
        assert_eq!(occupied.downcast_ref::<&str>(), Some(&"occupied"));

        let report = run_to_completion(&mut scheduler);
        crate::assert_with_log!(report.exit == RunExit::Drained, "finished after retry", RunExit::Drained, report.exit);
        let forwarded: Vec<_> = tail.drain().iter().filter_map(Message::as_signal).collect();
        crate::assert_with_log!(
            forwarded == vec![Signal::producer_finished(sink_id)],
            "exactly one signal, stamped by the collector",
            1,
            forwarded.len()
        );
        crate::test_complete!("collector_holds_signal_until_downstream_has_room");
    }

    #[test]
    fn timeout_retries_when_target_control_is_full() {
        init_test("timeout_retries_when_target_control_is_full");
        let mut scheduler = test_scheduler();
        let handle = scheduler.handle();

        let timeout = Component::standard(&handle, "timeout", Timeout::new(Duration::ZERO)).expect("timeout");
        let control = Postbox::detached_inbox("control", Capacity::Bounded(1));
        control.send(Message::new("busy")).expect("fill control");
        let mut wiring = Postoffice::new();
        wiring
            .link(&timeout.outbox(SIGNAL).expect("signal"), &control)
            .expect("link");
        scheduler.register(timeout.boxed());

        let report = scheduler.run_until_idle().expect("run");
        assert_eq!(report.exit, RunExit::Idle);
        assert_eq!(control.len(), 1);

        control.recv().expect("busy");
        let report = run_to_completion(&mut scheduler);
        assert_eq!(report.exit, RunExit::Drained);
        let shutdown = control.recv().ok().and_then(|msg| msg.as_signal());
        crate::assert_with_log!(
            shutdown.is_some_and(|signal| signal.is_shutdown()),
            "shutdown delivered once there was room",
            true,
            shutdown
        );
        crate::test_complete!("timeout_retries_when_target_control_is_full");
    }

    #[test]
    fn timeout_shuts_down_its_target() {
        init_test("timeout_shuts_down_its_target");
        let mut scheduler = test_scheduler();
        let handle = scheduler.handle();

        let timeout = Component::standard(&handle, "timeout", Timeout::new(Duration::ZERO)).expect("timeout");
        let (collector, collected) = Collector::new();
        let target = Component::standard(&handle, "target", collector).expect("target");

        let mut wiring = Postoffice::new();
        wiring
            .link(&timeout.outbox(SIGNAL).expect("signal"), &target.inbox(CONTROL).expect("control"))
            .expect("link");
        target.deliver(Message::new("early"), INBOX).expect("deliver");

        scheduler.register(timeout.boxed());
        scheduler.register(target.boxed());
        let report = run_to_completion(&mut scheduler);

        assert_eq!(report.exit, RunExit::Drained);
        assert_eq!(collected.values::<&str>(), vec!["early"]);
        crate::test_complete!("timeout_shuts_down_its_target");
    }

    #[test]
    fn introspector_reports_units_coming_and_going() {
        init_test("introspector_reports_units_coming_and_going");
        let mut scheduler = test_scheduler();
        let handle = scheduler.handle();

        let introspector = Component::standard(&handle, "introspector", Introspector::new()).expect("introspector");
        let introspector_id = introspector.id();
        let report = Postbox::detached_inbox("report", Capacity::Unbounded);
        let done = Postbox::detached_inbox("done", Capacity::Unbounded);
        let mut wiring = Postoffice::new();
        wiring
            .link(&introspector.outbox(OUTBOX).expect("outbox"), &report)
            .expect("link report");
        wiring
            .link(&introspector.outbox(SIGNAL).expect("signal"), &done)
            .expect("link done");
        let control = introspector.inbox(CONTROL).expect("control");

        scheduler.register(introspector.boxed());
        let one_shot = scheduler.register(unit_fn("one-shot", |_cx| Ok(Resume::Done)));

        let run = scheduler.run_until_idle().expect("run");
        assert_eq!(run.exit, RunExit::Idle);
        let changes: Vec<TopologyChange> = report
            .drain()
            .into_iter()
            .filter_map(|msg| msg.downcast::<TopologyChange>().ok())
            .collect();
        let expected = vec![
            TopologyChange::Reset,
            TopologyChange::Added {
                id: introspector_id,
                name: "introspector".to_string(),
            },
            TopologyChange::Added {
                id: one_shot,
                name: "one-shot".to_string(),
            },
            TopologyChange::Removed { id: one_shot },
        ];
        crate::assert_with_log!(changes == expected, "initial picture then the retirement", expected, changes);

        control
            .send(Signal::Shutdown { from: None }.into())
            .expect("shutdown");
        let run = run_to_completion(&mut scheduler);
        assert_eq!(run.exit, RunExit::Drained);
        assert!(report.is_empty(), "nothing changed before the shutdown");
        let signal = done.recv().ok().and_then(|msg| msg.as_signal());
        assert_eq!(signal, Some(Signal::shutdown(introspector_id)));
        crate::test_complete!("introspector_reports_units_coming_and_going");
    }

    #[test]
    fn timeout_stands_down_on_control() {
        init_test("timeout_stands_down_on_control");
        let mut scheduler = test_scheduler();
        let handle = scheduler.handle();

        let timeout = Component::standard(&handle, "timeout", Timeout::new(Duration::from_secs(3600))).expect("timeout");
        let signal_seen = Postbox::detached_inbox("seen", Capacity::Unbounded);
        let mut wiring = Postoffice::new();
        wiring
            .link(&timeout.outbox(SIGNAL).expect("signal"), &signal_seen)
            .expect("link");
        timeout
            .deliver(Signal::Shutdown { from: None }, CONTROL)
            .expect("stand down");

        scheduler.register(timeout.boxed());
        let report = run_to_completion(&mut scheduler);

        assert_eq!(report.exit, RunExit::Drained);
        crate::assert_with_log!(signal_seen.is_empty(), "no shutdown emitted", 0, signal_seen.len());
        crate::test_complete!("timeout_stands_down_on_control");
    }
}
