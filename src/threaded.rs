//! Thread-bridged components.
//!
//! A [`ThreadedComponent`] runs its body on a dedicated OS thread so it may
//! block. Inside the scheduler it is represented by a shim unit that owns the
//! component's boxes and shuttles messages between them and a set of bounded
//! queues shared with the thread:
//!
//! ```text
//!   linked boxes ──► shim inboxes ──► inqueues ──► thread body
//!   linked boxes ◄── shim outboxes ◄── outqueues ◄──┘
//! ```
//!
//! Each resume of the shim forwards what fits into the inqueues (the
//! `control` box last, so a shutdown is seen after the data before it),
//! drains the outqueues into the outboxes while their destinations have
//! room, and acknowledges outstanding [`ThreadCx::sync`] requests. The thread
//! wakes the shim through the scheduler handle whenever it sends or receives.
//!
//! # Stopping
//!
//! A [`Signal::Shutdown`] arriving on `control`, or the shim being terminated
//! by the scheduler, raises the shutdown flag the body polls with
//! [`ThreadCx::shutdown_requested`]. On termination the shim waits at most
//! the configured join timeout for the thread to exit. A body that ignores
//! the flag is detached and keeps running; it is not forcibly killed.

use crossbeam_queue::ArrayQueue;
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

use crate::cx::Cx;
use crate::error::{Error, ErrorKind, RecvError, Result, SendError};
use crate::link::Postoffice;
use crate::mailbox::{BoxSpec, Boxes, Capacity, Postbox, CONTROL, INBOX, OUTBOX, SIGNAL};
use crate::message::{Message, Signal};
use crate::runtime::scheduler::panic_message;
use crate::runtime::SchedulerHandle;
use crate::types::UnitId;
use crate::unit::{Exit, Microprocess, Resume};

/// Body of a thread-bridged component.
pub type ThreadBody = Box<dyn FnOnce(&ThreadCx) -> Result<()> + Send>;

// ============================================================================
// Shared state
// ============================================================================

/// Wakes the bridged thread when it is paused.
#[derive(Debug, Default)]
struct Event {
    flag: Mutex<bool>,
    cond: Condvar,
}

impl Event {
    fn notify(&self) {
        let mut flag = self.flag.lock();
        *flag = true;
        self.cond.notify_all();
    }

    /// Waits for a notification. Returns true if notified.
    fn wait(&self, timeout: Option<Duration>) -> bool {
        let mut flag = self.flag.lock();
        if !*flag {
            match timeout {
                Some(timeout) => {
                    self.cond.wait_for(&mut flag, timeout);
                }
                None => self.cond.wait(&mut flag),
            }
        }
        std::mem::replace(&mut *flag, false)
    }
}

/// Tracks whether the thread has exited.
#[derive(Debug, Default)]
struct Completion {
    done: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl Completion {
    fn signal_done(&self) {
        self.done.store(true, Ordering::Release);
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_done() {
            return true;
        }
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock.lock();
        while !self.is_done() {
            if self.cond.wait_until(&mut guard, deadline).timed_out() {
                return self.is_done();
            }
        }
        true
    }
}

struct Lane {
    name: String,
    queue: ArrayQueue<Message>,
}

struct Bridge {
    unit: UnitId,
    handle: SchedulerHandle,
    inqueues: Vec<Lane>,
    outqueues: Vec<Lane>,
    event: Event,
    exited: Completion,
    shutdown: AtomicBool,
    sync_requested: AtomicU64,
    sync_acked: AtomicU64,
    fault: Mutex<Option<Error>>,
}

impl Bridge {
    fn lane<'a>(lanes: &'a [Lane], name: &str) -> Option<&'a Lane> {
        lanes.iter().find(|lane| lane.name == name)
    }

    fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.event.notify();
    }
}

// ============================================================================
// Thread side
// ============================================================================

/// The bridged thread's view of its component.
pub struct ThreadCx {
    bridge: Arc<Bridge>,
}

impl ThreadCx {
    /// Id of the shim unit.
    #[must_use]
    pub fn unit_id(&self) -> UnitId {
        self.bridge.unit
    }

    /// Handle of the scheduler the shim runs on.
    #[must_use]
    pub fn handle(&self) -> &SchedulerHandle {
        &self.bridge.handle
    }

    /// Takes the oldest message forwarded from the named inbox.
    pub fn recv(&self, inbox: &str) -> core::result::Result<Message, RecvError> {
        let lane = Bridge::lane(&self.bridge.inqueues, inbox).ok_or(RecvError::Unknown)?;
        let msg = lane.queue.pop().ok_or(RecvError::Empty)?;
        // Space freed: the shim may forward more.
        self.bridge.handle.wake(self.bridge.unit);
        Ok(msg)
    }

    /// Queues `msg` for the named outbox.
    ///
    /// Fails with [`SendError::Full`] when the queue is full; pause and retry.
    pub fn send(&self, msg: impl Into<Message>, outbox: &str) -> core::result::Result<(), SendError<Message>> {
        let msg = msg.into();
        let Some(lane) = Bridge::lane(&self.bridge.outqueues, outbox) else {
            return Err(SendError::Unknown(msg));
        };
        lane.queue.push(msg).map_err(SendError::Full)?;
        self.bridge.handle.wake(self.bridge.unit);
        Ok(())
    }

    /// Wraps `value` as a payload and queues it for the named outbox.
    pub fn send_value<T: Any + Send>(&self, value: T, outbox: &str) -> core::result::Result<(), SendError<Message>> {
        self.send(Message::new(value), outbox)
    }

    /// Returns true if a message from the named inbox is waiting.
    #[must_use]
    pub fn data_ready(&self, inbox: &str) -> bool {
        Bridge::lane(&self.bridge.inqueues, inbox).is_some_and(|lane| !lane.queue.is_empty())
    }

    /// Returns true if any inbox has a message waiting.
    #[must_use]
    pub fn any_ready(&self) -> bool {
        self.bridge.inqueues.iter().any(|lane| !lane.queue.is_empty())
    }

    /// Blocks until the shim forwards something, a shutdown is requested, or
    /// `timeout` elapses. Returns true if woken before the timeout.
    pub fn pause(&self, timeout: Option<Duration>) -> bool {
        if self.shutdown_requested() {
            return true;
        }
        self.bridge.event.wait(timeout)
    }

    /// Waits until the shim has run at least once after this call.
    ///
    /// Fails with `SchedulerStopped` if a shutdown is requested first.
    pub fn sync(&self) -> Result<()> {
        let ticket = self.bridge.sync_requested.fetch_add(1, Ordering::AcqRel) + 1;
        self.bridge.handle.wake(self.bridge.unit);
        while self.bridge.sync_acked.load(Ordering::Acquire) < ticket {
            if self.shutdown_requested() {
                return Err(Error::new(ErrorKind::SchedulerStopped)
                    .with_message("shutdown requested during sync")
                    .with_unit(self.bridge.unit));
            }
            self.bridge.event.wait(Some(Duration::from_millis(50)));
        }
        Ok(())
    }

    /// Returns true once the component has been asked to stop.
    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.bridge.shutdown.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ThreadCx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadCx")
            .field("unit", &self.bridge.unit)
            .field("shutdown", &self.shutdown_requested())
            .finish()
    }
}

// ============================================================================
// Scheduler side
// ============================================================================

/// A component whose body runs on its own OS thread.
pub struct ThreadedComponent {
    id: UnitId,
    name: String,
    boxes: Boxes,
    postoffice: Postoffice,
    bridge: Arc<Bridge>,
    body: Option<ThreadBody>,
    join: Option<JoinHandle<()>>,
    stalled: Vec<Option<Message>>,
}

impl ThreadedComponent {
    /// Builds a threaded component. The thread starts on the first resume.
    pub fn new<F>(handle: &SchedulerHandle, name: impl Into<String>, spec: &BoxSpec, body: F) -> Result<Self>
    where
        F: FnOnce(&ThreadCx) -> Result<()> + Send + 'static,
    {
        let id = UnitId::next();
        let boxes = Boxes::from_spec(id, spec, Some(handle.clone()))?;
        let capacity = handle.thread_config().queue_capacity.max(1);
        let lanes = |names: Vec<&str>| -> Vec<Lane> {
            names
                .into_iter()
                .map(|name| Lane {
                    name: name.to_string(),
                    queue: ArrayQueue::new(capacity),
                })
                .collect()
        };
        let bridge = Arc::new(Bridge {
            unit: id,
            handle: handle.clone(),
            inqueues: lanes(spec.inbox_names().collect()),
            outqueues: lanes(spec.outbox_names().collect()),
            event: Event::default(),
            exited: Completion::default(),
            shutdown: AtomicBool::new(false),
            sync_requested: AtomicU64::new(0),
            sync_acked: AtomicU64::new(0),
            fault: Mutex::new(None),
        });
        let stalled = (0..bridge.outqueues.len()).map(|_| None).collect();
        Ok(Self {
            id,
            name: name.into(),
            boxes,
            postoffice: Postoffice::for_unit(id),
            bridge,
            body: Some(Box::new(body)),
            join: None,
            stalled,
        })
    }

    /// Builds a threaded component with the standard four boxes.
    pub fn standard<F>(handle: &SchedulerHandle, name: impl Into<String>, body: F) -> Result<Self>
    where
        F: FnOnce(&ThreadCx) -> Result<()> + Send + 'static,
    {
        Self::new(handle, name, &BoxSpec::standard(), body)
    }

    /// Id of the shim unit.
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

    /// Links two boxes; the linkage is removed when this component terminates.
    pub fn link(&mut self, source: &Postbox, sink: &Postbox) -> Result<crate::types::LinkageId> {
        self.postoffice.link(source, sink)
    }

    /// Boxes this component up for the scheduler.
    #[must_use]
    pub fn boxed(self) -> Box<dyn Microprocess> {
        Box::new(self)
    }

    fn start(&mut self, prefix: &str) -> Result<()> {
        let Some(body) = self.body.take() else {
            return Ok(());
        };
        let bridge = Arc::clone(&self.bridge);
        let thread_name = format!("{prefix}-{}", self.id.as_u64());
        let unit = self.id;
        let join = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let cx = ThreadCx {
                    bridge: Arc::clone(&bridge),
                };
                let fault = match catch_unwind(AssertUnwindSafe(|| body(&cx))) {
                    Ok(Ok(())) => None,
                    Ok(Err(err)) => Some(err),
                    Err(payload) => Some(
                        Error::new(ErrorKind::ThreadFault)
                            .with_message(format!("thread panicked: {}", panic_message(payload.as_ref())))
                            .with_unit(unit),
                    ),
                };
                *bridge.fault.lock() = fault;
                bridge.exited.signal_done();
                bridge.handle.wake(unit);
            })
            .map_err(|e| {
                Error::new(ErrorKind::ThreadSpawn)
                    .with_message(format!("failed to spawn {thread_name}"))
                    .with_unit(unit)
                    .with_source(e)
            })?;
        debug!(unit = %self.id, thread = %thread_name, "bridged thread started");
        self.join = Some(join);
        Ok(())
    }

    /// Moves waiting inbox messages into the thread's queues.
    fn forward_inboxes(&self) -> usize {
        let mut forwarded = 0;
        let data = self.boxes.inboxes().iter().filter(|b| b.name() != CONTROL);
        let control = self.boxes.inboxes().iter().filter(|b| b.name() == CONTROL);
        for postbox in data.chain(control) {
            let Some(lane) = Bridge::lane(&self.bridge.inqueues, postbox.name()) else {
                continue;
            };
            while !lane.queue.is_full() {
                let Ok(msg) = postbox.recv() else {
                    break;
                };
                if matches!(msg.as_signal(), Some(Signal::Shutdown { .. })) {
                    self.bridge.shutdown.store(true, Ordering::Release);
                }
                if let Err(msg) = lane.queue.push(msg) {
                    // Only this shim pushes, and the queue was not full.
                    warn!(unit = %self.id, box_name = %postbox.name(), "inqueue rejected message");
                    drop(msg);
                    break;
                }
                forwarded += 1;
            }
        }
        forwarded
    }

    /// Moves queued thread output into the outboxes while they have room.
    /// Moves thread output into the outboxes. The `signal` lane waits until
    /// every other lane is empty, so end of stream never overtakes data.
    fn drain_outqueues(&mut self) -> usize {
        let mut drained = 0;
        for (index, lane) in self.bridge.outqueues.iter().enumerate() {
            let Some(outbox) = self.boxes.outbox(&lane.name) else {
                continue;
            };
            if lane.name == SIGNAL && self.data_pending() {
                trace!(unit = %self.id, "holding signal behind stalled output");
                continue;
            }
            loop {
                let Some(msg) = self.stalled[index].take().or_else(|| lane.queue.pop()) else {
                    break;
                };
                match outbox.send(msg) {
                    Ok(()) => drained += 1,
                    Err(err) => {
                        self.stalled[index] = Some(err.into_inner());
                        break;
                    }
                }
            }
        }
        drained
    }

    fn data_pending(&self) -> bool {
        self.bridge
            .outqueues
            .iter()
            .zip(&self.stalled)
            .any(|(lane, stalled)| lane.name != SIGNAL && (stalled.is_some() || !lane.queue.is_empty()))
    }

    fn output_pending(&self) -> bool {
        self.stalled.iter().any(Option::is_some)
            || self.bridge.outqueues.iter().any(|lane| !lane.queue.is_empty())
    }
}

impl Microprocess for ThreadedComponent {
    fn id(&self) -> UnitId {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn resume(&mut self, cx: &mut Cx<'_>) -> Result<Resume> {
        if self.join.is_none() && self.body.is_some() {
            let prefix = cx.handle().thread_config().name_prefix.clone();
            self.start(&prefix)?;
        }

        let forwarded = self.forward_inboxes();
        let drained = self.drain_outqueues();
        let requested = self.bridge.sync_requested.load(Ordering::Acquire);
        let acked = self.bridge.sync_acked.swap(requested, Ordering::AcqRel);
        if forwarded > 0 || drained > 0 || requested != acked {
            trace!(unit = %self.id, forwarded, drained, "bridge pumped");
            self.bridge.event.notify();
        }

        if self.bridge.exited.is_done() && !self.output_pending() {
            if let Some(join) = self.join.take() {
                let _ = join.join();
            }
            debug!(unit = %self.id, "bridged thread exited");
            if let Some(fault) = self.bridge.fault.lock().take() {
                return Err(fault);
            }
            return Ok(Resume::Done);
        }
        Ok(Resume::Pause)
    }

    fn on_terminate(&mut self, _cx: &mut Cx<'_>, _exit: &Exit) {
        self.bridge.request_shutdown();
        self.postoffice.unlink_all();
        let Some(join) = self.join.take() else {
            return;
        };
        let timeout = self.bridge.handle.thread_config().join_timeout;
        if self.bridge.exited.wait_timeout(timeout) {
            let _ = join.join();
        } else {
            warn!(
                unit = %self.id,
                timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                "bridged thread did not exit in time, detaching"
            );
        }
    }
}

impl fmt::Debug for ThreadedComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadedComponent")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("started", &self.join.is_some())
            .field("exited", &self.bridge.exited.is_done())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// External handle
// ============================================================================

/// Handle for talking to a bridged component from outside the scheduler.
pub struct ThreadBridgeHandle {
    unit: UnitId,
    inbox: Postbox,
    control: Postbox,
    output: Postbox,
    signals: Postbox,
    bridge: Arc<Bridge>,
}

impl ThreadBridgeHandle {
    /// Id of the shim unit.
    #[must_use]
    pub fn unit_id(&self) -> UnitId {
        self.unit
    }

    /// Delivers a message to the component's `inbox`.
    pub fn send(&self, msg: impl Into<Message>) -> core::result::Result<(), SendError<Message>> {
        self.inbox.send(msg.into())
    }

    /// Takes the next message the component emitted on `outbox`.
    #[must_use]
    pub fn try_receive(&self) -> Option<Message> {
        self.output.recv().ok()
    }

    /// Takes the next lifecycle signal the component emitted on `signal`.
    #[must_use]
    pub fn try_receive_signal(&self) -> Option<Signal> {
        self.signals.recv().ok().and_then(|msg| msg.as_signal())
    }

    /// Asks the component to stop: a shutdown signal on `control`, and the
    /// shutdown flag raised directly so a paused thread notices at once.
    pub fn request_shutdown(&self) {
        let _ = self.control.send(Signal::Shutdown { from: None }.into());
        self.bridge.request_shutdown();
    }

    /// Returns true once the thread has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.bridge.exited.is_done()
    }

    /// Waits up to `timeout` for the thread to exit. Returns true if it did.
    #[must_use]
    pub fn join_timeout(&self, timeout: Duration) -> bool {
        self.bridge.exited.wait_timeout(timeout)
    }
}

impl fmt::Debug for ThreadBridgeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadBridgeHandle")
            .field("unit", &self.unit)
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

/// Runs `body` on its own thread as a standard component on `handle`'s
/// scheduler, with its `outbox` and `signal` collected for the caller.
pub fn spawn_thread_bridge<F>(handle: &SchedulerHandle, name: impl Into<String>, body: F) -> Result<ThreadBridgeHandle>
where
    F: FnOnce(&ThreadCx) -> Result<()> + Send + 'static,
{
    let mut component = ThreadedComponent::standard(handle, name, body)?;
    let output = Postbox::detached_inbox("bridge-output", Capacity::Unbounded);
    let signals = Postbox::detached_inbox("bridge-signals", Capacity::Unbounded);
    let outbox = component.outbox(OUTBOX)?;
    let signal = component.outbox(SIGNAL)?;
    component.link(&outbox, &output)?;
    component.link(&signal, &signals)?;

    let bridge_handle = ThreadBridgeHandle {
        unit: component.id(),
        inbox: component.inbox(INBOX)?,
        control: component.inbox(CONTROL)?,
        output,
        signals,
        bridge: Arc::clone(&component.bridge),
    };
    handle.activate(component.boxed());
    Ok(bridge_handle)
}
