//! Messages carried by mailboxes.
//!
//! A [`Message`] is either an opaque payload or one of the two lifecycle
//! signals. Signals are a separate variant so they can never be confused with
//! application data, whatever the payload type.

use core::fmt;
use std::any::Any;

use crate::types::UnitId;

/// Lifecycle signal exchanged on `signal`/`control` boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Signal {
    /// Graceful end of stream: the producer has nothing more to send.
    ProducerFinished {
        /// The unit that emitted the signal, if known.
        from: Option<UnitId>,
    },
    /// Forced termination request.
    Shutdown {
        /// The unit that emitted the signal, if known.
        from: Option<UnitId>,
    },
}

impl Signal {
    /// A "producer finished" signal attributed to `from`.
    #[must_use]
    pub const fn producer_finished(from: UnitId) -> Self {
        Self::ProducerFinished { from: Some(from) }
    }

    /// A shutdown request attributed to `from`.
    #[must_use]
    pub const fn shutdown(from: UnitId) -> Self {
        Self::Shutdown { from: Some(from) }
    }

    /// Returns the originating unit, if recorded.
    #[must_use]
    pub const fn origin(&self) -> Option<UnitId> {
        match self {
            Self::ProducerFinished { from } | Self::Shutdown { from } => *from,
        }
    }

    /// Returns true for a forced shutdown.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown { .. })
    }

    /// Returns the same signal re-attributed to `from`, for forwarding downstream.
    #[must_use]
    pub const fn forwarded_by(self, from: UnitId) -> Self {
        match self {
            Self::ProducerFinished { .. } => Self::producer_finished(from),
            Self::Shutdown { .. } => Self::shutdown(from),
        }
    }
}

/// An item in a mailbox.
pub enum Message {
    /// Application data.
    Payload(Box<dyn Any + Send>),
    /// A lifecycle signal.
    Signal(Signal),
}

impl Message {
    /// Wraps a value as a payload message.
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self::Payload(Box::new(value))
    }

    /// Returns true if this message is a lifecycle signal.
    #[must_use]
    pub const fn is_signal(&self) -> bool {
        matches!(self, Self::Signal(_))
    }

    /// Returns the signal, if this message is one.
    #[must_use]
    pub const fn as_signal(&self) -> Option<Signal> {
        match self {
            Self::Signal(signal) => Some(*signal),
            Self::Payload(_) => None,
        }
    }

    /// Returns true if the payload holds a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        match self {
            Self::Payload(value) => value.is::<T>(),
            Self::Signal(_) => false,
        }
    }

    /// Borrows the payload as a `T`.
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Self::Payload(value) => value.downcast_ref::<T>(),
            Self::Signal(_) => None,
        }
    }

    /// Takes the payload as a `T`, handing the message back on mismatch.
    pub fn downcast<T: Any>(self) -> Result<T, Self> {
        match self {
            Self::Payload(value) => value.downcast::<T>().map(|v| *v).map_err(Self::Payload),
            signal @ Self::Signal(_) => Err(signal),
        }
    }
}

impl From<Signal> for Message {
    fn from(signal: Signal) -> Self {
        Self::Signal(signal)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Payload(_) => f.write_str("Message::Payload(..)"),
            Self::Signal(signal) => f.debug_tuple("Message::Signal").field(signal).finish(),
        }
    }
}
