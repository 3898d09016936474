//! Error types and error handling strategy for weft.
//!
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Mailbox and store errors are local to the caller and recoverable
//! - Only unit faults can halt a scheduler, and only in strict mode
//! - Errors are classified by recoverability for retry logic
//!
//! # Error Categories
//!
//! - **Mailbox**: full or empty boxes, unknown box names
//! - **Linkage**: wiring errors between boxes
//! - **Store**: transactional store contention and conflicts
//! - **Unit**: faults raised by a scheduling unit's body
//! - **Thread**: thread bridge failures
//! - **Config**: invalid scheduler configuration
//! - **Internal**: runtime bugs and invalid states
//!
//! # Recovery Classification
//!
//! All errors can be classified by [`Recoverability`]:
//! - `Transient`: Temporary failure, safe to retry
//! - `Permanent`: Unrecoverable, do not retry
//! - `Unknown`: Recoverability depends on context

use core::fmt;
use std::sync::Arc;

use crate::types::{LinkageId, UnitId};

pub mod recovery;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Mailbox ===
    /// A bounded box is full; retry on a later tick.
    NoSpaceInBox,
    /// Receive on an empty box.
    EmptyBox,
    /// The named box does not exist on the component.
    UnknownBox,
    /// A box with the same name was declared twice.
    DuplicateBox,

    // === Linkage ===
    /// The source box already forwards to a destination.
    BoxAlreadyLinked,
    /// The linkage would connect boxes in an unsupported direction or form a cycle.
    InvalidLink,

    // === Store ===
    /// Another commit holds the store lock.
    Busy,
    /// An observed variable changed since the transaction opened.
    ConcurrentUpdate,
    /// A write targeted a key the transaction did not observe.
    KeyNotObserved,
    /// A retry driver gave up.
    RetriesExhausted,

    // === Units ===
    /// A unit's body raised an error or panicked.
    UnitFault,
    /// The scheduler was stopped.
    SchedulerStopped,

    // === Registry ===
    /// A service or tracked value with this name already exists.
    AlreadyRegistered,
    /// No service or tracked value with this name exists.
    NotRegistered,

    // === Thread bridge ===
    /// Spawning the OS thread failed.
    ThreadSpawn,
    /// The thread body returned an error or panicked.
    ThreadFault,

    // === Config ===
    /// A configuration value could not be parsed or is out of range.
    InvalidConfig,

    // === Internal ===
    /// Internal runtime error (bug).
    Internal,

    // === User ===
    /// User-provided error.
    User,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::NoSpaceInBox | Self::EmptyBox | Self::UnknownBox | Self::DuplicateBox => {
                ErrorCategory::Mailbox
            }
            Self::BoxAlreadyLinked | Self::InvalidLink => ErrorCategory::Linkage,
            Self::Busy | Self::ConcurrentUpdate | Self::KeyNotObserved | Self::RetriesExhausted => {
                ErrorCategory::Store
            }
            Self::UnitFault | Self::SchedulerStopped => ErrorCategory::Unit,
            Self::AlreadyRegistered | Self::NotRegistered => ErrorCategory::Registry,
            Self::ThreadSpawn | Self::ThreadFault => ErrorCategory::Thread,
            Self::InvalidConfig => ErrorCategory::Config,
            Self::Internal => ErrorCategory::Internal,
            Self::User => ErrorCategory::User,
        }
    }

    /// Returns the recoverability classification for this error kind.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            Self::NoSpaceInBox | Self::EmptyBox | Self::Busy | Self::ConcurrentUpdate => {
                Recoverability::Transient
            }

            Self::UnknownBox
            | Self::DuplicateBox
            | Self::BoxAlreadyLinked
            | Self::InvalidLink
            | Self::KeyNotObserved
            | Self::RetriesExhausted
            | Self::SchedulerStopped
            | Self::ThreadSpawn
            | Self::InvalidConfig
            | Self::Internal => Recoverability::Permanent,

            Self::UnitFault
            | Self::AlreadyRegistered
            | Self::NotRegistered
            | Self::ThreadFault
            | Self::User => Recoverability::Unknown,
        }
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.recoverability(), Recoverability::Transient)
    }

    /// Returns the recommended recovery action for this error kind.
    ///
    /// `Busy` and `ConcurrentUpdate` are both transient but call for different
    /// strategies: the first leaves the caller's basis valid, the second does not.
    #[must_use]
    pub const fn recovery_action(&self) -> RecoveryAction {
        match self {
            Self::NoSpaceInBox | Self::EmptyBox => RecoveryAction::RetryNextTick,
            Self::Busy => RecoveryAction::RetryWithBackoff(BackoffHint::QUICK),
            Self::ConcurrentUpdate => RecoveryAction::Recompute,

            Self::UnknownBox
            | Self::DuplicateBox
            | Self::BoxAlreadyLinked
            | Self::InvalidLink
            | Self::KeyNotObserved
            | Self::RetriesExhausted
            | Self::SchedulerStopped
            | Self::AlreadyRegistered
            | Self::NotRegistered
            | Self::InvalidConfig => RecoveryAction::Propagate,

            Self::UnitFault
            | Self::ThreadSpawn
            | Self::ThreadFault
            | Self::Internal => RecoveryAction::Escalate,

            Self::User => RecoveryAction::Custom,
        }
    }
}

/// Classification of error recoverability for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Permanent failure that will not succeed on retry.
    Permanent,
    /// Recoverability depends on context and cannot be determined
    /// from the error kind alone.
    Unknown,
}

impl Recoverability {
    /// Returns true if this error is safe to retry.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        matches!(self, Self::Transient)
    }

    /// Returns true if this error should never be retried.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent)
    }
}

/// Recommended recovery action for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecoveryAction {
    /// Retry the same operation on a later scheduler tick.
    RetryNextTick,
    /// Retry the operation with exponential backoff.
    RetryWithBackoff(BackoffHint),
    /// Reopen from fresh state and recompute before retrying.
    Recompute,
    /// Propagate the error to the caller without retry.
    Propagate,
    /// Escalate to the scheduler's fault policy.
    Escalate,
    /// Recovery action depends on application-specific context.
    Custom,
}

/// Hints for configuring exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BackoffHint {
    /// Suggested initial delay before first retry.
    pub initial_delay_ms: u32,
    /// Suggested maximum delay between retries.
    pub max_delay_ms: u32,
    /// Suggested maximum number of retry attempts.
    pub max_attempts: u8,
}

impl BackoffHint {
    /// Quick backoff for brief lock contention.
    pub const QUICK: Self = Self {
        initial_delay_ms: 1,
        max_delay_ms: 50,
        max_attempts: 16,
    };
}

/// High-level error category for grouping related errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Mailbox send/receive failures.
    Mailbox,
    /// Linkage graph failures.
    Linkage,
    /// Transactional store failures.
    Store,
    /// Scheduling unit failures.
    Unit,
    /// Service registry failures.
    Registry,
    /// Thread bridge failures.
    Thread,
    /// Configuration failures.
    Config,
    /// Internal runtime errors.
    Internal,
    /// User-originated errors.
    User,
}

/// Diagnostic context for an error.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// The unit where the error originated.
    pub unit_id: Option<UnitId>,
    /// The box involved in the error.
    pub box_name: Option<String>,
    /// The linkage involved in the error.
    pub linkage_id: Option<LinkageId>,
}

/// The main error type for weft operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    context: ErrorContext,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            source: None,
            context: ErrorContext {
                unit_id: None,
                box_name: None,
                linkage_id: None,
            },
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Adds structured context to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: ErrorContext) -> Self {
        self.context = ctx;
        self
    }

    /// Records the unit the error is attributed to.
    #[must_use]
    pub fn with_unit(mut self, unit: UnitId) -> Self {
        self.context.unit_id = Some(unit);
        self
    }

    /// Records the box the error is attributed to.
    #[must_use]
    pub fn with_box(mut self, name: impl Into<String>) -> Self {
        self.context.box_name = Some(name.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the recoverability classification.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        self.kind.recoverability()
    }

    /// Returns true if this error is typically retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Returns the recommended recovery action for this error.
    #[must_use]
    pub const fn recovery_action(&self) -> RecoveryAction {
        self.kind.recovery_action()
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the error context.
    #[must_use]
    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Returns true if this is a store contention or conflict error.
    #[must_use]
    pub const fn is_store_error(&self) -> bool {
        matches!(self.kind.category(), ErrorCategory::Store)
    }

    /// Returns true if this error represents a unit or thread fault.
    #[must_use]
    pub const fn is_fault(&self) -> bool {
        matches!(self.kind, ErrorKind::UnitFault | ErrorKind::ThreadFault)
    }

    /// Creates a unit fault error.
    #[must_use]
    pub fn unit_fault(unit: UnitId, detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnitFault)
            .with_message(detail)
            .with_unit(unit)
    }

    /// Creates an unknown box error.
    #[must_use]
    pub fn unknown_box(name: &str) -> Self {
        Self::new(ErrorKind::UnknownBox)
            .with_message(format!("no box named {name:?}"))
            .with_box(name)
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn invalid_config(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig).with_message(detail)
    }

    /// Creates a user error.
    #[must_use]
    pub fn user(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::User).with_message(detail)
    }

    /// Creates an internal error (runtime bug).
    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal).with_message(detail)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(msg) = &self.message {
            write!(f, ": {msg}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Error when sending to a box. The rejected message is handed back.
#[derive(Debug)]
pub enum SendError<T> {
    /// The final destination is bounded and full.
    Full(T),
    /// No box with the given name exists.
    Unknown(T),
}

impl<T> SendError<T> {
    /// Recovers the message that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(msg) | Self::Unknown(msg) => msg,
        }
    }

    /// Returns true if the send failed for lack of space.
    #[must_use]
    pub const fn is_full(&self) -> bool {
        matches!(self, Self::Full(_))
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Full(_) => write!(f, "no space in box"),
            Self::Unknown(_) => write!(f, "unknown box"),
        }
    }
}

/// Error when receiving from a box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    /// The box holds no messages.
    Empty,
    /// No box with the given name exists.
    Unknown,
}

impl fmt::Display for RecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "box is empty"),
            Self::Unknown => write!(f, "unknown box"),
        }
    }
}

impl From<RecvError> for Error {
    fn from(e: RecvError) -> Self {
        match e {
            RecvError::Empty => Self::new(ErrorKind::EmptyBox),
            RecvError::Unknown => Self::new(ErrorKind::UnknownBox),
        }
    }
}

impl<T> From<SendError<T>> for Error {
    fn from(e: SendError<T>) -> Self {
        match e {
            SendError::Full(_) => Self::new(ErrorKind::NoSpaceInBox),
            SendError::Unknown(_) => Self::new(ErrorKind::UnknownBox),
        }
    }
}

/// Extension trait for adding context to Results.
#[allow(clippy::result_large_err)]
pub trait ResultExt<T> {
    /// Attach a context message on error.
    fn context(self, msg: impl Into<String>) -> Result<T>;
    /// Attach context message computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_message(msg))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_message(f()))
    }
}

/// A specialized Result type for weft operations.
#[allow(clippy::result_large_err)]
pub type Result<T> = core::result::Result<T, Error>;
