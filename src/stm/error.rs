//! Store errors.

use crate::error::{Error, ErrorKind};

/// Why a store operation failed.
///
/// `Busy` and `ConcurrentUpdate` are both retryable but call for different
/// responses: after `Busy` nothing has changed and the same transaction may
/// simply be tried again later; after `ConcurrentUpdate` the observed values
/// are stale and the transaction must be reopened and its writes recomputed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StmError {
    /// Another commit held the store lock.
    #[error("store busy: another commit is in progress")]
    Busy,
    /// Observed keys changed since the transaction opened.
    #[error("concurrent update of {keys:?}")]
    ConcurrentUpdate {
        /// Keys whose versions no longer match.
        keys: Vec<String>,
    },
    /// The key was not named when the transaction opened.
    #[error("key {key:?} was not observed by this transaction")]
    KeyNotObserved {
        /// The offending key.
        key: String,
    },
    /// The retry driver gave up.
    #[error("transaction abandoned after {attempts} attempts")]
    RetriesExhausted {
        /// Attempts made, including the first.
        attempts: u32,
    },
}

impl StmError {
    /// Returns true for lock contention.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }

    /// Returns true for a stale-basis conflict.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrentUpdate { .. })
    }

    /// The matching crate-wide error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Busy => ErrorKind::Busy,
            Self::ConcurrentUpdate { .. } => ErrorKind::ConcurrentUpdate,
            Self::KeyNotObserved { .. } => ErrorKind::KeyNotObserved,
            Self::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
        }
    }
}

impl From<StmError> for Error {
    fn from(e: StmError) -> Self {
        Self::new(e.kind()).with_message(e.to_string())
    }
}
