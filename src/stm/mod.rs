//! A key-value store with optimistic, versioned transactions.
//!
//! Every key carries a version that starts at 0 and goes up by one on each
//! committed write. A [`Transaction`] records the version of each key it
//! observes when opened; its commit succeeds only if none of those versions
//! moved in the meantime. Commits never block: a commit that finds the store
//! locked fails with [`StmError::Busy`] and leaves the transaction intact.
//!
//! # Example
//!
//! ```
//! use weft::stm::Store;
//!
//! let store: Store<i64> = Store::new();
//! let mut txn = store.open(["balance"]).unwrap();
//! assert_eq!(txn.get("balance").unwrap(), None);
//! txn.set("balance", 10).unwrap();
//! txn.commit().unwrap();
//! assert_eq!(store.version("balance"), Some(1));
//! ```
//!
//! [`Store::transact`] wraps the open / compute / commit cycle in a retry
//! loop driven by a [`RecoveryStrategy`].

mod error;
mod transaction;

pub use error::StmError;
pub use transaction::{Transaction, Var};

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::error::recovery::{ExponentialBackoff, RecoveryStrategy};
use crate::error::Error;

#[derive(Debug, Clone)]
pub(crate) struct Cell<V> {
    pub(crate) version: u64,
    pub(crate) value: Option<V>,
}

impl<V> Default for Cell<V> {
    fn default() -> Self {
        Self {
            version: 0,
            value: None,
        }
    }
}

/// Shared versioned store. Clones refer to the same cells.
pub struct Store<V> {
    pub(crate) cells: Arc<Mutex<BTreeMap<String, Cell<V>>>>,
}

impl<V> Clone for Store<V> {
    fn clone(&self) -> Self {
        Self {
            cells: Arc::clone(&self.cells),
        }
    }
}

impl<V> Default for Store<V> {
    fn default() -> Self {
        Self {
            cells: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }
}

impl<V: Clone> Store<V> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a transaction observing `keys`.
    ///
    /// Keys never seen before are created at version 0 with no value. Fails
    /// with [`StmError::Busy`] if a commit is in progress.
    pub fn open<I, K>(&self, keys: I) -> Result<Transaction<V>, StmError>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let Some(mut cells) = self.cells.try_lock() else {
            return Err(StmError::Busy);
        };
        let observed: Vec<(String, u64, Option<V>)> = keys
            .into_iter()
            .map(|key| {
                let key = key.as_ref();
                let cell = cells.entry(key.to_string()).or_default();
                (key.to_string(), cell.version, cell.value.clone())
            })
            .collect();
        drop(cells);
        Ok(Transaction::new(self.clone(), observed))
    }

    /// Opens a single-key transaction.
    pub fn use_var(&self, key: &str) -> Result<Var<V>, StmError> {
        let txn = self.open([key])?;
        Ok(Var::new(key.to_string(), txn))
    }

    /// Runs `f` in a transaction over `keys` and commits, retrying with the
    /// store's default backoff.
    pub fn transact<K, R, F>(&self, keys: &[K], f: F) -> Result<R, StmError>
    where
        K: AsRef<str>,
        F: FnMut(&mut Transaction<V>) -> Result<R, StmError>,
    {
        self.transact_with(keys, &ExponentialBackoff::for_store(), f)
    }

    /// Runs `f` in a transaction over `keys` and commits, retrying per
    /// `strategy`.
    ///
    /// On `Busy` the driver sleeps the strategy's backoff and tries again. On
    /// `ConcurrentUpdate` it reopens at once and calls `f` again with fresh
    /// values. Any other error from `f` is returned as is. Once the strategy
    /// declines to retry, fails with [`StmError::RetriesExhausted`].
    ///
    /// Sleeps on the calling thread; a cooperative unit should instead make
    /// one attempt per resume and yield on a retryable error.
    pub fn transact_with<K, R, F, S>(&self, keys: &[K], strategy: &S, mut f: F) -> Result<R, StmError>
    where
        K: AsRef<str>,
        F: FnMut(&mut Transaction<V>) -> Result<R, StmError>,
        S: RecoveryStrategy + ?Sized,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt = attempt.saturating_add(1);
            let outcome = self.open(keys).and_then(|mut txn| {
                let out = f(&mut txn)?;
                txn.commit()?;
                Ok(out)
            });
            let err = match outcome {
                Ok(out) => {
                    trace!(attempt, "transaction committed");
                    return Ok(out);
                }
                Err(err) if err.is_busy() || err.is_conflict() => err,
                Err(err) => return Err(err),
            };
            if !strategy.should_retry(&Error::from(err.clone()), attempt) {
                debug!(attempt, error = %err, "transaction retries exhausted");
                return Err(StmError::RetriesExhausted { attempts: attempt });
            }
            if err.is_busy() {
                std::thread::sleep(strategy.backoff_duration(attempt));
            } else {
                std::thread::yield_now();
            }
        }
    }

    /// Current version of `key`, if it has ever been observed.
    #[must_use]
    pub fn version(&self, key: &str) -> Option<u64> {
        self.cells.lock().get(key).map(|cell| cell.version)
    }

    /// Current committed value of `key`.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<V> {
        self.cells.lock().get(key).and_then(|cell| cell.value.clone())
    }

    /// Number of keys known to the store.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.lock().len()
    }

    /// Returns true if no key has been observed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.lock().is_empty()
    }

    /// Every key with its version and value, sorted by key.
    #[must_use]
    pub fn dump(&self) -> Vec<(String, u64, Option<V>)> {
        self.cells
            .lock()
            .iter()
            .map(|(key, cell)| (key.clone(), cell.version, cell.value.clone()))
            .collect()
    }
}

impl<V> fmt::Debug for Store<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys = self.cells.try_lock().map(|cells| cells.len());
        f.debug_struct("Store").field("keys", &keys).finish()
    }
}
