//! Transactions and single-key variables.

use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, trace};

use super::error::StmError;
use super::Store;

#[derive(Debug, Clone)]
struct Snapshot<V> {
    version: u64,
    value: Option<V>,
}

/// An optimistic read-snapshot / deferred-write transaction.
///
/// Reads see the values observed when the transaction opened (or this
/// transaction's own pending writes). Writes stay private until
/// [`commit`](Self::commit) succeeds. After a successful commit the snapshot
/// is advanced to the committed state, so the transaction can be reused.
pub struct Transaction<V> {
    store: Store<V>,
    observed: BTreeMap<String, Snapshot<V>>,
    writes: BTreeMap<String, V>,
}

impl<V: Clone> Transaction<V> {
    pub(super) fn new(store: Store<V>, observed: impl IntoIterator<Item = (String, u64, Option<V>)>) -> Self {
        Self {
            store,
            observed: observed
                .into_iter()
                .map(|(key, version, value)| (key, Snapshot { version, value }))
                .collect(),
            writes: BTreeMap::new(),
        }
    }

    /// Reads a key: the pending write if there is one, else the snapshot.
    ///
    /// `Ok(None)` means the key has never been written.
    pub fn get(&self, key: &str) -> Result<Option<&V>, StmError> {
        if let Some(value) = self.writes.get(key) {
            return Ok(Some(value));
        }
        self.observed
            .get(key)
            .map(|snap| snap.value.as_ref())
            .ok_or_else(|| StmError::KeyNotObserved { key: key.to_string() })
    }

    /// Version of a key as observed by this transaction.
    #[must_use]
    pub fn version(&self, key: &str) -> Option<u64> {
        self.observed.get(key).map(|snap| snap.version)
    }

    /// Buffers a write. Only observed keys may be written.
    pub fn set(&mut self, key: &str, value: V) -> Result<(), StmError> {
        if !self.observed.contains_key(key) {
            return Err(StmError::KeyNotObserved { key: key.to_string() });
        }
        self.writes.insert(key.to_string(), value);
        Ok(())
    }

    /// Keys observed by this transaction, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.observed.keys().map(String::as_str)
    }

    /// Returns true if writes are pending.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        !self.writes.is_empty()
    }

    /// Publishes the pending writes.
    ///
    /// Never blocks: if another commit holds the store, fails with
    /// [`StmError::Busy`] and keeps the writes. If any observed key changed
    /// since it was observed, fails with [`StmError::ConcurrentUpdate`] and
    /// nothing is written. On success every observed key's version goes up
    /// by exactly one, read-only keys included, so a commit that relied on a
    /// value invalidates anyone else still holding the old version.
    pub fn commit(&mut self) -> Result<(), StmError> {
        let Some(mut cells) = self.store.cells.try_lock() else {
            debug!(keys = ?self.observed.keys().collect::<Vec<_>>(), "commit busy");
            return Err(StmError::Busy);
        };

        let stale: Vec<String> = self
            .observed
            .iter()
            .filter(|(key, snap)| cells.get(*key).map_or(true, |cell| cell.version != snap.version))
            .map(|(key, _)| key.clone())
            .collect();
        if !stale.is_empty() {
            debug!(keys = ?stale, "commit conflict");
            return Err(StmError::ConcurrentUpdate { keys: stale });
        }

        let mut writes = std::mem::take(&mut self.writes);
        for (key, snap) in &mut self.observed {
            let cell = cells.entry(key.clone()).or_default();
            cell.version += 1;
            if let Some(value) = writes.remove(key) {
                cell.value = Some(value);
            }
            snap.version = cell.version;
            snap.value.clone_from(&cell.value);
        }
        drop(cells);
        trace!(keys = ?self.observed.keys().collect::<Vec<_>>(), "commit ok");
        Ok(())
    }
}

impl<V> fmt::Debug for Transaction<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("observed", &self.observed.keys().collect::<Vec<_>>())
            .field("writes", &self.writes.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A transaction over a single key.
pub struct Var<V> {
    key: String,
    txn: Transaction<V>,
}

impl<V: Clone> Var<V> {
    pub(super) fn new(key: String, txn: Transaction<V>) -> Self {
        Self { key, txn }
    }

    /// The key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Current value as seen by this variable.
    #[must_use]
    pub fn value(&self) -> Option<&V> {
        self.txn.get(&self.key).ok().flatten()
    }

    /// Version as last observed or committed.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.txn.version(&self.key).unwrap_or(0)
    }

    /// Buffers a new value.
    pub fn set(&mut self, value: V) {
        // The key is always observed.
        let _ = self.txn.set(&self.key, value);
    }

    /// Publishes the buffered value. See [`Transaction::commit`].
    pub fn commit(&mut self) -> Result<(), StmError> {
        self.txn.commit()
    }
}

impl<V> fmt::Debug for Var<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Var").field("key", &self.key).finish_non_exhaustive()
    }
}
