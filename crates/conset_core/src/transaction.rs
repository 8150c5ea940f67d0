//! Transactions: local change sets, watches, and the staged-commit
//! lifecycle.

use crate::entry::{Entry, Keyed, VersionedKey, Watch};
use crate::error::{SetError, SetResult};
use crate::store::ConsistentSet;
use crate::types::Generation;
use std::collections::BTreeMap;
use std::ops::Bound;
use tracing::{debug, trace};

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Changes accumulate locally; nothing is in the shared index.
    Created,
    /// Changes have been injected into the shared index as invisible
    /// entries, awaiting `commit` or `rollback`.
    Staged,
}

/// A pending change for one key. At most one change per key survives;
/// later writes overwrite earlier ones.
#[derive(Debug)]
enum Change<E> {
    Upsert(E),
    Erase,
}

impl<E> Change<E> {
    fn is_erase(&self) -> bool {
        matches!(self, Self::Erase)
    }
}

/// A multi-entry transaction over a [`ConsistentSet`].
///
/// The transaction accumulates upserts and tombstones locally, records
/// watches for optimistic conflict detection, and moves through a strict
/// lifecycle: created → staged (via [`stage`]) → created (via [`commit`],
/// [`rollback`], or [`reset`]).
///
/// The issuing store is passed to each operation that touches shared
/// state; the store must be the one that issued the transaction and must
/// outlive it.
///
/// [`stage`]: Transaction::stage
/// [`commit`]: Transaction::commit
/// [`rollback`]: Transaction::rollback
/// [`reset`]: Transaction::reset
pub struct Transaction<E: Keyed> {
    changes: BTreeMap<E::Key, Change<E>>,
    watches: BTreeMap<E::Key, Watch>,
    generation: Generation,
    state: TransactionState,
}

impl<E: Keyed> std::fmt::Debug for Transaction<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("generation", &self.generation)
            .field("state", &self.state)
            .field("changes", &self.changes.len())
            .field("watches", &self.watches.len())
            .finish()
    }
}

impl<E: Keyed> Transaction<E> {
    pub(crate) fn new(generation: Generation) -> Self {
        Self {
            changes: BTreeMap::new(),
            watches: BTreeMap::new(),
            generation,
            state: TransactionState::Created,
        }
    }

    /// The transaction's current generation.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// The transaction's lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// Number of pending changes.
    #[must_use]
    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    /// The sentinel recorded when a watched key does not exist.
    fn missing_watch(&self) -> Watch {
        Watch::missing(self.generation)
    }

    /// Records an upsert. Overwrites any earlier change for the same key.
    pub fn upsert(&mut self, element: E) {
        self.changes.insert(element.key(), Change::Upsert(element));
    }

    /// Records a tombstone. Overwrites any earlier change for the same key.
    pub fn erase(&mut self, id: E::Key) {
        self.changes.insert(id, Change::Erase);
    }

    /// Watches the current state of `id` in the shared index.
    ///
    /// At stage time the key must still be in exactly this state or the
    /// stage fails with [`SetError::Consistency`]. A later watch of the
    /// same key overwrites the earlier one.
    pub fn watch(&mut self, store: &ConsistentSet<E>, id: &E::Key) {
        let watch = match store.find(id) {
            Some(entry) => entry.watch(),
            None => self.missing_watch(),
        };
        self.watches.insert(id.clone(), watch);
    }

    /// Records a watch from an entry already in hand, skipping the index
    /// read.
    pub fn watch_entry(&mut self, entry: &Entry<E>) {
        self.watches.insert(entry.key(), entry.watch());
    }

    /// Point lookup overlaying this transaction's changes on the store.
    ///
    /// A local upsert shadows the shared entry; a local tombstone makes
    /// the key read as missing even if the store holds it.
    pub fn find<'a>(&'a self, store: &'a ConsistentSet<E>, id: &E::Key) -> Option<&'a E> {
        match self.changes.get(id) {
            Some(Change::Upsert(element)) => Some(element),
            Some(Change::Erase) => None,
            None => store.find(id).map(Entry::element),
        }
    }

    /// The smallest element with key strictly greater than `id`, as seen
    /// through this transaction's changes.
    ///
    /// Locally tombstoned keys mask their shared entries, which can take
    /// several probes of the shared index, each seeded past the masked
    /// key.
    pub fn upper_bound<'a>(&'a self, store: &'a ConsistentSet<E>, id: &E::Key) -> Option<&'a E> {
        let local_next = self
            .changes
            .range((Bound::Excluded(id), Bound::Unbounded))
            .find_map(|(key, change)| match change {
                Change::Upsert(element) => Some((key, element)),
                Change::Erase => None,
            });

        let mut probe_from = id.clone();
        loop {
            let Some(shared) = store.upper_bound(&probe_from) else {
                return local_next.map(|(_, element)| element);
            };
            let shared_key = shared.key();
            if let Some((local_key, local_element)) = local_next {
                if *local_key <= shared_key {
                    return Some(local_element);
                }
            }
            match self.changes.get(&shared_key) {
                Some(change) if change.is_erase() => {
                    probe_from = shared_key;
                }
                _ => return Some(shared.element()),
            }
        }
    }

    /// Validates watches and injects the pending changes into the shared
    /// index as invisible entries.
    ///
    /// On success the transaction is staged and its watch list becomes the
    /// index of injected entries, keyed so commit, rollback, and reset can
    /// find them by `(key, generation)`. On a watch mismatch the
    /// transaction is left untouched in the created state.
    pub fn stage(&mut self, store: &mut ConsistentSet<E>) -> SetResult<()> {
        for (id, watch) in &self.watches {
            let current = match store.find(id) {
                Some(entry) => entry.watch(),
                None => self.missing_watch(),
            };
            if current != *watch {
                debug!(generation = %self.generation, "stage failed: watched key changed");
                return Err(SetError::Consistency);
            }
        }

        self.watches.clear();
        for (id, change) in &self.changes {
            self.watches.insert(
                id.clone(),
                Watch {
                    generation: self.generation,
                    deleted: change.is_erase(),
                },
            );
        }

        let changes = std::mem::take(&mut self.changes);
        let index = store.index_mut();
        for (id, change) in changes {
            let entry = match change {
                Change::Upsert(element) => Entry::staged(element, self.generation, false),
                Change::Erase => Entry::staged(E::from_key(id), self.generation, true),
            };
            index.insert(entry);
        }

        self.state = TransactionState::Staged;
        trace!(generation = %self.generation, staged = self.watches.len(), "transaction staged");
        Ok(())
    }

    /// Makes the staged entries visible and compacts the revisions they
    /// supersede.
    ///
    /// Requires the staged state. Infallible under the stage contract: the
    /// entries to visibilize are guaranteed to be present.
    pub fn commit(&mut self, store: &mut ConsistentSet<E>) -> SetResult<()> {
        if self.state != TransactionState::Staged {
            return Err(SetError::OperationNotPermitted);
        }
        let watches = std::mem::take(&mut self.watches);
        for (id, watch) in &watches {
            store.index_mut().compact(id, watch.generation);
        }
        self.state = TransactionState::Created;
        trace!(generation = %self.generation, committed = watches.len(), "transaction committed");
        Ok(())
    }

    /// Withdraws the staged entries from the shared index back into this
    /// transaction's change set.
    ///
    /// Requires the staged state. The shared index is left as if the stage
    /// never happened; the changes re-emerge locally, stamped with a
    /// freshly allocated generation, and can be re-staged.
    pub fn rollback(&mut self, store: &mut ConsistentSet<E>) -> SetResult<()> {
        if self.state != TransactionState::Staged {
            return Err(SetError::OperationNotPermitted);
        }
        let generation = store.next_generation()?;
        let watches = std::mem::take(&mut self.watches);
        for (id, watch) in watches {
            let key = VersionedKey::new(id.clone(), watch.generation);
            if let Some(entry) = store.index_mut().extract(&key) {
                let change = if entry.is_deleted() {
                    Change::Erase
                } else {
                    Change::Upsert(entry.element)
                };
                self.changes.insert(id, change);
            }
        }
        self.generation = generation;
        self.state = TransactionState::Created;
        trace!(generation = %self.generation, "transaction rolled back");
        Ok(())
    }

    /// Discards all local state, withdrawing staged entries if any.
    ///
    /// Permitted from any state and idempotent. The transaction returns to
    /// the created state with a freshly allocated generation.
    pub fn reset(&mut self, store: &mut ConsistentSet<E>) -> SetResult<()> {
        let generation = store.next_generation()?;
        if self.state == TransactionState::Staged {
            let watches = std::mem::take(&mut self.watches);
            for (id, watch) in watches {
                let _ = store
                    .index_mut()
                    .extract(&VersionedKey::new(id, watch.generation));
            }
        }
        self.watches.clear();
        self.changes.clear();
        self.generation = generation;
        self.state = TransactionState::Created;
        Ok(())
    }
}
