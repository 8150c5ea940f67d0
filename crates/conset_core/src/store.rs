//! The transactional store.

use crate::entry::{Entry, Keyed};
use crate::error::SetResult;
use crate::index::VersionedIndex;
use crate::transaction::Transaction;
use crate::types::Generation;
use rand::Rng;
use std::collections::BTreeMap;

/// An in-memory ordered set with multi-entry transactions.
///
/// Entries are totally ordered by the key projected out of each element.
/// Direct writes behave like one-entry committed transactions; multi-entry
/// writes go through [`Transaction`]s issued by [`transaction`].
///
/// The store itself is not synchronized. Wrap it in
/// [`PartitionedSet`](crate::PartitionedSet) for concurrent use.
///
/// [`transaction`]: ConsistentSet::transaction
pub struct ConsistentSet<E: Keyed> {
    index: VersionedIndex<E>,
    generation: Generation,
}

impl<E: Keyed> Default for ConsistentSet<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Keyed> std::fmt::Debug for ConsistentSet<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsistentSet")
            .field("len", &self.len())
            .field("generation", &self.generation)
            .finish()
    }
}

impl<E: Keyed> ConsistentSet<E> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            index: VersionedIndex::new(),
            generation: Generation::ZERO,
        }
    }

    /// Number of visible entries. O(1).
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the store holds no visible entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// The store's current generation counter.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Allocates the next generation.
    pub(crate) fn next_generation(&mut self) -> SetResult<Generation> {
        self.generation = self.generation.checked_next()?;
        Ok(self.generation)
    }

    pub(crate) fn index(&self) -> &VersionedIndex<E> {
        &self.index
    }

    pub(crate) fn index_mut(&mut self) -> &mut VersionedIndex<E> {
        &mut self.index
    }

    /// Issues a fresh transaction stamped with a new generation.
    pub fn transaction(&mut self) -> SetResult<Transaction<E>> {
        Ok(Transaction::new(self.next_generation()?))
    }

    /// Inserts or replaces one element.
    ///
    /// Equivalent to a one-entry committed transaction: the new revision
    /// becomes visible immediately and any older visible revision of the
    /// same key is dropped. Pending writes of in-flight transactions are
    /// untouched.
    pub fn upsert(&mut self, element: E) -> SetResult<()> {
        let generation = self.next_generation()?;
        let id = element.key();
        self.index.insert(Entry::committed(element, generation));
        self.index.erase_visible_below(&id, generation);
        Ok(())
    }

    /// Inserts or replaces a batch of elements atomically.
    ///
    /// All entries share one freshly allocated generation. When a batch
    /// contains several elements with the same key, the first occurrence
    /// wins.
    pub fn upsert_all<I>(&mut self, elements: I) -> SetResult<()>
    where
        I: IntoIterator<Item = E>,
    {
        let mut batch: BTreeMap<E::Key, E> = BTreeMap::new();
        for element in elements {
            batch.entry(element.key()).or_insert(element);
        }
        let generation = self.next_generation()?;
        for (id, element) in batch {
            self.index.insert(Entry::committed(element, generation));
            self.index.erase_visible_below(&id, generation);
        }
        Ok(())
    }

    /// Returns the visible entry for `id`, if any.
    pub fn find(&self, id: &E::Key) -> Option<&Entry<E>> {
        self.index.find(id)
    }

    /// Returns the first visible entry with key strictly greater than `id`.
    pub fn upper_bound(&self, id: &E::Key) -> Option<&Entry<E>> {
        self.index.upper_bound(id)
    }

    /// Iterates visible elements in `[low, high)` in ascending key order.
    ///
    /// The first callback error stops iteration and propagates.
    pub fn range<F>(&self, low: &E::Key, high: &E::Key, mut callback: F) -> SetResult<()>
    where
        F: FnMut(&E) -> SetResult<()>,
    {
        for entry in self.index.range(low, high) {
            callback(&entry.element)?;
        }
        Ok(())
    }

    /// Iterates visible elements in `[low, high)`, allowing in-place
    /// mutation, and re-stamps each visited entry with one fresh
    /// generation allocated for the whole call.
    ///
    /// The re-stamp refreshes the entries' recency the way an LRU touch
    /// would. The callback must not change an element's key. On a callback
    /// error the current entry keeps its old generation and iteration
    /// stops; earlier entries keep their new stamps.
    pub fn range_mut<F>(&mut self, low: &E::Key, high: &E::Key, mut callback: F) -> SetResult<()>
    where
        F: FnMut(&mut E) -> SetResult<()>,
    {
        let touched: Vec<_> = self
            .index
            .range(low, high)
            .map(|entry| entry.versioned_key())
            .collect();
        if touched.is_empty() {
            return Ok(());
        }
        let generation = self.next_generation()?;
        for key in touched {
            let Some(mut entry) = self.index.extract(&key) else {
                continue;
            };
            let result = callback(&mut entry.element);
            if result.is_ok() {
                entry.generation = generation;
            }
            self.index.insert(entry);
            result?;
        }
        Ok(())
    }

    /// Removes every visible revision of `id`.
    pub fn erase(&mut self, id: &E::Key) {
        self.index.erase_visible(id);
    }

    /// Removes visible entries in `[low, high)`, invoking `callback` with
    /// each element before removal. Pending writes of in-flight
    /// transactions are untouched.
    pub fn erase_range<F>(&mut self, low: &E::Key, high: &E::Key, callback: F) -> SetResult<()>
    where
        F: FnMut(&E) -> SetResult<()>,
    {
        self.index.erase_range(low, high, callback)
    }

    /// Drops all entries and resets the generation counter.
    pub fn clear(&mut self) {
        self.index.clear();
        self.generation = Generation::ZERO;
    }

    /// Draws one visible element uniformly from `[low, high)`.
    ///
    /// Exact two-pass sampling: the first pass counts candidates, the
    /// second stops on the drawn index. The callback is not invoked when
    /// the range is empty.
    pub fn sample_range<R, F>(
        &self,
        low: &E::Key,
        high: &E::Key,
        rng: &mut R,
        callback: F,
    ) -> SetResult<()>
    where
        R: Rng + ?Sized,
        F: FnOnce(&E) -> SetResult<()>,
    {
        let count = self.index.range(low, high).count();
        if count == 0 {
            return Ok(());
        }
        let pick = rng.gen_range(0..count);
        match self.index.range(low, high).nth(pick) {
            Some(entry) => callback(&entry.element),
            None => Ok(()),
        }
    }

    /// Reservoir-samples visible elements in `[low, high)` into `reservoir`
    /// (Vitter's Algorithm R).
    ///
    /// `seen` counts candidates observed so far and may be carried across
    /// invocations to sample over several ranges or stores with one
    /// reservoir. While fewer than `capacity` candidates have been seen,
    /// each is appended; afterwards each candidate replaces a random slot
    /// with probability `capacity / seen`.
    pub fn sample_reservoir<R>(
        &self,
        low: &E::Key,
        high: &E::Key,
        rng: &mut R,
        seen: &mut usize,
        capacity: usize,
        reservoir: &mut Vec<E>,
    ) -> SetResult<()>
    where
        R: Rng + ?Sized,
        E: Clone,
    {
        for entry in self.index.range(low, high) {
            if *seen < capacity {
                if reservoir.len() <= *seen {
                    reservoir.push(entry.element.clone());
                } else {
                    reservoir[*seen] = entry.element.clone();
                }
            } else {
                let slot = rng.gen_range(0..=*seen);
                if slot < capacity {
                    reservoir[slot] = entry.element.clone();
                }
            }
            *seen += 1;
        }
        Ok(())
    }
}
