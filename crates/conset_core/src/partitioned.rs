//! Hash-partitioned concurrent wrapper.

use crate::config::PartitionConfig;
use crate::entry::{Entry, Keyed};
use crate::error::{SetError, SetResult};
use crate::store::ConsistentSet;
use crate::transaction::{Transaction, TransactionState};
use crate::types::Generation;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use rand::Rng;
use std::collections::hash_map::RandomState;
use std::hash::{BuildHasher, Hash};
use std::sync::atomic::{AtomicI64, Ordering};
use tracing::warn;

/// Default partition count.
pub const DEFAULT_PARTITIONS: usize = 16;

/// A [`ConsistentSet`] sharded across `P` independently locked partitions.
///
/// Keys route to partitions by hash; single-key operations lock only the
/// owning partition (shared for reads, exclusive for writes). Operations
/// spanning all partitions acquire locks with a try-lock loop: each pass
/// visits every partition and try-locks the ones not yet held, so no
/// thread ever waits on a lock while holding another and the wait graph
/// stays acyclic. The loop is bounded by [`PartitionConfig`]; exhausting
/// the budget surfaces [`SetError::WouldBlock`].
///
/// Within a partition operations are linearizable. Across partitions a
/// multi-partition read observes per-partition snapshots taken at
/// different moments; callers needing a consistent multi-key view use a
/// [`PartitionedTransaction`].
pub struct PartitionedSet<E: Keyed, S = RandomState, const P: usize = DEFAULT_PARTITIONS> {
    parts: [RwLock<ConsistentSet<E>>; P],
    hasher: S,
    generation: AtomicI64,
    config: PartitionConfig,
}

impl<E, S, const P: usize> PartitionedSet<E, S, P>
where
    E: Keyed,
    E::Key: Hash,
    S: BuildHasher,
{
    /// Creates an empty partitioned set with a default hasher.
    #[must_use]
    pub fn new() -> Self
    where
        S: Default,
    {
        Self::with_hasher_and_config(S::default(), PartitionConfig::default())
    }

    /// Creates an empty partitioned set with custom retry budgets.
    #[must_use]
    pub fn with_config(config: PartitionConfig) -> Self
    where
        S: Default,
    {
        Self::with_hasher_and_config(S::default(), config)
    }

    /// Creates an empty partitioned set routing keys with `hasher`.
    #[must_use]
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_hasher_and_config(hasher, PartitionConfig::default())
    }

    /// Creates an empty partitioned set with a custom hasher and budgets.
    #[must_use]
    pub fn with_hasher_and_config(hasher: S, config: PartitionConfig) -> Self {
        assert!(P > 0, "partition count must be positive");
        Self {
            parts: std::array::from_fn(|_| RwLock::new(ConsistentSet::new())),
            hasher,
            generation: AtomicI64::new(0),
            config,
        }
    }

    /// The partition count `P`.
    #[must_use]
    pub fn partitions(&self) -> usize {
        P
    }

    /// The wrapper-level generation counter. Diagnostic only; independent
    /// of the per-partition generations.
    #[must_use]
    pub fn generation(&self) -> Generation {
        Generation::new(self.generation.load(Ordering::Relaxed))
    }

    fn next_generation(&self) -> SetResult<Generation> {
        let previous = self.generation.fetch_add(1, Ordering::Relaxed);
        previous
            .checked_add(1)
            .map(Generation::new)
            .ok_or(SetError::SequenceNumberOverflow)
    }

    fn bucket(&self, id: &E::Key) -> usize {
        (self.hasher.hash_one(id) as usize) % P
    }

    /// Acquires every partition's shared lock with the try-lock loop and
    /// returns the guards. No lock is waited on while others are held.
    fn lock_all_shared(&self) -> SetResult<Vec<RwLockReadGuard<'_, ConsistentSet<E>>>> {
        let mut guards: Vec<Option<RwLockReadGuard<'_, ConsistentSet<E>>>> =
            (0..P).map(|_| None).collect();
        let mut remaining = P;
        for _ in 0..self.config.max_lock_passes {
            for (slot, lock) in guards.iter_mut().zip(self.parts.iter()) {
                if slot.is_none() {
                    if let Some(guard) = lock.try_read() {
                        *slot = Some(guard);
                        remaining -= 1;
                    }
                }
            }
            if remaining == 0 {
                return Ok(guards.into_iter().flatten().collect());
            }
        }
        warn!(remaining, "shared lock pass budget exhausted");
        Err(SetError::WouldBlock)
    }

    /// Exclusive-lock counterpart of [`lock_all_shared`](Self::lock_all_shared).
    fn lock_all_exclusive(&self) -> SetResult<Vec<RwLockWriteGuard<'_, ConsistentSet<E>>>> {
        let mut guards: Vec<Option<RwLockWriteGuard<'_, ConsistentSet<E>>>> =
            (0..P).map(|_| None).collect();
        let mut remaining = P;
        for _ in 0..self.config.max_lock_passes {
            for (slot, lock) in guards.iter_mut().zip(self.parts.iter()) {
                if slot.is_none() {
                    if let Some(guard) = lock.try_write() {
                        *slot = Some(guard);
                        remaining -= 1;
                    }
                }
            }
            if remaining == 0 {
                return Ok(guards.into_iter().flatten().collect());
            }
        }
        warn!(remaining, "exclusive lock pass budget exhausted");
        Err(SetError::WouldBlock)
    }

    /// Runs `apply` once per partition under its shared lock, acquiring
    /// locks with the try-lock loop. Each lock is released as soon as its
    /// partition has been processed.
    fn for_each_part<F>(&self, mut apply: F) -> SetResult<()>
    where
        F: FnMut(usize, &ConsistentSet<E>) -> SetResult<()>,
    {
        let mut done = [false; P];
        let mut remaining = P;
        for _ in 0..self.config.max_lock_passes {
            for index in 0..P {
                if done[index] {
                    continue;
                }
                let Some(guard) = self.parts[index].try_read() else {
                    continue;
                };
                apply(index, &guard)?;
                done[index] = true;
                remaining -= 1;
            }
            if remaining == 0 {
                return Ok(());
            }
        }
        warn!(remaining, "shared lock pass budget exhausted");
        Err(SetError::WouldBlock)
    }

    /// Exclusive-lock counterpart of [`for_each_part`](Self::for_each_part).
    fn for_each_part_mut<F>(&self, mut apply: F) -> SetResult<()>
    where
        F: FnMut(usize, &mut ConsistentSet<E>) -> SetResult<()>,
    {
        let mut done = [false; P];
        let mut remaining = P;
        for _ in 0..self.config.max_lock_passes {
            for index in 0..P {
                if done[index] {
                    continue;
                }
                let Some(mut guard) = self.parts[index].try_write() else {
                    continue;
                };
                apply(index, &mut guard)?;
                done[index] = true;
                remaining -= 1;
            }
            if remaining == 0 {
                return Ok(());
            }
        }
        warn!(remaining, "exclusive lock pass budget exhausted");
        Err(SetError::WouldBlock)
    }

    /// Number of visible entries across all partitions, counted with
    /// every partition's shared lock held.
    pub fn len(&self) -> SetResult<usize> {
        let guards = self.lock_all_shared()?;
        Ok(guards.iter().map(|part| part.len()).sum())
    }

    /// Whether no partition holds a visible entry.
    pub fn is_empty(&self) -> SetResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Inserts or replaces one element in its owning partition.
    pub fn upsert(&self, element: E) -> SetResult<()> {
        let index = self.bucket(&element.key());
        self.parts[index].write().upsert(element)
    }

    /// Inserts or replaces a batch of elements atomically across
    /// partitions, by staging and committing a multi-partition
    /// transaction.
    pub fn upsert_all<I>(&self, elements: I) -> SetResult<()>
    where
        I: IntoIterator<Item = E>,
    {
        let mut txn = self.transaction()?;
        for element in elements {
            txn.upsert(element);
        }
        txn.stage()?;
        txn.commit()
    }

    /// Point lookup in the owning partition. `found` runs under the
    /// partition's shared lock and must not re-enter the set.
    pub fn find<R, F>(&self, id: &E::Key, found: F) -> Option<R>
    where
        F: FnOnce(&Entry<E>) -> R,
    {
        let guard = self.parts[self.bucket(id)].read();
        guard.find(id).map(found)
    }

    /// Removes every visible revision of `id` from its owning partition.
    pub fn erase(&self, id: &E::Key) {
        self.parts[self.bucket(id)].write().erase(id);
    }

    /// The first visible entry with key strictly greater than `id`,
    /// across all partitions.
    ///
    /// Scans every partition for its local candidate under transient
    /// shared locks, picks the global minimum, then re-locks the winning
    /// partition to materialize the result. If the winner disappeared in
    /// between (a concurrent erase committed), the whole lookup restarts;
    /// past the restart budget it reports [`SetError::WouldBlock`].
    pub fn upper_bound<R, F>(&self, id: &E::Key, found: F) -> SetResult<Option<R>>
    where
        F: FnOnce(&Entry<E>) -> R,
    {
        let mut callback = Some(found);
        for _ in 0..self.config.max_restarts {
            let mut winner: Option<(E::Key, usize)> = None;
            self.for_each_part(|index, part| {
                if let Some(entry) = part.upper_bound(id) {
                    let key = entry.key();
                    match &winner {
                        Some((best, _)) if *best <= key => {}
                        _ => winner = Some((key, index)),
                    }
                }
                Ok(())
            })?;

            let Some((key, index)) = winner else {
                return Ok(None);
            };
            let guard = self.parts[index].read();
            if let Some(entry) = guard.find(&key) {
                return Ok(callback.take().map(|found| found(entry)));
            }
        }
        warn!("upper-bound restart budget exhausted");
        Err(SetError::WouldBlock)
    }

    /// Iterates visible elements in `[low, high)` in every partition.
    ///
    /// Entries arrive grouped by partition, ascending within each, and the
    /// per-partition views are snapshots taken at different moments: this
    /// trades consistency for performance. Use a transaction for a
    /// consistent view.
    pub fn range<F>(&self, low: &E::Key, high: &E::Key, mut callback: F) -> SetResult<()>
    where
        F: FnMut(&E) -> SetResult<()>,
    {
        let guards = self.lock_all_shared()?;
        for part in &guards {
            part.range(low, high, &mut callback)?;
        }
        Ok(())
    }

    /// Mutating range over every partition; see
    /// [`ConsistentSet::range_mut`] for the re-stamp semantics and
    /// [`range`](Self::range) for the consistency caveat.
    pub fn range_mut<F>(&self, low: &E::Key, high: &E::Key, mut callback: F) -> SetResult<()>
    where
        F: FnMut(&mut E) -> SetResult<()>,
    {
        let mut guards = self.lock_all_exclusive()?;
        for part in &mut guards {
            part.range_mut(low, high, &mut callback)?;
        }
        Ok(())
    }

    /// Removes visible entries in `[low, high)` from every partition,
    /// invoking `callback` with each element before removal.
    pub fn erase_range<F>(&self, low: &E::Key, high: &E::Key, mut callback: F) -> SetResult<()>
    where
        F: FnMut(&E) -> SetResult<()>,
    {
        let mut guards = self.lock_all_exclusive()?;
        for part in &mut guards {
            part.erase_range(low, high, &mut callback)?;
        }
        Ok(())
    }

    /// Drops all entries in every partition.
    pub fn clear(&self) -> SetResult<()> {
        let mut guards = self.lock_all_exclusive()?;
        for part in &mut guards {
            part.clear();
        }
        Ok(())
    }

    /// Draws one sample from `[low, high)` out of a single random
    /// partition.
    ///
    /// Assumes every partition holds a comparable share of the range; keys
    /// are hash-distributed, so this holds for ranges that are not tiny.
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
        let index = rng.gen_range(0..P);
        let guard = self.parts[index].read();
        guard.sample_range(low, high, rng, callback)
    }

    /// Reservoir-samples `[low, high)` across every partition with one
    /// shared `seen` counter. Per-partition snapshots are taken at
    /// different moments; this trades consistency for performance.
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
        self.for_each_part(|_, part| {
            part.sample_reservoir(low, high, rng, seen, capacity, reservoir)
        })
    }

    /// Issues a multi-partition transaction with one sub-transaction per
    /// partition.
    pub fn transaction(&self) -> SetResult<PartitionedTransaction<'_, E, S, P>> {
        let generation = self.next_generation()?;
        let mut parts = Vec::with_capacity(P);
        for lock in &self.parts {
            parts.push(lock.write().transaction()?);
        }
        let parts: [Transaction<E>; P] = match parts.try_into() {
            Ok(parts) => parts,
            Err(_) => unreachable!("one sub-transaction per partition"),
        };
        Ok(PartitionedTransaction {
            store: self,
            parts,
            generation,
        })
    }
}

impl<E, S, const P: usize> Default for PartitionedSet<E, S, P>
where
    E: Keyed,
    E::Key: Hash,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<E, S, const P: usize> std::fmt::Debug for PartitionedSet<E, S, P>
where
    E: Keyed,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PartitionedSet")
            .field("partitions", &P)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// A transaction spanning every partition of a [`PartitionedSet`].
///
/// Writes and watches route to the owning partition's sub-transaction;
/// lifecycle operations apply to every partition, acquiring exclusive
/// locks with the try-lock loop and processing each partition as its lock
/// is obtained.
///
/// `stage` is the only lifecycle operation that can fail part-way (on a
/// watch violation). Partitions staged before the failure stay staged:
/// observe the error and call [`rollback`](Self::rollback) (which skips
/// partitions still in the created state) or [`reset`](Self::reset).
///
/// Dropping a staged transaction leaves its invisible entries in the
/// shared index; reset or resolve it first.
#[derive(Debug)]
pub struct PartitionedTransaction<'a, E: Keyed, S = RandomState, const P: usize = DEFAULT_PARTITIONS>
{
    store: &'a PartitionedSet<E, S, P>,
    parts: [Transaction<E>; P],
    generation: Generation,
}

impl<E, S, const P: usize> PartitionedTransaction<'_, E, S, P>
where
    E: Keyed,
    E::Key: Hash,
    S: BuildHasher,
{
    /// The wrapper-level generation this transaction was stamped with.
    /// Diagnostic only.
    #[must_use]
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Records an upsert in the owning partition's sub-transaction.
    /// Touches only transaction-local state; takes no lock.
    pub fn upsert(&mut self, element: E) {
        let index = self.store.bucket(&element.key());
        self.parts[index].upsert(element);
    }

    /// Records a tombstone in the owning partition's sub-transaction.
    /// Touches only transaction-local state; takes no lock.
    pub fn erase(&mut self, id: E::Key) {
        let index = self.store.bucket(&id);
        self.parts[index].erase(id);
    }

    /// Watches the current state of `id` under its partition's shared
    /// lock.
    pub fn watch(&mut self, id: &E::Key) {
        let index = self.store.bucket(id);
        let guard = self.store.parts[index].read();
        self.parts[index].watch(&guard, id);
    }

    /// Point lookup overlaying this transaction's changes, under the
    /// owning partition's shared lock.
    pub fn find<R, F>(&self, id: &E::Key, found: F) -> Option<R>
    where
        F: FnOnce(&E) -> R,
    {
        let index = self.store.bucket(id);
        let guard = self.store.parts[index].read();
        self.parts[index].find(&guard, id).map(found)
    }

    /// Cross-partition upper bound as seen through this transaction's
    /// changes. Same scan/materialize/restart protocol as
    /// [`PartitionedSet::upper_bound`].
    pub fn upper_bound<R, F>(&self, id: &E::Key, found: F) -> SetResult<Option<R>>
    where
        F: FnOnce(&E) -> R,
    {
        let mut callback = Some(found);
        for _ in 0..self.store.config.max_restarts {
            let mut winner: Option<(E::Key, usize)> = None;
            let parts = &self.parts;
            self.store.for_each_part(|index, part| {
                if let Some(element) = parts[index].upper_bound(part, id) {
                    let key = element.key();
                    match &winner {
                        Some((best, _)) if *best <= key => {}
                        _ => winner = Some((key, index)),
                    }
                }
                Ok(())
            })?;

            let Some((key, index)) = winner else {
                return Ok(None);
            };
            let guard = self.store.parts[index].read();
            if let Some(element) = self.parts[index].find(&guard, &key) {
                return Ok(callback.take().map(|found| found(element)));
            }
        }
        warn!("transactional upper-bound restart budget exhausted");
        Err(SetError::WouldBlock)
    }

    /// Stages every partition's sub-transaction.
    ///
    /// On a watch violation the error propagates immediately; partitions
    /// already staged are left staged for the caller to roll back or
    /// reset.
    pub fn stage(&mut self) -> SetResult<()> {
        let parts = &mut self.parts;
        self.store
            .for_each_part_mut(|index, part| parts[index].stage(part))
    }

    /// Commits every partition's sub-transaction. Requires a fully staged
    /// transaction.
    pub fn commit(&mut self) -> SetResult<()> {
        let parts = &mut self.parts;
        self.store
            .for_each_part_mut(|index, part| parts[index].commit(part))
    }

    /// Rolls back the partitions that are actually staged; partitions
    /// still in the created state (after a part-way stage failure) are
    /// skipped.
    pub fn rollback(&mut self) -> SetResult<()> {
        let parts = &mut self.parts;
        self.store.for_each_part_mut(|index, part| {
            if parts[index].state() == TransactionState::Staged {
                parts[index].rollback(part)
            } else {
                Ok(())
            }
        })?;
        self.generation = self.store.next_generation()?;
        Ok(())
    }

    /// Resets every partition's sub-transaction; works from any state.
    pub fn reset(&mut self) -> SetResult<()> {
        let parts = &mut self.parts;
        self.store
            .for_each_part_mut(|index, part| parts[index].reset(part))?;
        self.generation = self.store.next_generation()?;
        Ok(())
    }
}
