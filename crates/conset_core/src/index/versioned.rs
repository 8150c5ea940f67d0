//! Ordered multiset of versioned entries.
//!
//! One structure holds both committed entries (visible) and pending writes
//! staged by live transactions (invisible), keyed by `(key, generation)`.
//! Readers filter on visibility; commit-time compaction flips a staged
//! entry visible and drops the revisions it supersedes.

use crate::entry::{Entry, Keyed, VersionedKey};
use crate::error::SetResult;
use crate::types::Generation;
use std::collections::BTreeMap;

/// An ordered index of [`Entry`] records with multi-revision support.
///
/// Entries are strictly ordered by `(key, generation)`; several revisions
/// of the same key coexist while transactions are in flight. At most one
/// entry per key is visible at any time outside a mutating call.
pub struct VersionedIndex<E: Keyed> {
    entries: BTreeMap<VersionedKey<E::Key>, Entry<E>>,
    visible: usize,
}

impl<E: Keyed> Default for VersionedIndex<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Keyed> std::fmt::Debug for VersionedIndex<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedIndex")
            .field("visible", &self.visible)
            .field("revisions", &self.entries.len())
            .finish()
    }
}

impl<E: Keyed> VersionedIndex<E> {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            visible: 0,
        }
    }

    /// Number of visible entries. Maintained incrementally; O(1).
    #[must_use]
    pub fn len(&self) -> usize {
        self.visible
    }

    /// Whether no entry is visible.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.visible == 0
    }

    /// Total number of revisions held, including invisible ones.
    #[must_use]
    pub fn revision_count(&self) -> usize {
        self.entries.len()
    }

    /// Returns the visible entry for `id`, if any.
    ///
    /// Invisible revisions in the equal-key run are skipped.
    pub fn find(&self, id: &E::Key) -> Option<&Entry<E>> {
        self.entries
            .range(VersionedKey::first(id)..=VersionedKey::last(id))
            .map(|(_, entry)| entry)
            .find(|entry| entry.visible)
    }

    /// Returns the first visible entry with key strictly greater than `id`.
    ///
    /// Keys whose revisions are all invisible are scanned past rather than
    /// terminating the lookup.
    pub fn upper_bound(&self, id: &E::Key) -> Option<&Entry<E>> {
        self.entries
            .range((
                std::ops::Bound::Excluded(VersionedKey::last(id)),
                std::ops::Bound::Unbounded,
            ))
            .map(|(_, entry)| entry)
            .find(|entry| entry.visible)
    }

    /// Returns the revision with exactly this `(key, generation)`,
    /// regardless of visibility.
    pub fn get(&self, key: &VersionedKey<E::Key>) -> Option<&Entry<E>> {
        self.entries.get(key)
    }

    /// Iterates visible entries with keys in the half-open range
    /// `[low, high)`, in ascending key order.
    pub fn range<'a>(
        &'a self,
        low: &E::Key,
        high: &E::Key,
    ) -> impl Iterator<Item = &'a Entry<E>> + 'a {
        let bounds = (low < high).then(|| VersionedKey::first(low)..VersionedKey::first(high));
        bounds
            .into_iter()
            .flat_map(move |span| self.entries.range(span))
            .map(|(_, entry)| entry)
            .filter(|entry| entry.visible)
    }

    /// Inserts a revision, keyed by its `(key, generation)`.
    pub(crate) fn insert(&mut self, entry: Entry<E>) {
        let newly_visible = entry.visible;
        let replaced = self.entries.insert(entry.versioned_key(), entry);
        if newly_visible {
            self.visible += 1;
        }
        if let Some(old) = replaced {
            if old.visible {
                self.visible -= 1;
            }
        }
    }

    /// Removes and returns the revision with exactly this
    /// `(key, generation)`, regardless of visibility.
    pub(crate) fn extract(&mut self, key: &VersionedKey<E::Key>) -> Option<Entry<E>> {
        let entry = self.entries.remove(key)?;
        if entry.visible {
            self.visible -= 1;
        }
        Some(entry)
    }

    /// Removes every visible revision of `id`.
    pub(crate) fn erase_visible(&mut self, id: &E::Key) {
        self.erase_visible_below(id, Generation::MAX);
    }

    /// Removes visible revisions of `id` older than `limit`.
    ///
    /// Invisible revisions are left for their owning transactions.
    pub(crate) fn erase_visible_below(&mut self, id: &E::Key, limit: Generation) {
        let stale: Vec<Generation> = self
            .entries
            .range(VersionedKey::first(id)..=VersionedKey::last(id))
            .filter(|(key, entry)| entry.visible && key.generation < limit)
            .map(|(key, _)| key.generation)
            .collect();
        for generation in stale {
            if self
                .entries
                .remove(&VersionedKey::new(id.clone(), generation))
                .is_some()
            {
                self.visible -= 1;
            }
        }
    }

    /// Removes visible entries in `[low, high)`, invoking `callback` with
    /// each element before it is removed.
    ///
    /// Invisible entries are untouched. The first callback error stops the
    /// sweep; entries already visited stay removed.
    pub(crate) fn erase_range<F>(
        &mut self,
        low: &E::Key,
        high: &E::Key,
        mut callback: F,
    ) -> SetResult<()>
    where
        F: FnMut(&E) -> SetResult<()>,
    {
        let victims: Vec<VersionedKey<E::Key>> = if low < high {
            self.entries
                .range(VersionedKey::first(low)..VersionedKey::first(high))
                .filter(|(_, entry)| entry.visible)
                .map(|(key, _)| key.clone())
                .collect()
        } else {
            Vec::new()
        };
        for key in victims {
            if let Some(entry) = self.entries.get(&key) {
                callback(&entry.element)?;
            }
            if self.entries.remove(&key).is_some() {
                self.visible -= 1;
            }
        }
        Ok(())
    }

    /// Commit-time compaction for one key.
    ///
    /// Flips the revision written at `keep` visible and removes every other
    /// visible revision it supersedes; if a visible revision newer than
    /// `keep` exists (a competing commit landed first), `keep` itself is
    /// superseded. A committed tombstone is elided once it has displaced
    /// the revisions under it, so no visible deleted entry survives.
    /// Invisible revisions owned by other in-flight transactions are left
    /// intact.
    pub(crate) fn compact(&mut self, id: &E::Key, keep: Generation) {
        let mut last_visible: Option<Generation> = None;
        let mut stale: Vec<Generation> = Vec::new();
        for (key, entry) in self
            .entries
            .range(VersionedKey::first(id)..=VersionedKey::last(id))
        {
            let visible = entry.visible || key.generation == keep;
            if !visible {
                continue;
            }
            if let Some(previous) = last_visible {
                stale.push(previous);
            }
            last_visible = Some(key.generation);
        }

        if let Some(entry) = self.entries.get_mut(&VersionedKey::new(id.clone(), keep)) {
            if !entry.visible {
                entry.visible = true;
                self.visible += 1;
            }
            if entry.deleted && last_visible == Some(keep) {
                stale.push(keep);
            }
        }

        for generation in stale {
            if let Some(entry) = self
                .entries
                .remove(&VersionedKey::new(id.clone(), generation))
            {
                if entry.visible {
                    self.visible -= 1;
                }
            }
        }
    }

    /// Drops every revision.
    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.visible = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Pair = (u64, u64);

    fn committed(key: u64, value: u64, generation: i64) -> Entry<Pair> {
        Entry::committed((key, value), Generation::new(generation))
    }

    fn staged(key: u64, value: u64, generation: i64, deleted: bool) -> Entry<Pair> {
        Entry::staged((key, value), Generation::new(generation), deleted)
    }

    #[test]
    fn find_returns_visible_entry() {
        let mut index = VersionedIndex::new();
        index.insert(committed(1, 10, 1));

        let entry = index.find(&1).unwrap();
        assert_eq!(entry.element(), &(1, 10));
        assert!(index.find(&2).is_none());
    }

    #[test]
    fn find_skips_invisible_revisions() {
        let mut index = VersionedIndex::new();
        index.insert(committed(1, 10, 1));
        index.insert(staged(1, 11, 2, false));

        let entry = index.find(&1).unwrap();
        assert_eq!(entry.generation(), Generation::new(1));
        assert_eq!(index.len(), 1);
        assert_eq!(index.revision_count(), 2);
    }

    #[test]
    fn find_missing_when_only_invisible() {
        let mut index = VersionedIndex::new();
        index.insert(staged(1, 10, 1, false));
        assert!(index.find(&1).is_none());
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn upper_bound_scans_past_invisible_keys() {
        let mut index = VersionedIndex::new();
        index.insert(committed(1, 10, 1));
        index.insert(staged(2, 20, 2, false));
        index.insert(committed(3, 30, 3));

        let next = index.upper_bound(&1).unwrap();
        assert_eq!(next.key(), 3);
        assert!(index.upper_bound(&3).is_none());
    }

    #[test]
    fn range_is_half_open_and_visible_only() {
        let mut index = VersionedIndex::new();
        index.insert(committed(1, 10, 1));
        index.insert(staged(2, 20, 2, false));
        index.insert(committed(3, 30, 3));
        index.insert(committed(5, 50, 4));

        let keys: Vec<u64> = index.range(&1, &5).map(Entry::key).collect();
        assert_eq!(keys, vec![1, 3]);

        let empty: Vec<u64> = index.range(&5, &1).map(Entry::key).collect();
        assert!(empty.is_empty());
    }

    #[test]
    fn erase_range_spares_invisible() {
        let mut index = VersionedIndex::new();
        index.insert(committed(1, 10, 1));
        index.insert(staged(2, 20, 2, false));
        index.insert(committed(3, 30, 3));

        let mut removed = Vec::new();
        index
            .erase_range(&0, &10, |element| {
                removed.push(*element);
                Ok(())
            })
            .unwrap();

        assert_eq!(removed, vec![(1, 10), (3, 30)]);
        assert_eq!(index.len(), 0);
        assert_eq!(index.revision_count(), 1);
        assert!(index
            .get(&VersionedKey::new(2, Generation::new(2)))
            .is_some());
    }

    #[test]
    fn extract_is_visibility_blind() {
        let mut index = VersionedIndex::new();
        index.insert(staged(1, 10, 4, false));

        let entry = index
            .extract(&VersionedKey::new(1, Generation::new(4)))
            .unwrap();
        assert_eq!(entry.element(), &(1, 10));
        assert_eq!(index.revision_count(), 0);
    }

    #[test]
    fn compact_flips_staged_and_drops_superseded() {
        let mut index = VersionedIndex::new();
        index.insert(committed(1, 10, 1));
        index.insert(staged(1, 11, 2, false));

        index.compact(&1, Generation::new(2));

        let entry = index.find(&1).unwrap();
        assert_eq!(entry.element(), &(1, 11));
        assert_eq!(index.revision_count(), 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn compact_elides_committed_tombstone() {
        let mut index = VersionedIndex::new();
        index.insert(committed(1, 10, 1));
        index.insert(staged(1, 0, 2, true));

        index.compact(&1, Generation::new(2));

        assert!(index.find(&1).is_none());
        assert_eq!(index.revision_count(), 0);
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn compact_yields_to_newer_committed_revision() {
        let mut index = VersionedIndex::new();
        index.insert(committed(1, 10, 1));
        index.insert(staged(1, 11, 2, false));
        index.insert(committed(1, 12, 3));

        index.compact(&1, Generation::new(2));

        let entry = index.find(&1).unwrap();
        assert_eq!(entry.element(), &(1, 12));
        assert_eq!(index.revision_count(), 1);
    }

    #[test]
    fn compact_leaves_other_transactions_pending_writes() {
        let mut index = VersionedIndex::new();
        index.insert(committed(1, 10, 1));
        index.insert(staged(1, 11, 2, false));
        index.insert(staged(1, 12, 3, false));

        index.compact(&1, Generation::new(2));

        assert_eq!(index.find(&1).unwrap().element(), &(1, 11));
        assert!(index
            .get(&VersionedKey::new(1, Generation::new(3)))
            .is_some());
        assert_eq!(index.revision_count(), 2);
    }

    #[test]
    fn erase_visible_below_keeps_the_new_revision() {
        let mut index = VersionedIndex::new();
        index.insert(committed(1, 10, 1));
        index.insert(committed(1, 11, 5));

        index.erase_visible_below(&1, Generation::new(5));

        let entry = index.find(&1).unwrap();
        assert_eq!(entry.element(), &(1, 11));
        assert_eq!(index.revision_count(), 1);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn clear_resets_counts() {
        let mut index = VersionedIndex::new();
        index.insert(committed(1, 10, 1));
        index.insert(staged(2, 20, 2, false));
        index.clear();
        assert_eq!(index.len(), 0);
        assert_eq!(index.revision_count(), 0);
    }
}
