//! The versioned entry record and key projection.

use crate::types::Generation;

/// An element whose ordering key can be projected out of it.
///
/// The key is what the set orders, watches, and routes by; the element is
/// the opaque payload the caller stores. Keys are expected to be cheap to
/// clone (integers, short ids).
///
/// `from_key` materializes a placeholder element carrying only its key. It
/// is used for tombstones: an erase recorded inside a transaction must
/// occupy a slot in the shared index before commit, and that slot needs an
/// element that projects to the right key.
pub trait Keyed: Sized {
    /// The ordering key projected out of each element.
    type Key: Ord + Clone;

    /// Projects the ordering key out of this element.
    fn key(&self) -> Self::Key;

    /// Builds a placeholder element for the given key.
    fn from_key(key: Self::Key) -> Self;
}

/// A key paired with the generation of a specific revision.
///
/// Orders lexicographically: by key first, ties broken by generation
/// ascending. This is the index's entry key, which is how several
/// revisions of one element key coexist in a single ordered structure.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct VersionedKey<K> {
    /// The element key.
    pub id: K,
    /// The revision generation.
    pub generation: Generation,
}

impl<K: Clone> VersionedKey<K> {
    /// Creates a versioned key.
    pub fn new(id: K, generation: Generation) -> Self {
        Self { id, generation }
    }

    /// The smallest versioned key for `id`; range bound for equal-key runs.
    pub fn first(id: &K) -> Self {
        Self {
            id: id.clone(),
            generation: Generation::MIN,
        }
    }

    /// The largest versioned key for `id`; range bound for equal-key runs.
    pub fn last(id: &K) -> Self {
        Self {
            id: id.clone(),
            generation: Generation::MAX,
        }
    }
}

/// A recorded snapshot of one key's state, used for optimistic conflict
/// detection at stage time.
///
/// The "missing" case (key did not exist when watched) is encoded with the
/// watching transaction's own generation and `deleted = true`; see
/// [`Watch::missing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watch {
    /// Generation of the watched revision.
    pub generation: Generation,
    /// Whether the watched revision was a tombstone.
    pub deleted: bool,
}

impl Watch {
    /// The sentinel recorded when the watched key did not exist.
    #[must_use]
    pub fn missing(transaction_generation: Generation) -> Self {
        Self {
            generation: transaction_generation,
            deleted: true,
        }
    }
}

/// The record stored in the versioned index.
///
/// `visible = false` marks a pending write staged by a live transaction;
/// readers skip it. `deleted = true` marks a tombstone; tombstones only
/// exist transiently between stage and commit.
#[derive(Debug, Clone)]
pub struct Entry<E> {
    pub(crate) element: E,
    pub(crate) generation: Generation,
    pub(crate) deleted: bool,
    pub(crate) visible: bool,
}

impl<E: Keyed> Entry<E> {
    /// Creates a visible, live entry for a direct write.
    pub(crate) fn committed(element: E, generation: Generation) -> Self {
        Self {
            element,
            generation,
            deleted: false,
            visible: true,
        }
    }

    /// Creates an invisible entry for a staged transactional write.
    pub(crate) fn staged(element: E, generation: Generation, deleted: bool) -> Self {
        Self {
            element,
            generation,
            deleted,
            visible: false,
        }
    }

    /// The stored element.
    pub fn element(&self) -> &E {
        &self.element
    }

    /// The entry's key, projected from the element.
    pub fn key(&self) -> E::Key {
        self.element.key()
    }

    /// The generation this revision was written at.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Whether this entry is a tombstone.
    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Whether this entry is visible to readers.
    pub fn is_visible(&self) -> bool {
        self.visible
    }

    /// The watch snapshot of this entry.
    #[must_use]
    pub fn watch(&self) -> Watch {
        Watch {
            generation: self.generation,
            deleted: self.deleted,
        }
    }

    /// The index key of this entry.
    pub(crate) fn versioned_key(&self) -> VersionedKey<E::Key> {
        VersionedKey::new(self.element.key(), self.generation)
    }
}
