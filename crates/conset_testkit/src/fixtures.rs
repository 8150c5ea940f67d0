//! Element fixtures and deterministic partition routing.

use conset_core::{ConsistentSet, Keyed, PartitionedSet};
use std::hash::{BuildHasher, Hasher};

/// A minimal keyed element: a `u64` key with a `u64` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pair {
    /// The ordering key.
    pub key: u64,
    /// The payload.
    pub value: u64,
}

impl Pair {
    /// Creates a pair.
    #[must_use]
    pub const fn new(key: u64, value: u64) -> Self {
        Self { key, value }
    }
}

impl Keyed for Pair {
    type Key = u64;

    fn key(&self) -> u64 {
        self.key
    }

    fn from_key(key: u64) -> Self {
        Self { key, value: 0 }
    }
}

/// A build-hasher that hashes a `u64` key to itself, so a key routes to
/// partition `key % P` and tests can place keys in partitions explicitly.
#[derive(Debug, Default, Clone)]
pub struct RouteByKey;

/// Hasher produced by [`RouteByKey`].
#[derive(Debug)]
pub struct RouteByKeyHasher(u64);

impl Hasher for RouteByKeyHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 = self.0.rotate_left(8) ^ u64::from(byte);
        }
    }

    fn write_u64(&mut self, value: u64) {
        self.0 = value;
    }
}

impl BuildHasher for RouteByKey {
    type Hasher = RouteByKeyHasher;

    fn build_hasher(&self) -> RouteByKeyHasher {
        RouteByKeyHasher(0)
    }
}

/// Builds a [`ConsistentSet`] holding the given `(key, value)` pairs.
#[must_use]
pub fn set_with(pairs: &[(u64, u64)]) -> ConsistentSet<Pair> {
    let mut set = ConsistentSet::new();
    for &(key, value) in pairs {
        set.upsert(Pair::new(key, value)).expect("upsert fixture");
    }
    set
}

/// Builds a [`PartitionedSet`] with key-modulo routing holding the given
/// `(key, value)` pairs.
#[must_use]
pub fn partitioned_with<const P: usize>(pairs: &[(u64, u64)]) -> PartitionedSet<Pair, RouteByKey, P> {
    let set = PartitionedSet::new();
    for &(key, value) in pairs {
        set.upsert(Pair::new(key, value)).expect("upsert fixture");
    }
    set
}
