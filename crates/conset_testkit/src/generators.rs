//! Property-based test generators using proptest.
//!
//! Strategies draw keys from a small keyspace so random operation
//! sequences actually collide on keys, which is where the versioning
//! logic earns its keep.

use crate::fixtures::Pair;
use proptest::prelude::*;

/// Width of the generated keyspace.
pub const KEYSPACE: u64 = 32;

/// A direct store operation.
#[derive(Debug, Clone)]
pub enum Op {
    /// Insert or replace an element.
    Upsert(Pair),
    /// Remove a key.
    Erase(u64),
}

/// Strategy for a single pair with a colliding-prone key.
pub fn pair_strategy() -> impl Strategy<Value = Pair> {
    (0..KEYSPACE, any::<u64>()).prop_map(|(key, value)| Pair::new(key, value))
}

/// Strategy for a direct operation, biased toward writes.
pub fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => pair_strategy().prop_map(Op::Upsert),
        1 => (0..KEYSPACE).prop_map(Op::Erase),
    ]
}

/// Strategy for a sequence of direct operations.
pub fn ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(), 0..max_len)
}

/// Strategy for a batch of transactional changes (applied with one
/// stage/commit cycle).
pub fn batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(), 1..max_len)
}
