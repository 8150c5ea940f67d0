//! Shared helpers for ConSet benchmarks.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Deterministically shuffled keys `0..count`.
///
/// A fixed seed keeps runs comparable while defeating the best-case
/// ordered-insert path.
#[must_use]
pub fn shuffled_keys(count: u64) -> Vec<u64> {
    let mut keys: Vec<u64> = (0..count).collect();
    let mut rng = StdRng::seed_from_u64(0xC0FFEE);
    keys.shuffle(&mut rng);
    keys
}
