//! Core type definitions for ConSet.

use crate::error::{SetError, SetResult};
use std::fmt;

/// Generation number stamped on every write.
///
/// Generations are monotonically increasing per store instance and never
/// reused. They order revisions of the same key inside the index and
/// identify the entries a transaction has staged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(pub i64);

impl Generation {
    /// The zero generation a fresh store starts from.
    pub const ZERO: Self = Self(0);

    /// Smallest representable generation; used as a range bound.
    pub const MIN: Self = Self(i64::MIN);

    /// Largest representable generation; used as a range bound.
    pub const MAX: Self = Self(i64::MAX);

    /// Creates a generation from a raw value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns the next generation, or `SequenceNumberOverflow` if the
    /// counter saturated.
    pub fn checked_next(self) -> SetResult<Self> {
        self.0
            .checked_add(1)
            .map(Self)
            .ok_or(SetError::SequenceNumberOverflow)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gen:{}", self.0)
    }
}
