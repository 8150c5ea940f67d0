//! # ConSet Testkit
//!
//! Test utilities for ConSet.
//!
//! This crate provides:
//! - A small keyed element fixture and deterministic partition routing
//! - Property-based test generators using proptest
//! - Threaded stress harnesses for the partitioned store
//!
//! ## Usage
//!
//! ```rust,ignore
//! use conset_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_pairs() {
//!     let set = set_with(&[(1, 10), (2, 20)]);
//!     assert_eq!(set.len(), 2);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod stress;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;
pub use stress::*;
