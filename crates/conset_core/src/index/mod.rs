//! The versioned ordered index.

mod versioned;

pub use versioned::VersionedIndex;
