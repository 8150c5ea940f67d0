//! Error types for the ConSet core.

use thiserror::Error;

/// Result type for set operations.
pub type SetResult<T> = Result<T, SetError>;

/// Errors that can occur in set operations.
///
/// This is a closed set: every fallible operation in the crate reports one
/// of these kinds and nothing else. Success is `Ok(())`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SetError {
    /// An allocation required by the operation failed.
    ///
    /// Kept as part of the public contract for callers that map statuses
    /// onto errno-style codes. No in-tree path produces it today: the
    /// collections used here allocate through the global allocator, which
    /// aborts rather than reporting failure.
    #[error("out of memory")]
    OutOfMemory,

    /// A watch comparison failed during `stage`.
    ///
    /// Some other writer committed a change to a watched key after the
    /// watch was taken. The transaction stays in the created state and can
    /// be retried after a `reset`.
    #[error("consistency violation: a watched key changed since it was watched")]
    Consistency,

    /// `commit` or `rollback` was called outside the staged state.
    #[error("operation not permitted in the current transaction state")]
    OperationNotPermitted,

    /// A partitioned operation exceeded its retry budget acquiring locks
    /// or restarting a cross-partition lookup.
    #[error("operation would block: partition lock or restart budget exhausted")]
    WouldBlock,

    /// The generation counter saturated.
    ///
    /// A practical concern only for extreme store lifetimes; the counter
    /// is 64-bit and bumped once per mutating operation.
    #[error("sequence number overflow")]
    SequenceNumberOverflow,

    /// Catch-all for a user callback that failed in an unanticipated way.
    #[error("unknown error")]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            SetError::Consistency.to_string(),
            "consistency violation: a watched key changed since it was watched"
        );
        assert_eq!(SetError::OutOfMemory.to_string(), "out of memory");
    }

    #[test]
    fn errors_compare() {
        assert_eq!(SetError::WouldBlock, SetError::WouldBlock);
        assert_ne!(SetError::WouldBlock, SetError::Unknown);
    }
}
