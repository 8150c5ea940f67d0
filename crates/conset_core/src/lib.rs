//! # ConSet Core
//!
//! An in-memory, ordered, transactional set.
//!
//! Elements are totally ordered by a key projected out of each element
//! (the [`Keyed`] trait). The store supports point lookups, ordered
//! iteration (upper bound, half-open ranges, uniform sampling) and
//! multi-entry transactions with optimistic concurrency: transactions
//! record watches, stage masked entries into the shared index, and either
//! commit (making them visible and compacting superseded revisions) or
//! roll back.
//!
//! Two entry points:
//! - [`ConsistentSet`]: the single-threaded store plus [`Transaction`].
//! - [`PartitionedSet`]: the same store sharded across a fixed number of
//!   independently locked partitions, safe to share between threads.
//!
//! Durability, replication, and serialization are out of scope; this is
//! the storage core of an embedded process.
//!
//! ```
//! use conset_core::{ConsistentSet, Keyed};
//!
//! #[derive(Debug, Clone, PartialEq)]
//! struct Account {
//!     id: u64,
//!     balance: i64,
//! }
//!
//! impl Keyed for Account {
//!     type Key = u64;
//!
//!     fn key(&self) -> u64 {
//!         self.id
//!     }
//!
//!     fn from_key(id: u64) -> Self {
//!         Account { id, balance: 0 }
//!     }
//! }
//!
//! # fn main() -> conset_core::SetResult<()> {
//! let mut set = ConsistentSet::new();
//! set.upsert(Account { id: 7, balance: 100 })?;
//!
//! let mut txn = set.transaction()?;
//! txn.watch(&set, &7);
//! txn.upsert(Account { id: 7, balance: 50 });
//! txn.stage(&mut set)?;
//! txn.commit(&mut set)?;
//!
//! assert_eq!(set.find(&7).unwrap().element().balance, 50);
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod entry;
mod error;
mod index;
mod partitioned;
mod store;
mod transaction;
mod types;

pub use config::PartitionConfig;
pub use entry::{Entry, Keyed, Watch};
pub use error::{SetError, SetResult};
pub use partitioned::{PartitionedSet, PartitionedTransaction, DEFAULT_PARTITIONS};
pub use store::ConsistentSet;
pub use transaction::{Transaction, TransactionState};
pub use types::Generation;
