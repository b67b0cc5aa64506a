//! Reference multi-version store for the isolation harness
//!
//! This crate implements the Store Client boundary in memory with:
//! - VersionedStore: per-row version chains with atomic commit apply
//! - TransactionContext: read view, buffered writes, dependency flags
//! - Validation: row locks, first-updater-wins, rw-antidependency tracking
//! - TransactionManager: statement execution, commit and rollback
//! - MvccStore / MvccTransaction: the `Store` and `Transaction` impls
//!
//! Read committed takes a fresh view per statement, repeatable read is
//! snapshot isolation with first-updater-wins, and serializable adds
//! detection of read/write dependency cycles on top of the snapshot.
//! Row locks are never waited on.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod storage;
pub mod store;
pub mod transaction;
pub mod validation;

pub use manager::TransactionManager;
pub use storage::{RowVersion, VersionedStore, VersionedValue};
pub use store::{MvccStore, MvccTransaction};
pub use transaction::{TransactionContext, TransactionStatus};
pub use validation::ConflictType;
