//! Transaction context for the reference store
//!
//! [`TransactionContext`] is the registry record kept for every transaction
//! the manager has handed out. It tracks the read view, buffered writes,
//! what was read (for serializable dependency tracking) and the lifecycle
//! status.
//!
//! # Read Views
//!
//! - Read committed: every statement reads at the current commit version
//! - Repeatable read / serializable: the snapshot is taken at the first
//!   statement and reused for the rest of the transaction
//!
//! Buffered writes of the transaction itself are always visible to it
//! (read-your-writes) and never visible to anyone else before commit.

use std::collections::BTreeMap;

use harness_core::{Entity, Filter, IsolationLevel};

use crate::storage::VersionedStore;

/// Status of a transaction in its lifecycle
///
/// State transitions:
/// - `Active` → `Committed` (commit succeeded)
/// - `Active` → `Failed` (a statement was rejected)
/// - `Active` | `Failed` → `Aborted` (rollback, or commit of a failed transaction)
///
/// Terminal states: `Committed`, `Aborted`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// Transaction accepts statements
    Active,
    /// A statement failed; only rollback is accepted
    Failed {
        /// Why the statement failed
        reason: String,
    },
    /// Transaction committed
    Committed,
    /// Transaction was rolled back
    Aborted {
        /// Human-readable reason for abort
        reason: String,
    },
}

impl TransactionStatus {
    /// True for `Committed` and `Aborted`
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Committed | TransactionStatus::Aborted { .. }
        )
    }
}

/// Registry record for one transaction
#[derive(Debug, Clone)]
pub struct TransactionContext {
    /// Unique transaction id
    pub txn_id: u64,
    /// Level requested at begin
    pub isolation: IsolationLevel,
    /// Commit version the snapshot reads at (snapshot levels only)
    pub snapshot_version: Option<u64>,
    /// Logical time of the first statement
    pub begin_seq: Option<u64>,
    /// Logical time of commit
    pub end_seq: Option<u64>,
    /// Commit version assigned to the write set
    pub commit_version: Option<u64>,
    /// Buffered writes, `None` for a delete
    pub write_set: BTreeMap<String, Option<i64>>,
    /// Filters this transaction read through (serializable only)
    pub reads: Vec<Filter>,
    /// A concurrent transaction read something this one wrote
    pub rw_in: bool,
    /// This transaction read something a concurrent one wrote
    pub rw_out: bool,
    /// Lifecycle status
    pub status: TransactionStatus,
}

impl TransactionContext {
    /// Create a new active transaction record
    pub fn new(txn_id: u64, isolation: IsolationLevel) -> Self {
        Self {
            txn_id,
            isolation,
            snapshot_version: None,
            begin_seq: None,
            end_seq: None,
            commit_version: None,
            write_set: BTreeMap::new(),
            reads: Vec::new(),
            rw_in: false,
            rw_out: false,
            status: TransactionStatus::Active,
        }
    }

    /// Whether read/write dependencies are tracked for this transaction
    pub fn tracks_dependencies(&self) -> bool {
        self.isolation == IsolationLevel::Serializable
    }

    /// Whether the transaction accepts statements
    pub fn is_active(&self) -> bool {
        self.status == TransactionStatus::Active
    }

    /// Whether the transaction was rolled back
    pub fn is_aborted(&self) -> bool {
        matches!(self.status, TransactionStatus::Aborted { .. })
    }

    /// Whether the transaction still holds row locks
    pub fn holds_locks(&self) -> bool {
        !self.status.is_terminal()
    }

    /// Version the next statement reads at
    ///
    /// Takes the snapshot on the first statement of a snapshot-level
    /// transaction. `seq` is the logical time of that first statement.
    pub fn read_version(&mut self, store: &VersionedStore, seq: u64) -> u64 {
        if self.begin_seq.is_none() {
            self.begin_seq = Some(seq);
        }
        if !self.isolation.uses_snapshot() {
            return store.current_version();
        }
        *self
            .snapshot_version
            .get_or_insert_with(|| store.current_version())
    }

    /// Rows visible to this transaction at `version`, own writes applied
    pub fn visible_rows(&self, store: &VersionedStore, version: u64) -> BTreeMap<String, i64> {
        let mut rows: BTreeMap<String, i64> = store
            .scan_at(version)
            .into_iter()
            .map(|(name, vv)| (name, vv.value))
            .collect();

        for (name, value) in &self.write_set {
            match value {
                Some(v) => {
                    rows.insert(name.clone(), *v);
                }
                None => {
                    rows.remove(name);
                }
            }
        }
        rows
    }

    /// Rows selected by `filter` as entities, ordered by name
    pub fn select(&self, store: &VersionedStore, version: u64, filter: &Filter) -> Vec<Entity> {
        self.visible_rows(store, version)
            .into_iter()
            .filter(|(name, value)| filter.selects(name, *value))
            .map(|(name, value)| Entity::new(name, value))
            .collect()
    }

    /// Mark the transaction failed after a rejected statement
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        if self.is_active() {
            self.status = TransactionStatus::Failed {
                reason: reason.into(),
            };
        }
    }

    /// Mark the transaction rolled back and drop its buffered writes
    pub fn mark_aborted(&mut self, reason: impl Into<String>) {
        self.write_set.clear();
        self.status = TransactionStatus::Aborted {
            reason: reason.into(),
        };
    }

    /// Mark the transaction committed
    pub fn mark_committed(&mut self, commit_version: u64, end_seq: u64) {
        self.commit_version = Some(commit_version);
        self.end_seq = Some(end_seq);
        self.status = TransactionStatus::Committed;
    }

    /// Reason recorded by `mark_failed` or `mark_aborted`
    pub fn failure_reason(&self) -> Option<&str> {
        match &self.status {
            TransactionStatus::Failed { reason } | TransactionStatus::Aborted { reason } => {
                Some(reason)
            }
            _ => None,
        }
    }
}
