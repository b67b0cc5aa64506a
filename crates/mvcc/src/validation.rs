//! Conflict detection for the reference store
//!
//! Key rules:
//! - Row locks are never waited on: a row locked by another open
//!   transaction is rejected immediately
//! - Snapshot levels use first-updater-wins: writing a row whose newest
//!   committed version is newer than the snapshot is a write-write conflict
//! - Serializable additionally tracks rw-antidependencies between concurrent
//!   serializable transactions and rejects a transaction that would sit in a
//!   dangerous structure (an inbound and an outbound edge)
//! - Read committed and repeatable read allow write skew

use std::collections::{BTreeSet, HashMap};

use harness_core::{ConflictError, Filter};

use crate::storage::VersionedStore;
use crate::transaction::TransactionContext;

/// Types of conflicts the manager can detect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictType {
    /// Row is locked by another open transaction
    LockHeld {
        /// Row name
        name: String,
        /// Transaction holding the lock
        holder: u64,
    },

    /// Row was committed by a concurrent transaction after our snapshot
    WriteWrite {
        /// Row name
        name: String,
        /// Snapshot the writer reads at
        snapshot_version: u64,
        /// Newest committed version of the row
        current_version: u64,
    },

    /// Transaction would complete a read/write dependency cycle
    DangerousStructure {
        /// Transaction being rejected
        txn_id: u64,
    },
}

impl ConflictType {
    /// Store-facing error for this conflict
    pub fn to_error(&self) -> ConflictError {
        match self {
            ConflictType::LockHeld { name, .. } => ConflictError::lock_not_available(name),
            ConflictType::WriteWrite { .. } => ConflictError::concurrent_update(),
            ConflictType::DangerousStructure { .. } => ConflictError::read_write_dependency(),
        }
    }
}

impl std::fmt::Display for ConflictType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConflictType::LockHeld { name, holder } => {
                write!(f, "row '{}' locked by txn {}", name, holder)
            }
            ConflictType::WriteWrite {
                name,
                snapshot_version,
                current_version,
            } => write!(
                f,
                "row '{}' committed at version {} after snapshot {}",
                name, current_version, snapshot_version
            ),
            ConflictType::DangerousStructure { txn_id } => {
                write!(f, "txn {} has inbound and outbound rw-dependencies", txn_id)
            }
        }
    }
}

/// Check that `name` is not locked by another transaction
pub fn check_lock(
    locks: &HashMap<String, u64>,
    txn_id: u64,
    name: &str,
) -> Result<(), ConflictType> {
    match locks.get(name) {
        Some(&holder) if holder != txn_id => Err(ConflictType::LockHeld {
            name: name.to_string(),
            holder,
        }),
        _ => Ok(()),
    }
}

/// First-updater-wins check for snapshot levels
///
/// Read committed transactions always pass.
pub fn check_first_updater(
    txn: &TransactionContext,
    store: &VersionedStore,
    name: &str,
) -> Result<(), ConflictType> {
    let Some(snapshot_version) = txn.snapshot_version else {
        return Ok(());
    };
    match store.latest_version(name) {
        Some(current_version) if current_version > snapshot_version => {
            Err(ConflictType::WriteWrite {
                name: name.to_string(),
                snapshot_version,
                current_version,
            })
        }
        _ => Ok(()),
    }
}

/// Whether `earlier` committed before `later` took its first statement
fn committed_before(earlier: &TransactionContext, later: &TransactionContext) -> bool {
    matches!(
        (earlier.end_seq, later.begin_seq),
        (Some(end), Some(begin)) if end < begin
    )
}

/// Whether two serializable transactions overlap in time
pub fn concurrent(a: &TransactionContext, b: &TransactionContext) -> bool {
    a.txn_id != b.txn_id
        && a.tracks_dependencies()
        && b.tracks_dependencies()
        && !a.is_aborted()
        && !b.is_aborted()
        && !committed_before(a, b)
        && !committed_before(b, a)
}

/// Whether a read through `filter` observes a write of `name` from `old` to `new`
pub fn filter_touches(filter: &Filter, name: &str, old: Option<i64>, new: Option<i64>) -> bool {
    if let Filter::Name(n) = filter {
        return n == name;
    }
    old.is_some_and(|v| filter.selects(name, v)) || new.is_some_and(|v| filter.selects(name, v))
}

/// A row write as seen by dependency tracking
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowWrite {
    /// Row name
    pub name: String,
    /// Value visible to the writer before the write
    pub old: Option<i64>,
    /// Value written, `None` for a delete
    pub new: Option<i64>,
}

/// Add reader → writer edges for a read by `reader` through `filter`
///
/// Every concurrent serializable transaction that wrote a row the read
/// covers becomes the target of an edge. Returns the ids of those writers.
pub fn record_read(
    txns: &mut HashMap<u64, TransactionContext>,
    store: &VersionedStore,
    reader: u64,
    filter: &Filter,
    read_version: u64,
) -> BTreeSet<u64> {
    let mut writers = BTreeSet::new();
    let Some(reader_ctx) = txns.get(&reader) else {
        return writers;
    };
    if !reader_ctx.tracks_dependencies() {
        return writers;
    }

    for other in txns.values() {
        if !concurrent(reader_ctx, other) {
            continue;
        }
        let touched = other.write_set.iter().any(|(name, new)| {
            let old = store.get_at(name, read_version).map(|vv| vv.value);
            filter_touches(filter, name, old, *new)
        });
        if touched {
            writers.insert(other.txn_id);
        }
    }

    if let Some(ctx) = txns.get_mut(&reader) {
        ctx.reads.push(filter.clone());
        if !writers.is_empty() {
            ctx.rw_out = true;
        }
    }
    for id in &writers {
        if let Some(ctx) = txns.get_mut(id) {
            ctx.rw_in = true;
        }
    }
    writers
}

/// Add reader → writer edges for a write by `writer`
///
/// Every concurrent serializable transaction whose recorded reads cover the
/// row becomes the source of an edge. Returns the ids of those readers.
pub fn record_write(
    txns: &mut HashMap<u64, TransactionContext>,
    writer: u64,
    write: &RowWrite,
) -> BTreeSet<u64> {
    let mut readers = BTreeSet::new();
    let Some(writer_ctx) = txns.get(&writer) else {
        return readers;
    };
    if !writer_ctx.tracks_dependencies() {
        return readers;
    }

    for other in txns.values() {
        if !concurrent(writer_ctx, other) {
            continue;
        }
        let touched = other
            .reads
            .iter()
            .any(|f| filter_touches(f, &write.name, write.old, write.new));
        if touched {
            readers.insert(other.txn_id);
        }
    }

    for id in &readers {
        if let Some(ctx) = txns.get_mut(id) {
            ctx.rw_out = true;
        }
    }
    if !readers.is_empty() {
        if let Some(ctx) = txns.get_mut(&writer) {
            ctx.rw_in = true;
        }
    }
    readers
}

/// Check whether `txn_id` must be rejected after new edges to `peers`
///
/// The transaction is rejected if it now has both an inbound and an
/// outbound edge, or if one of the peers already committed with both: a
/// committed pivot can no longer be aborted, so the current transaction is
/// the one that has to go.
pub fn check_dangerous_structure(
    txns: &HashMap<u64, TransactionContext>,
    txn_id: u64,
    peers: &BTreeSet<u64>,
) -> Result<(), ConflictType> {
    let is_pivot = |ctx: &TransactionContext| ctx.rw_in && ctx.rw_out;

    let own = txns.get(&txn_id).is_some_and(is_pivot);
    let committed_peer = peers.iter().filter_map(|id| txns.get(id)).any(|ctx| {
        ctx.commit_version.is_some() && is_pivot(ctx)
    });

    if own || committed_peer {
        Err(ConflictType::DangerousStructure { txn_id })
    } else {
        Ok(())
    }
}
