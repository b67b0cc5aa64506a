//! Transaction manager for the reference store
//!
//! Owns the committed storage and the registry of transaction records, and
//! runs every statement, commit and rollback under the registry lock so that
//! conflict checks and the state they inspect cannot race.
//!
//! ## Statement Sequence
//!
//! ```text
//! 1. Check the record is Active (Failed → TransactionAborted, terminal → TransactionClosed)
//! 2. Pick the read version (fresh for read committed, snapshot otherwise)
//! 3. Reads: select rows, record serializable dependencies
//! 4. Writes: lock check, first-updater check, dependency check, then buffer + lock
//! ```
//!
//! ## Commit Sequence
//!
//! ```text
//! 1. Failed → Aborted, return TransactionAborted
//! 2. Serializable pivot check
//! 3. Apply write set at one new commit version
//! 4. Mark Committed, release locks, prune
//! ```

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};

use harness_core::{
    ConflictError, Entity, Filter, IsolationLevel, Statement, StoreError, StoreResult,
};
use parking_lot::Mutex;

use crate::storage::VersionedStore;
use crate::transaction::{TransactionContext, TransactionStatus};
use crate::validation::{
    check_dangerous_structure, check_first_updater, check_lock, record_read, record_write,
    ConflictType, RowWrite,
};

/// Shared mutable state guarded by the registry lock
#[derive(Debug, Default)]
struct Registry {
    /// Records of open transactions and of committed ones still concurrent
    /// with an open transaction
    txns: HashMap<u64, TransactionContext>,
    /// Row write locks: row name → holding transaction
    locks: HashMap<String, u64>,
    /// Logical clock for first statements and commits
    seq: u64,
}

impl Registry {
    fn tick(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

/// Manages transaction lifecycle for the reference store
pub struct TransactionManager {
    store: VersionedStore,
    registry: Mutex<Registry>,
    /// Next transaction ID
    next_txn_id: AtomicU64,
}

impl TransactionManager {
    /// Create a manager over an empty store
    pub fn new() -> Self {
        Self {
            store: VersionedStore::new(),
            registry: Mutex::new(Registry::default()),
            next_txn_id: AtomicU64::new(1),
        }
    }

    /// Committed storage
    pub fn store(&self) -> &VersionedStore {
        &self.store
    }

    /// Open a transaction and return its id
    pub fn begin(&self, isolation: IsolationLevel) -> u64 {
        let txn_id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        self.registry
            .lock()
            .txns
            .insert(txn_id, TransactionContext::new(txn_id, isolation));
        tracing::trace!(txn_id, %isolation, "begin");
        txn_id
    }

    /// Status of a transaction, None once its record has been pruned
    pub fn status(&self, txn_id: u64) -> Option<TransactionStatus> {
        self.registry.lock().txns.get(&txn_id).map(|c| c.status.clone())
    }

    /// Number of transactions not yet committed or rolled back
    pub fn active_count(&self) -> usize {
        self.registry
            .lock()
            .txns
            .values()
            .filter(|c| !c.status.is_terminal())
            .count()
    }

    /// Number of row locks currently held
    pub fn lock_count(&self) -> usize {
        self.registry.lock().locks.len()
    }

    /// Run a `Select` for `txn_id`
    pub fn query(&self, txn_id: u64, filter: &Filter) -> StoreResult<Vec<Entity>> {
        let mut reg = self.registry.lock();
        Self::ensure_active(&reg, txn_id)?;

        let seq = reg.tick();
        let Some(ctx) = reg.txns.get_mut(&txn_id) else {
            return Err(StoreError::TransactionClosed);
        };
        let version = ctx.read_version(&self.store, seq);
        let rows = ctx.select(&self.store, version, filter);

        let writers = record_read(&mut reg.txns, &self.store, txn_id, filter, version);
        if let Err(conflict) = check_dangerous_structure(&reg.txns, txn_id, &writers) {
            return Err(Self::reject(&mut reg, txn_id, conflict));
        }

        tracing::trace!(txn_id, version, rows = rows.len(), "select");
        Ok(rows)
    }

    /// Run a write statement for `txn_id`, returning rows affected
    pub fn exec(&self, txn_id: u64, statement: &Statement) -> StoreResult<u64> {
        let mut reg = self.registry.lock();
        Self::ensure_active(&reg, txn_id)?;

        let seq = reg.tick();
        let Some(ctx) = reg.txns.get_mut(&txn_id) else {
            return Err(StoreError::TransactionClosed);
        };
        let version = ctx.read_version(&self.store, seq);
        let visible = ctx.visible_rows(&self.store, version);

        let writes: Vec<RowWrite> = match statement {
            Statement::Update { filter, value } => visible
                .iter()
                .filter(|(name, v)| filter.selects(name, **v))
                .map(|(name, v)| RowWrite {
                    name: name.clone(),
                    old: Some(*v),
                    new: Some(*value),
                })
                .collect(),
            Statement::Delete(filter) => visible
                .iter()
                .filter(|(name, v)| filter.selects(name, **v))
                .map(|(name, v)| RowWrite {
                    name: name.clone(),
                    old: Some(*v),
                    new: None,
                })
                .collect(),
            Statement::Insert(entity) => {
                if visible.contains_key(&entity.name) {
                    ctx.mark_failed(format!("duplicate name '{}'", entity.name));
                    return Err(StoreError::UniqueViolation(entity.name.clone()));
                }
                vec![RowWrite {
                    name: entity.name.clone(),
                    old: None,
                    new: Some(entity.value),
                }]
            }
            Statement::Select(_) => {
                return Err(StoreError::Unsupported(format!(
                    "{} must go through query",
                    statement
                )))
            }
        };

        for write in &writes {
            if let Err(conflict) = check_lock(&reg.locks, txn_id, &write.name) {
                return Err(Self::reject(&mut reg, txn_id, conflict));
            }
            let first_updater = reg
                .txns
                .get(&txn_id)
                .map(|ctx| check_first_updater(ctx, &self.store, &write.name))
                .unwrap_or(Ok(()));
            if let Err(conflict) = first_updater {
                return Err(Self::reject(&mut reg, txn_id, conflict));
            }
        }

        let mut readers = BTreeSet::new();
        for write in &writes {
            readers.extend(record_write(&mut reg.txns, txn_id, write));
        }
        if let Err(conflict) = check_dangerous_structure(&reg.txns, txn_id, &readers) {
            return Err(Self::reject(&mut reg, txn_id, conflict));
        }

        for write in &writes {
            reg.locks.insert(write.name.clone(), txn_id);
        }
        if let Some(ctx) = reg.txns.get_mut(&txn_id) {
            for write in &writes {
                ctx.write_set.insert(write.name.clone(), write.new);
            }
        }

        tracing::trace!(txn_id, %statement, rows = writes.len(), "exec");
        Ok(writes.len() as u64)
    }

    /// Commit `txn_id`, returning its commit version
    pub fn commit(&self, txn_id: u64) -> StoreResult<u64> {
        let mut reg = self.registry.lock();
        let status = match reg.txns.get(&txn_id) {
            Some(ctx) => ctx.status.clone(),
            None => return Err(StoreError::TransactionClosed),
        };

        match status {
            TransactionStatus::Active => {}
            TransactionStatus::Failed { reason } => {
                Self::finish_abort(&mut reg, txn_id, format!("commit after failure: {}", reason));
                self.prune(&mut reg);
                return Err(StoreError::TransactionAborted);
            }
            TransactionStatus::Committed | TransactionStatus::Aborted { .. } => {
                return Err(StoreError::TransactionClosed);
            }
        }

        if let Err(conflict) = check_dangerous_structure(&reg.txns, txn_id, &BTreeSet::new()) {
            let err = conflict.to_error();
            Self::finish_abort(&mut reg, txn_id, conflict.to_string());
            self.prune(&mut reg);
            tracing::debug!(txn_id, %conflict, "commit rejected");
            return Err(StoreError::Conflict(err));
        }

        let end_seq = reg.tick();
        let Some(ctx) = reg.txns.get_mut(&txn_id) else {
            return Err(StoreError::TransactionClosed);
        };
        let commit_version = if ctx.write_set.is_empty() {
            self.store.current_version()
        } else {
            self.store.apply(&ctx.write_set)
        };
        ctx.mark_committed(commit_version, end_seq);
        if !ctx.tracks_dependencies() {
            ctx.write_set.clear();
        }

        reg.locks.retain(|_, holder| *holder != txn_id);
        self.prune(&mut reg);

        tracing::trace!(txn_id, commit_version, "commit");
        Ok(commit_version)
    }

    /// Roll back `txn_id`
    ///
    /// Rolling back a terminated or unknown transaction is a no-op.
    pub fn rollback(&self, txn_id: u64) {
        let mut reg = self.registry.lock();
        let terminal = reg
            .txns
            .get(&txn_id)
            .map_or(true, |c| c.status.is_terminal());
        if terminal {
            return;
        }
        Self::finish_abort(&mut reg, txn_id, "rollback".to_string());
        self.prune(&mut reg);
        tracing::trace!(txn_id, "rollback");
    }

    fn ensure_active(reg: &Registry, txn_id: u64) -> StoreResult<()> {
        match reg.txns.get(&txn_id).map(|c| &c.status) {
            Some(TransactionStatus::Active) => Ok(()),
            Some(TransactionStatus::Failed { .. }) => Err(StoreError::TransactionAborted),
            _ => Err(StoreError::TransactionClosed),
        }
    }

    /// Mark `txn_id` failed after a conflict and build the error to return
    fn reject(reg: &mut Registry, txn_id: u64, conflict: ConflictType) -> StoreError {
        tracing::debug!(txn_id, %conflict, "statement rejected");
        let err: ConflictError = conflict.to_error();
        if let Some(ctx) = reg.txns.get_mut(&txn_id) {
            ctx.mark_failed(conflict.to_string());
        }
        StoreError::Conflict(err)
    }

    fn finish_abort(reg: &mut Registry, txn_id: u64, reason: String) {
        if let Some(ctx) = reg.txns.get_mut(&txn_id) {
            ctx.mark_aborted(reason);
        }
        reg.locks.retain(|_, holder| *holder != txn_id);
    }

    /// Drop records and row versions no open transaction can depend on
    fn prune(&self, reg: &mut Registry) {
        let oldest_begin = reg
            .txns
            .values()
            .filter(|c| !c.status.is_terminal())
            .filter_map(|c| c.begin_seq)
            .min();

        reg.txns.retain(|_, ctx| match ctx.status {
            TransactionStatus::Active | TransactionStatus::Failed { .. } => true,
            TransactionStatus::Aborted { .. } => false,
            TransactionStatus::Committed => match (ctx.end_seq, oldest_begin) {
                (Some(end), Some(begin)) => ctx.tracks_dependencies() && end >= begin,
                _ => false,
            },
        });

        let horizon = reg
            .txns
            .values()
            .filter(|c| !c.status.is_terminal())
            .filter_map(|c| c.snapshot_version)
            .min()
            .unwrap_or_else(|| self.store.current_version());
        self.store.prune(horizon);
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
