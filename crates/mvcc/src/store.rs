//! Store Client implementation for the reference store
//!
//! [`MvccStore`] is a cheap-to-clone handle on a shared
//! [`TransactionManager`]; [`MvccTransaction`] is the handle returned by
//! `begin`. Dropping a handle that was never committed or rolled back rolls
//! it back.

use std::sync::Arc;

use harness_core::{
    CancelToken, Entity, IsolationLevel, Statement, Store, StoreError, StoreResult, Transaction,
};

use crate::manager::TransactionManager;
use crate::transaction::TransactionStatus;

/// In-memory multi-version store
///
/// # Example
///
/// ```
/// use harness_core::{CancelToken, Entity, IsolationLevel, Statement, Store, Transaction};
/// use harness_mvcc::MvccStore;
///
/// let store = MvccStore::new();
/// let cx = CancelToken::new();
/// let mut txn = store.begin(&cx, IsolationLevel::ReadCommitted).unwrap();
/// txn.exec(&cx, &Statement::Insert(Entity::new("Alice", 100))).unwrap();
/// txn.commit(&cx).unwrap();
/// assert_eq!(store.committed_value("Alice"), Some(100));
/// ```
#[derive(Clone, Default)]
pub struct MvccStore {
    manager: Arc<TransactionManager>,
}

impl MvccStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest commit version applied so far
    pub fn current_version(&self) -> u64 {
        self.manager.store().current_version()
    }

    /// Latest committed value of `name`
    pub fn committed_value(&self, name: &str) -> Option<i64> {
        let store = self.manager.store();
        store.get_at(name, store.current_version()).map(|vv| vv.value)
    }

    /// Number of transactions neither committed nor rolled back
    pub fn active_transactions(&self) -> usize {
        self.manager.active_count()
    }

    /// Number of row locks currently held
    pub fn held_locks(&self) -> usize {
        self.manager.lock_count()
    }

    /// Status of a transaction by id, None once its record is pruned
    pub fn transaction_status(&self, txn_id: u64) -> Option<TransactionStatus> {
        self.manager.status(txn_id)
    }
}

impl std::fmt::Debug for MvccStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MvccStore")
            .field("version", &self.current_version())
            .field("active", &self.active_transactions())
            .finish()
    }
}

impl Store for MvccStore {
    type Txn = MvccTransaction;

    fn begin(&self, cx: &CancelToken, isolation: IsolationLevel) -> StoreResult<MvccTransaction> {
        cx.check()?;
        let txn_id = self.manager.begin(isolation);
        Ok(MvccTransaction {
            txn_id,
            isolation,
            manager: Arc::clone(&self.manager),
            terminated: false,
        })
    }
}

/// Transaction handle on an [`MvccStore`]
pub struct MvccTransaction {
    txn_id: u64,
    isolation: IsolationLevel,
    manager: Arc<TransactionManager>,
    terminated: bool,
}

impl MvccTransaction {
    /// Transaction id inside the store
    pub fn id(&self) -> u64 {
        self.txn_id
    }

    fn ensure_open(&self) -> StoreResult<()> {
        if self.terminated {
            Err(StoreError::TransactionClosed)
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for MvccTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MvccTransaction")
            .field("txn_id", &self.txn_id)
            .field("isolation", &self.isolation)
            .field("terminated", &self.terminated)
            .finish()
    }
}

impl Transaction for MvccTransaction {
    fn isolation(&self) -> IsolationLevel {
        self.isolation
    }

    fn exec(&mut self, cx: &CancelToken, statement: &Statement) -> StoreResult<u64> {
        cx.check()?;
        self.ensure_open()?;
        self.manager.exec(self.txn_id, statement)
    }

    fn query(&mut self, cx: &CancelToken, statement: &Statement) -> StoreResult<Vec<Entity>> {
        cx.check()?;
        self.ensure_open()?;
        match statement {
            Statement::Select(filter) => self.manager.query(self.txn_id, filter),
            other => Err(StoreError::Unsupported(format!(
                "{} must go through exec",
                other
            ))),
        }
    }

    fn commit(&mut self, cx: &CancelToken) -> StoreResult<()> {
        cx.check()?;
        self.ensure_open()?;
        // Success or failure, the store has terminated the transaction
        self.terminated = true;
        self.manager.commit(self.txn_id).map(|_| ())
    }

    fn rollback(&mut self) -> StoreResult<()> {
        if !self.terminated {
            self.terminated = true;
            self.manager.rollback(self.txn_id);
        }
        Ok(())
    }

    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl Drop for MvccTransaction {
    fn drop(&mut self) {
        if !self.terminated {
            self.manager.rollback(self.txn_id);
        }
    }
}
