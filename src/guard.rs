//! Scoped ownership of a transaction handle
//!
//! A [`TxnGuard`] owns one handle for the duration of a scenario. On every
//! exit path (normal return, `?` propagation, panic unwinding) a handle
//! that was not committed or rolled back is rolled back when the guard
//! drops. Rollback takes no cancel token, so cleanup still runs after
//! cancellation.

use harness_core::{CancelToken, StoreResult, Transaction};

use crate::schedule::Actor;

/// Owns a transaction and rolls it back on scope exit unless terminated
pub struct TxnGuard<T: Transaction> {
    txn: T,
    actor: Actor,
}

impl<T: Transaction> TxnGuard<T> {
    /// Take ownership of `txn` on behalf of `actor`
    pub fn new(txn: T, actor: Actor) -> Self {
        Self { txn, actor }
    }

    /// Actor this handle plays in the schedule
    pub fn actor(&self) -> Actor {
        self.actor
    }

    /// Borrow the handle for a statement
    pub fn txn(&mut self) -> &mut T {
        &mut self.txn
    }

    /// Commit the handle
    pub fn commit(&mut self, cx: &CancelToken) -> StoreResult<()> {
        self.txn.commit(cx)
    }

    /// Roll the handle back now rather than at drop
    pub fn rollback(&mut self) -> StoreResult<()> {
        self.txn.rollback()
    }

    /// Whether the handle has been committed or rolled back
    pub fn is_terminated(&self) -> bool {
        self.txn.is_terminated()
    }
}

impl<T: Transaction> Drop for TxnGuard<T> {
    fn drop(&mut self) {
        if self.txn.is_terminated() {
            return;
        }
        match self.txn.rollback() {
            Ok(()) => tracing::debug!(actor = %self.actor, "rolled back on scope exit"),
            Err(e) => tracing::warn!(actor = %self.actor, error = %e, "rollback on scope exit failed"),
        }
    }
}

impl<T: Transaction> std::fmt::Debug for TxnGuard<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxnGuard")
            .field("actor", &self.actor)
            .field("terminated", &self.txn.is_terminated())
            .finish()
    }
}
