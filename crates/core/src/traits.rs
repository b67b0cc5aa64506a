//! Store Client boundary
//!
//! This module defines the [`Store`] and [`Transaction`] traits that the
//! anomaly scenarios are written against. Any transactional store that can
//! open two independent handles at a chosen isolation level can be plugged
//! in behind them.

use crate::cancel::CancelToken;
use crate::error::StoreResult;
use crate::types::{Entity, IsolationLevel, Statement};

/// A transactional store that hands out transaction handles
///
/// Thread safety: a store is shared between concurrent harness runs, so
/// `begin` must be callable from multiple threads and must support at least
/// two handles open at the same time.
pub trait Store: Send + Sync {
    /// Transaction handle type produced by this store
    type Txn: Transaction;

    /// Open a transaction at the given isolation level
    ///
    /// The level is opaque configuration; the store alone decides what it
    /// means.
    ///
    /// # Errors
    ///
    /// Returns an error if the token has fired or the store cannot open a
    /// transaction.
    fn begin(&self, cx: &CancelToken, isolation: IsolationLevel) -> StoreResult<Self::Txn>;
}

/// An open transaction handle
///
/// A handle must be terminated exactly once, by [`commit`](Transaction::commit)
/// or [`rollback`](Transaction::rollback). Rolling back an already
/// terminated handle is a no-op so that scoped cleanup can call it
/// unconditionally.
pub trait Transaction {
    /// Isolation level the handle was opened with
    fn isolation(&self) -> IsolationLevel;

    /// Execute a write statement (`Update`, `Insert`, `Delete`)
    ///
    /// Returns the number of rows affected.
    ///
    /// # Errors
    ///
    /// Under snapshot or serializable levels the store may reject the write
    /// with [`StoreError::Conflict`](crate::StoreError::Conflict).
    fn exec(&mut self, cx: &CancelToken, statement: &Statement) -> StoreResult<u64>;

    /// Execute a `Select` statement
    ///
    /// Rows are returned ordered by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement is not a `Select` or the read fails.
    fn query(&mut self, cx: &CancelToken, statement: &Statement) -> StoreResult<Vec<Entity>>;

    /// Commit the transaction
    ///
    /// # Errors
    ///
    /// A failed commit leaves the handle terminated (rolled back by the
    /// store). Serializable stores may report a conflict here.
    fn commit(&mut self, cx: &CancelToken) -> StoreResult<()>;

    /// Roll back the transaction
    ///
    /// Does not take a cancellation token: cleanup must run even after the
    /// caller has cancelled.
    fn rollback(&mut self) -> StoreResult<()>;

    /// Whether the handle has been committed or rolled back
    fn is_terminated(&self) -> bool;
}

/// Lending a handle: a scenario given `&mut txn` drives and terminates the
/// caller's handle, and the caller can still inspect it afterwards.
impl<T: Transaction + ?Sized> Transaction for &mut T {
    fn isolation(&self) -> IsolationLevel {
        (**self).isolation()
    }

    fn exec(&mut self, cx: &CancelToken, statement: &Statement) -> StoreResult<u64> {
        (**self).exec(cx, statement)
    }

    fn query(&mut self, cx: &CancelToken, statement: &Statement) -> StoreResult<Vec<Entity>> {
        (**self).query(cx, statement)
    }

    fn commit(&mut self, cx: &CancelToken) -> StoreResult<()> {
        (**self).commit(cx)
    }

    fn rollback(&mut self) -> StoreResult<()> {
        (**self).rollback()
    }

    fn is_terminated(&self) -> bool {
        (**self).is_terminated()
    }
}
