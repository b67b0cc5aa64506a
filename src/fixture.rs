//! Seed data every scenario starts from

use harness_core::{
    CancelToken, Entity, Filter, IsolationLevel, Statement, Store, StoreError, Transaction,
};
use serde::{Deserialize, Serialize};

use crate::access::get_balance;
use crate::error::{ScenarioError, ScenarioResult};
use crate::guard::TxnGuard;
use crate::schedule::Actor;

/// Name of the primary seeded entity
pub const ALICE: &str = "Alice";
/// Name of the secondary seeded entity
pub const BOB: &str = "Bob";

/// Starting balances of the two seeded entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Fixture {
    /// Starting balance of Alice
    pub alice: i64,
    /// Starting balance of Bob
    pub bob: i64,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            alice: 100,
            bob: 100,
        }
    }
}

impl Fixture {
    /// Seed rows in name order
    pub fn entities(&self) -> [Entity; 2] {
        [Entity::new(ALICE, self.alice), Entity::new(BOB, self.bob)]
    }

    /// Replace the whole table with the seed rows
    ///
    /// Runs as one read-committed transaction: deletes every row, then
    /// inserts the seed. Any failure other than cancellation is a setup
    /// fault.
    pub fn reset<S: Store>(&self, store: &S, cx: &CancelToken) -> ScenarioResult<()> {
        let seed = |e: StoreError| match e {
            StoreError::Cancelled => ScenarioError::Cancelled,
            other => ScenarioError::Setup(format!("fixture reset failed: {}", other)),
        };

        let txn = store
            .begin(cx, IsolationLevel::ReadCommitted)
            .map_err(seed)?;
        let mut guard = TxnGuard::new(txn, Actor::A);
        guard
            .txn()
            .exec(cx, &Statement::Delete(Filter::All))
            .map_err(seed)?;
        for entity in self.entities() {
            guard
                .txn()
                .exec(cx, &Statement::Insert(entity))
                .map_err(seed)?;
        }
        guard.commit(cx).map_err(seed)?;

        tracing::trace!(alice = self.alice, bob = self.bob, "fixture reset");
        Ok(())
    }
}

/// Committed balance of `name`, read in a fresh read-committed transaction
pub fn balance<S: Store>(store: &S, cx: &CancelToken, name: &str) -> ScenarioResult<i64> {
    let txn = store.begin(cx, IsolationLevel::ReadCommitted)?;
    let mut guard = TxnGuard::new(txn, Actor::A);
    let entity = get_balance(guard.txn(), cx, name)?;
    guard.commit(cx)?;
    Ok(entity.value)
}
