//! Balance access helpers used by every scenario
//!
//! Thin wrappers over [`Transaction`] that turn "no such row" into a setup
//! fault and hand conflicts back untouched.

use harness_core::{CancelToken, Entity, Predicate, Statement, Transaction};

use crate::error::{ScenarioError, ScenarioResult};

/// Read one entity by name
///
/// # Errors
///
/// `Setup` if no row with that name is visible to the transaction.
pub fn get_balance<T: Transaction>(
    txn: &mut T,
    cx: &CancelToken,
    name: &str,
) -> ScenarioResult<Entity> {
    txn.query(cx, &Statement::select_by_name(name))?
        .into_iter()
        .next()
        .ok_or_else(|| ScenarioError::Setup(format!("entity '{}' not found", name)))
}

/// Overwrite the balance of one entity
///
/// # Errors
///
/// `Setup` if the update touched no row. Conflicts come back as
/// [`ScenarioError::Conflict`] with the store's error inside.
pub fn set_balance<T: Transaction>(
    txn: &mut T,
    cx: &CancelToken,
    name: &str,
    value: i64,
) -> ScenarioResult<()> {
    let updated = txn.exec(cx, &Statement::update_by_name(name, value))?;
    if updated == 0 {
        return Err(ScenarioError::Setup(format!(
            "update of '{}' matched no rows",
            name
        )));
    }
    Ok(())
}

/// All entities whose balance satisfies `predicate`, ordered by name
pub fn balances_matching<T: Transaction>(
    txn: &mut T,
    cx: &CancelToken,
    predicate: Predicate,
) -> ScenarioResult<Vec<Entity>> {
    Ok(txn.query(cx, &Statement::select_where(predicate))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::{ConflictError, IsolationLevel, Store, StoreError};
    use harness_mvcc::MvccStore;

    fn seeded() -> (MvccStore, CancelToken) {
        let store = MvccStore::new();
        let cx = CancelToken::new();
        let mut seed = store.begin(&cx, IsolationLevel::ReadCommitted).unwrap();
        seed.exec(&cx, &Statement::Insert(Entity::new("Alice", 100)))
            .unwrap();
        seed.commit(&cx).unwrap();
        (store, cx)
    }

    #[test]
    fn test_get_balance() {
        let (store, cx) = seeded();
        let mut txn = store.begin(&cx, IsolationLevel::ReadCommitted).unwrap();
        assert_eq!(
            get_balance(&mut txn, &cx, "Alice").unwrap(),
            Entity::new("Alice", 100)
        );
    }

    #[test]
    fn test_missing_entity_is_setup_fault() {
        let (store, cx) = seeded();
        let mut txn = store.begin(&cx, IsolationLevel::ReadCommitted).unwrap();
        assert!(matches!(
            get_balance(&mut txn, &cx, "Bob"),
            Err(ScenarioError::Setup(_))
        ));
        assert!(matches!(
            set_balance(&mut txn, &cx, "Bob", 1),
            Err(ScenarioError::Setup(_))
        ));
    }

    #[test]
    fn test_set_balance_conflict_is_propagated() {
        let (store, cx) = seeded();
        let mut a = store.begin(&cx, IsolationLevel::RepeatableRead).unwrap();
        let mut b = store.begin(&cx, IsolationLevel::RepeatableRead).unwrap();
        get_balance(&mut a, &cx, "Alice").unwrap();
        get_balance(&mut b, &cx, "Alice").unwrap();
        set_balance(&mut a, &cx, "Alice", 150).unwrap();
        a.commit(&cx).unwrap();

        let err = set_balance(&mut b, &cx, "Alice", 200).unwrap_err();
        assert_eq!(
            err,
            ScenarioError::Conflict(ConflictError::concurrent_update())
        );
    }

    #[test]
    fn test_balances_matching_predicate() {
        let (store, cx) = seeded();
        let mut txn = store.begin(&cx, IsolationLevel::ReadCommitted).unwrap();
        assert!(balances_matching(&mut txn, &cx, Predicate::LessThan(0))
            .unwrap()
            .is_empty());
        assert_eq!(
            balances_matching(&mut txn, &cx, Predicate::AtLeast(100))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_cancelled_read() {
        let (store, cx) = seeded();
        let mut txn = store.begin(&cx, IsolationLevel::ReadCommitted).unwrap();
        cx.cancel();
        assert_eq!(
            get_balance(&mut txn, &cx, "Alice").unwrap_err(),
            ScenarioError::Cancelled
        );
        assert_eq!(txn.rollback(), Ok::<(), StoreError>(()));
    }
}
