//! Anomaly Matrix Tests
//!
//! Runs the five scenarios against the reference store at every isolation
//! level and checks:
//! - the verdict or conflict each level documents
//! - both handles are terminated on every path
//! - repeated runs over a reset fixture agree
//! - faults and cancellation surface as distinguishable errors

use harness_core::{
    CancelToken, ConflictKind, Entity, IsolationLevel, Statement, Store, Transaction,
    SERIALIZATION_FAILURE,
};
use harness_mvcc::{MvccStore, MvccTransaction};
use isolation_harness::{
    balance, dirty_read, documented_guarantee, lost_update, non_repeatable_read, phantom_read,
    run_scenario, write_skew, Anomaly, Fixture, Harness, HarnessConfig, Outcome, ScenarioError,
    ScenarioParams, ALICE, BOB,
};
use proptest::prelude::*;

// ============================================================================
// Test Helpers
// ============================================================================

fn seeded() -> (MvccStore, CancelToken) {
    let store = MvccStore::new();
    let cx = CancelToken::new();
    Fixture::default().reset(&store, &cx).unwrap();
    (store, cx)
}

fn pair(store: &MvccStore, cx: &CancelToken, level: IsolationLevel) -> (MvccTransaction, MvccTransaction) {
    (store.begin(cx, level).unwrap(), store.begin(cx, level).unwrap())
}

fn run(level: IsolationLevel, anomaly: Anomaly) -> Result<bool, ScenarioError> {
    let (store, cx) = seeded();
    let (tx1, tx2) = pair(&store, &cx, level);
    let result = run_scenario(anomaly, tx1, tx2, &cx, &ScenarioParams::default());
    assert_eq!(store.active_transactions(), 0, "{} at {} leaked", anomaly, level);
    assert_eq!(store.held_locks(), 0, "{} at {} left locks", anomaly, level);
    result
}

fn conflict_kind(result: Result<bool, ScenarioError>) -> ConflictKind {
    match result {
        Err(ScenarioError::Conflict(c)) => {
            assert_eq!(c.code(), SERIALIZATION_FAILURE);
            c.kind()
        }
        other => panic!("expected a conflict, got {:?}", other),
    }
}

// ============================================================================
// Read Committed
// ============================================================================

mod read_committed {
    use super::*;

    const LEVEL: IsolationLevel = IsolationLevel::ReadCommitted;

    #[test]
    fn dirty_read_is_prevented() {
        assert!(!run(LEVEL, Anomaly::DirtyRead).unwrap());
    }

    #[test]
    fn non_repeatable_read_is_observed() {
        assert!(run(LEVEL, Anomaly::NonRepeatableRead).unwrap());
    }

    #[test]
    fn phantom_read_is_observed() {
        assert!(run(LEVEL, Anomaly::PhantomRead).unwrap());
    }

    #[test]
    fn lost_update_is_observed() {
        assert!(run(LEVEL, Anomaly::LostUpdate).unwrap());
    }

    #[test]
    fn write_skew_is_observed() {
        assert!(run(LEVEL, Anomaly::WriteSkew).unwrap());
    }

    #[test]
    fn lost_update_overwrites_committed_value() {
        let (store, cx) = seeded();
        let (tx1, tx2) = pair(&store, &cx, LEVEL);
        let params = ScenarioParams {
            lost_update_first_delta: 50,
            lost_update_second_delta: 100,
            ..ScenarioParams::default()
        };

        assert!(lost_update(tx1, tx2, &cx, &params).unwrap());
        // A's +50 is gone: 100 + 100, not 100 + 50 + 100
        assert_eq!(balance(&store, &cx, ALICE).unwrap(), 200);
    }

    #[test]
    fn write_skew_commits_both_rows() {
        let (store, cx) = seeded();
        let (tx1, tx2) = pair(&store, &cx, LEVEL);
        assert!(write_skew(tx1, tx2, &cx, &ScenarioParams::default()).unwrap());
        assert_eq!(balance(&store, &cx, ALICE).unwrap(), 150);
        assert_eq!(balance(&store, &cx, BOB).unwrap(), 150);
    }

    #[test]
    fn dirty_write_is_never_committed() {
        let (store, cx) = seeded();
        let (tx1, tx2) = pair(&store, &cx, LEVEL);
        assert!(!dirty_read(tx1, tx2, &cx, &ScenarioParams::default()).unwrap());
        assert_eq!(balance(&store, &cx, ALICE).unwrap(), 100);
    }
}

// ============================================================================
// Repeatable Read
// ============================================================================

mod repeatable_read {
    use super::*;

    const LEVEL: IsolationLevel = IsolationLevel::RepeatableRead;

    #[test]
    fn read_anomalies_are_prevented() {
        assert!(!run(LEVEL, Anomaly::DirtyRead).unwrap());
        assert!(!run(LEVEL, Anomaly::NonRepeatableRead).unwrap());
        assert!(!run(LEVEL, Anomaly::PhantomRead).unwrap());
    }

    #[test]
    fn lost_update_raises_write_write_conflict() {
        assert_eq!(
            conflict_kind(run(LEVEL, Anomaly::LostUpdate)),
            ConflictKind::WriteWrite
        );
    }

    #[test]
    fn lost_update_conflict_message_is_untouched() {
        let (store, cx) = seeded();
        let (tx1, tx2) = pair(&store, &cx, LEVEL);
        let err = lost_update(tx1, tx2, &cx, &ScenarioParams::default()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not serialize access due to concurrent update (SQLSTATE 40001)"
        );
        // A's update survives
        assert_eq!(balance(&store, &cx, ALICE).unwrap(), 150);
    }

    #[test]
    fn write_skew_is_not_prevented() {
        assert!(run(LEVEL, Anomaly::WriteSkew).unwrap());
    }

    #[test]
    fn non_repeatable_read_still_commits_both() {
        let (store, cx) = seeded();
        let (tx1, tx2) = pair(&store, &cx, LEVEL);
        assert!(!non_repeatable_read(tx1, tx2, &cx, &ScenarioParams::default()).unwrap());
        assert_eq!(balance(&store, &cx, ALICE).unwrap(), 150);
    }
}

// ============================================================================
// Serializable
// ============================================================================

mod serializable {
    use super::*;

    const LEVEL: IsolationLevel = IsolationLevel::Serializable;

    #[test]
    fn read_anomalies_are_prevented() {
        assert!(!run(LEVEL, Anomaly::DirtyRead).unwrap());
        assert!(!run(LEVEL, Anomaly::NonRepeatableRead).unwrap());
        assert!(!run(LEVEL, Anomaly::PhantomRead).unwrap());
    }

    #[test]
    fn lost_update_raises_write_write_conflict() {
        assert_eq!(
            conflict_kind(run(LEVEL, Anomaly::LostUpdate)),
            ConflictKind::WriteWrite
        );
    }

    #[test]
    fn write_skew_raises_read_write_conflict() {
        assert_eq!(
            conflict_kind(run(LEVEL, Anomaly::WriteSkew)),
            ConflictKind::ReadWrite
        );
    }

    #[test]
    fn write_skew_and_lost_update_categories_differ() {
        assert_ne!(
            conflict_kind(run(LEVEL, Anomaly::WriteSkew)),
            conflict_kind(run(LEVEL, Anomaly::LostUpdate))
        );
    }

    #[test]
    fn write_skew_keeps_first_commit_only() {
        let (store, cx) = seeded();
        let (tx1, tx2) = pair(&store, &cx, LEVEL);
        assert!(write_skew(tx1, tx2, &cx, &ScenarioParams::default()).is_err());
        assert_eq!(balance(&store, &cx, ALICE).unwrap(), 100);
        assert_eq!(balance(&store, &cx, BOB).unwrap(), 150);
    }

    #[test]
    fn phantom_read_with_custom_predicate() {
        let (store, cx) = seeded();
        let (tx1, tx2) = pair(&store, &cx, LEVEL);
        let params = ScenarioParams {
            phantom_predicate: harness_core::Predicate::AtLeast(500),
            phantom_value: 500,
            ..ScenarioParams::default()
        };
        assert!(!phantom_read(tx1, tx2, &cx, &params).unwrap());
    }
}

// ============================================================================
// Termination and Faults
// ============================================================================

mod termination {
    use super::*;

    #[test]
    fn every_scenario_terminates_borrowed_handles() {
        for level in IsolationLevel::ALL {
            for anomaly in Anomaly::ALL {
                let (store, cx) = seeded();
                let (mut tx1, mut tx2) = pair(&store, &cx, level);
                let _ = run_scenario(anomaly, &mut tx1, &mut tx2, &cx, &ScenarioParams::default());
                assert!(tx1.is_terminated(), "{} at {}: tx1 open", anomaly, level);
                assert!(tx2.is_terminated(), "{} at {}: tx2 open", anomaly, level);
                assert_eq!(store.active_transactions(), 0);
            }
        }
    }

    #[test]
    fn missing_seed_is_setup_fault() {
        let store = MvccStore::new();
        let cx = CancelToken::new();
        for anomaly in [Anomaly::DirtyRead, Anomaly::LostUpdate, Anomaly::WriteSkew] {
            let (tx1, tx2) = pair(&store, &cx, IsolationLevel::ReadCommitted);
            let err = run_scenario(anomaly, tx1, tx2, &cx, &ScenarioParams::default())
                .unwrap_err();
            assert!(matches!(err, ScenarioError::Setup(_)), "{}: {:?}", anomaly, err);
            assert!(err.is_fatal());
        }
        assert_eq!(store.active_transactions(), 0);
    }

    #[test]
    fn missing_secondary_row_is_setup_fault() {
        let store = MvccStore::new();
        let cx = CancelToken::new();
        let mut seed = store.begin(&cx, IsolationLevel::ReadCommitted).unwrap();
        seed.exec(&cx, &Statement::Insert(Entity::new(ALICE, 100)))
            .unwrap();
        seed.commit(&cx).unwrap();

        let (tx1, tx2) = pair(&store, &cx, IsolationLevel::Serializable);
        assert!(matches!(
            write_skew(tx1, tx2, &cx, &ScenarioParams::default()),
            Err(ScenarioError::Setup(_))
        ));
        assert_eq!(store.active_transactions(), 0);
    }

    #[test]
    fn cancellation_unwinds_and_rolls_back() {
        let (store, cx) = seeded();
        let (tx1, tx2) = pair(&store, &cx, IsolationLevel::RepeatableRead);
        cx.cancel();
        assert_eq!(
            lost_update(tx1, tx2, &cx, &ScenarioParams::default()).unwrap_err(),
            ScenarioError::Cancelled
        );
        assert_eq!(store.active_transactions(), 0);
        assert_eq!(store.committed_value(ALICE), Some(100));
    }

    /// Cancels `cx` as soon as the wrapped handle's first write succeeds
    struct CancelAfterWrite {
        inner: MvccTransaction,
        cancel: Option<CancelToken>,
    }

    impl Transaction for CancelAfterWrite {
        fn isolation(&self) -> IsolationLevel {
            self.inner.isolation()
        }

        fn exec(
            &mut self,
            cx: &CancelToken,
            statement: &Statement,
        ) -> harness_core::StoreResult<u64> {
            let affected = self.inner.exec(cx, statement)?;
            if let Some(token) = self.cancel.take() {
                token.cancel();
            }
            Ok(affected)
        }

        fn query(
            &mut self,
            cx: &CancelToken,
            statement: &Statement,
        ) -> harness_core::StoreResult<Vec<Entity>> {
            self.inner.query(cx, statement)
        }

        fn commit(&mut self, cx: &CancelToken) -> harness_core::StoreResult<()> {
            self.inner.commit(cx)
        }

        fn rollback(&mut self) -> harness_core::StoreResult<()> {
            self.inner.rollback()
        }

        fn is_terminated(&self) -> bool {
            self.inner.is_terminated()
        }
    }

    #[test]
    fn cancellation_after_uncommitted_write_rolls_it_back() {
        for level in IsolationLevel::ALL {
            let (store, cx) = seeded();
            let (tx1, tx2) = pair(&store, &cx, level);
            let a = CancelAfterWrite {
                inner: tx1,
                cancel: Some(cx.clone()),
            };
            let b = CancelAfterWrite {
                inner: tx2,
                cancel: None,
            };

            assert_eq!(
                lost_update(a, b, &cx, &ScenarioParams::default()).unwrap_err(),
                ScenarioError::Cancelled,
                "{}",
                level
            );
            assert!(cx.is_cancelled());
            assert_eq!(store.active_transactions(), 0, "{}", level);
            assert_eq!(store.held_locks(), 0, "{}", level);
            assert_eq!(store.committed_value(ALICE), Some(100), "{}", level);
        }
    }

    #[test]
    fn open_writer_on_the_row_yields_lock_conflict() {
        let (store, cx) = seeded();
        let mut blocker = store.begin(&cx, IsolationLevel::ReadCommitted).unwrap();
        blocker
            .exec(&cx, &Statement::update_by_name(ALICE, 1))
            .unwrap();

        let (tx1, tx2) = pair(&store, &cx, IsolationLevel::ReadCommitted);
        let err = dirty_read(tx1, tx2, &cx, &ScenarioParams::default()).unwrap_err();
        assert_eq!(err.conflict_kind(), Some(ConflictKind::LockNotAvailable));
        blocker.rollback().unwrap();
        assert_eq!(store.active_transactions(), 0);
    }
}

// ============================================================================
// Matrix and Idempotence
// ============================================================================

mod matrix {
    use super::*;

    #[test]
    fn reference_store_matches_every_guarantee() {
        let config = HarnessConfig {
            repetitions: 5,
            ..HarnessConfig::default()
        };
        let harness = Harness::new(MvccStore::new(), config);
        let report = harness.run_matrix();
        assert!(report.is_clean(), "{}", report);
        assert_eq!(harness.store().active_transactions(), 0);

        let cell = report
            .cell(IsolationLevel::Serializable, Anomaly::WriteSkew)
            .unwrap();
        assert_eq!(
            cell.agreed(),
            Some(Outcome::PreventedWithError(ConflictKind::ReadWrite))
        );
    }

    #[test]
    fn run_once_records_lost_update_value() {
        let harness = Harness::new(MvccStore::new(), HarnessConfig::default());
        for _ in 0..3 {
            let record = harness.run_once(IsolationLevel::ReadCommitted, Anomaly::LostUpdate);
            assert_eq!(record.outcome, Some(Outcome::Observed));
            assert_eq!(record.final_value, Some(200));
        }
    }

    #[test]
    fn unseedable_fixture_is_reported_as_fault() {
        let store = MvccStore::new();
        let cx = CancelToken::new();
        Fixture::default().reset(&store, &cx).unwrap();
        let mut blocker = store.begin(&cx, IsolationLevel::ReadCommitted).unwrap();
        blocker
            .exec(&cx, &Statement::update_by_name(BOB, 0))
            .unwrap();

        let config = HarnessConfig {
            levels: vec![IsolationLevel::ReadCommitted],
            anomalies: vec![Anomaly::DirtyRead],
            repetitions: 1,
            ..HarnessConfig::default()
        };
        let report = Harness::new(store.clone(), config).run_matrix();
        assert!(!report.is_clean());
        assert_eq!(report.cells[0].faults.len(), 1);
        assert!(report.cells[0].faults[0].starts_with("setup fault"));
        blocker.rollback().unwrap();
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn verdicts_are_idempotent(
            alice in -200i64..1_000,
            bob in -200i64..1_000,
            level_idx in 0usize..3,
            anomaly_idx in 0usize..5,
        ) {
            let level = IsolationLevel::ALL[level_idx];
            let anomaly = Anomaly::ALL[anomaly_idx];
            let store = MvccStore::new();
            let cx = CancelToken::new();
            let fixture = Fixture { alice, bob };

            let mut outcomes = Vec::new();
            for _ in 0..3 {
                fixture.reset(&store, &cx).unwrap();
                let (tx1, tx2) = pair(&store, &cx, level);
                let result = run_scenario(anomaly, tx1, tx2, &cx, &ScenarioParams::default());
                outcomes.push(Outcome::classify(&result).unwrap());
            }
            prop_assert!(outcomes.iter().all(|o| *o == outcomes[0]));
            prop_assert_eq!(store.active_transactions(), 0);

            let config = HarnessConfig { fixture, ..HarnessConfig::default() };
            if config.validate().is_ok() {
                prop_assert_eq!(outcomes[0], documented_guarantee(anomaly, level));
            }
        }

        #[test]
        fn lost_update_keeps_only_second_delta(
            seed in -1_000i64..1_000,
            first in -500i64..500,
            second in -500i64..500,
        ) {
            let store = MvccStore::new();
            let cx = CancelToken::new();
            Fixture { alice: seed, bob: 0 }.reset(&store, &cx).unwrap();
            let params = ScenarioParams {
                lost_update_first_delta: first,
                lost_update_second_delta: second,
                ..ScenarioParams::default()
            };

            let (tx1, tx2) = pair(&store, &cx, IsolationLevel::ReadCommitted);
            prop_assert!(lost_update(tx1, tx2, &cx, &params).unwrap());
            prop_assert_eq!(balance(&store, &cx, ALICE).unwrap(), seed + second);
        }
    }
}
