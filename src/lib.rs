//! Isolation harness: provoke concurrency anomalies, report what happened
//!
//! The harness opens two transactions against a store, interleaves their
//! statements in a fixed order, and reports whether the interleaving
//! produced a dirty read, non-repeatable read, phantom read, lost update or
//! write skew. Running every anomaly at every isolation level yields an
//! empirical characterization of the store to compare against what each
//! level documents.
//!
//! # Quick Start
//!
//! ```
//! use harness_core::{CancelToken, IsolationLevel, Store};
//! use harness_mvcc::MvccStore;
//! use isolation_harness::{lost_update, Fixture, ScenarioParams};
//!
//! let store = MvccStore::new();
//! let cx = CancelToken::new();
//! Fixture::default().reset(&store, &cx).unwrap();
//!
//! let tx1 = store.begin(&cx, IsolationLevel::ReadCommitted).unwrap();
//! let tx2 = store.begin(&cx, IsolationLevel::ReadCommitted).unwrap();
//! let lost = lost_update(tx1, tx2, &cx, &ScenarioParams::default()).unwrap();
//! assert!(lost);
//! assert_eq!(store.committed_value("Alice"), Some(200));
//! ```
//!
//! # Architecture
//!
//! - [`schedule`]: steps, the executor, recorded observations
//! - [`scenarios`]: the five anomaly schedules and their verdicts
//! - [`guard`]: rollback of unterminated handles on scope exit
//! - [`classify`]: outcomes and the documented guarantee table
//! - [`runner`]: repeated matrix runs and reports
//!
//! The store itself sits behind the [`harness_core::Store`] and
//! [`harness_core::Transaction`] traits.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod access;
pub mod classify;
pub mod config;
pub mod error;
pub mod fixture;
pub mod guard;
pub mod runner;
pub mod scenarios;
pub mod schedule;

pub use access::{balances_matching, get_balance, set_balance};
pub use classify::{documented_guarantee, Outcome};
pub use config::{HarnessConfig, CONFIG_FILE_NAME};
pub use error::{ConfigError, ScenarioError, ScenarioResult};
pub use fixture::{balance, Fixture, ALICE, BOB};
pub use guard::TxnGuard;
pub use runner::{Cell, Harness, MatrixReport, RunRecord};
pub use scenarios::{
    dirty_read, lost_update, non_repeatable_read, phantom_read, run_scenario, write_skew,
    Anomaly, Scenario, ScenarioParams, Verdict,
};
pub use schedule::{Actor, Observation, Observations, Op, Schedule, Slot, Step, ValueExpr};
