//! The five anomaly scenarios
//!
//! Each anomaly is a [`Scenario`]: a [`Schedule`] of steps for transactions
//! A and B plus a [`Verdict`] over what the reads observed. The scenario
//! owns both handles for the duration of the run and leaves them
//! terminated on every exit path.
//!
//! | Anomaly             | Schedule                                              | Observed when                 |
//! |---------------------|-------------------------------------------------------|-------------------------------|
//! | dirty read          | A writes K; B reads K                                 | B sees A's uncommitted value  |
//! | non-repeatable read | A reads K; B writes K, commits; A reads K, commits     | A's two reads differ          |
//! | phantom read        | A reads range P; B moves a row into P, commits; A re-reads P | P was empty, then is not |
//! | lost update         | A, B read K; A writes K+δ1, commits; B writes K+δ2, commits | every step succeeds     |
//! | write skew          | A reads X; B reads Y; A writes Y, commits; B writes X, commits | every step succeeds  |
//!
//! A conflict raised by the store is returned as
//! [`ScenarioError::Conflict`](crate::ScenarioError::Conflict) exactly as the store produced it.

use std::fmt;
use std::str::FromStr;

use harness_core::{CancelToken, Predicate, Transaction};
use serde::{Deserialize, Serialize};

use crate::error::ScenarioResult;
use crate::fixture::{ALICE, BOB};
use crate::guard::TxnGuard;
use crate::schedule::{Actor, Observations, Schedule, Slot};

/// Concurrency anomaly the harness can provoke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Anomaly {
    /// Reading another transaction's uncommitted write
    DirtyRead,
    /// Two reads of one row in one transaction disagree
    NonRepeatableRead,
    /// A range predicate's result set changes within one transaction
    PhantomRead,
    /// A committed update is overwritten by a stale read-modify-write
    LostUpdate,
    /// Two transactions write disjoint rows based on each other's stale reads
    WriteSkew,
}

impl Anomaly {
    /// Every anomaly, in report order
    pub const ALL: [Anomaly; 5] = [
        Anomaly::DirtyRead,
        Anomaly::NonRepeatableRead,
        Anomaly::PhantomRead,
        Anomaly::LostUpdate,
        Anomaly::WriteSkew,
    ];

    /// Stable name used in config files and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            Anomaly::DirtyRead => "dirty-read",
            Anomaly::NonRepeatableRead => "non-repeatable-read",
            Anomaly::PhantomRead => "phantom-read",
            Anomaly::LostUpdate => "lost-update",
            Anomaly::WriteSkew => "write-skew",
        }
    }

    /// Whether both transactions write, so the second writer can be rejected
    ///
    /// Only these scenarios leave a committed value worth reporting.
    pub fn writes_concurrently(&self) -> bool {
        matches!(self, Anomaly::LostUpdate | Anomaly::WriteSkew)
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Anomaly {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('_', "-");
        Anomaly::ALL
            .into_iter()
            .find(|a| a.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "unknown anomaly '{}', expected one of: {}",
                    s,
                    Anomaly::ALL.map(|a| a.as_str()).join(", ")
                )
            })
    }
}

/// Values the scenarios write and the predicate the phantom read uses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioParams {
    /// Row every single-row scenario works on
    pub primary: String,
    /// Second row used by write skew
    pub secondary: String,
    /// Uncommitted value A writes in the dirty read
    pub dirty_value: i64,
    /// Value B commits between A's reads in the non-repeatable read
    pub committed_value: i64,
    /// Value B commits to move the primary row into the phantom predicate
    pub phantom_value: i64,
    /// Range predicate re-evaluated by the phantom read
    pub phantom_predicate: Predicate,
    /// Amount A adds in the lost update
    pub lost_update_first_delta: i64,
    /// Amount B adds in the lost update
    pub lost_update_second_delta: i64,
    /// Amount both transactions add in the write skew
    pub write_skew_delta: i64,
}

impl Default for ScenarioParams {
    fn default() -> Self {
        Self {
            primary: ALICE.to_string(),
            secondary: BOB.to_string(),
            dirty_value: 150,
            committed_value: 150,
            phantom_value: -100,
            phantom_predicate: Predicate::LessThan(0),
            lost_update_first_delta: 50,
            lost_update_second_delta: 100,
            write_skew_delta: 50,
        }
    }
}

impl ScenarioParams {
    /// Check the parameters can provoke every anomaly
    ///
    /// The phantom value must satisfy the phantom predicate, and the two
    /// rows of the write skew must differ.
    pub fn validate(&self) -> Result<(), String> {
        if self.primary.is_empty() || self.secondary.is_empty() {
            return Err("primary and secondary names must not be empty".into());
        }
        if self.primary == self.secondary {
            return Err(format!(
                "write skew needs two rows, both are named '{}'",
                self.primary
            ));
        }
        if !self.phantom_predicate.matches(self.phantom_value) {
            return Err(format!(
                "phantom value {} does not satisfy '{}'",
                self.phantom_value, self.phantom_predicate
            ));
        }
        Ok(())
    }
}

/// Rule deciding whether the recorded observations show the anomaly
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Observed when the point read in `slot` returned `value`
    ReadsValue {
        /// Slot of the point read
        slot: Slot,
        /// Value that proves the anomaly
        value: i64,
    },
    /// Observed when two point reads of the same row differ
    ReadsDiffer {
        /// First read
        first: Slot,
        /// Second read
        second: Slot,
    },
    /// Observed when the first range read was empty and the second was not
    RangeGrows {
        /// First range read
        first: Slot,
        /// Second range read
        second: Slot,
    },
    /// Observed when every step of the schedule succeeded
    Completes,
}

impl Verdict {
    /// Apply the rule to a finished run
    pub fn evaluate(&self, observations: &Observations) -> ScenarioResult<bool> {
        match self {
            Verdict::ReadsValue { slot, value } => Ok(observations.row(slot)?.value == *value),
            Verdict::ReadsDiffer { first, second } => {
                Ok(observations.row(first)?.value != observations.row(second)?.value)
            }
            Verdict::RangeGrows { first, second } => {
                Ok(observations.rows(first)?.is_empty() && !observations.rows(second)?.is_empty())
            }
            Verdict::Completes => Ok(true),
        }
    }
}

/// A schedule plus the rule that judges it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    anomaly: Anomaly,
    schedule: Schedule,
    verdict: Verdict,
}

impl Scenario {
    /// Build the schedule that provokes `anomaly`
    pub fn new(anomaly: Anomaly, params: &ScenarioParams) -> Self {
        let key = params.primary.as_str();
        let (schedule, verdict) = match anomaly {
            Anomaly::DirtyRead => (
                // Neither side commits: A's write must never become durable
                Schedule::new()
                    .write(Actor::A, key, params.dirty_value)
                    .read(Actor::B, key, "b1"),
                Verdict::ReadsValue {
                    slot: "b1",
                    value: params.dirty_value,
                },
            ),
            Anomaly::NonRepeatableRead => (
                Schedule::new()
                    .read(Actor::A, key, "a1")
                    .write(Actor::B, key, params.committed_value)
                    .commit(Actor::B)
                    .read(Actor::A, key, "a2")
                    .commit(Actor::A),
                Verdict::ReadsDiffer {
                    first: "a1",
                    second: "a2",
                },
            ),
            Anomaly::PhantomRead => (
                Schedule::new()
                    .read_range(Actor::A, params.phantom_predicate, "a1")
                    .write(Actor::B, key, params.phantom_value)
                    .commit(Actor::B)
                    .read_range(Actor::A, params.phantom_predicate, "a2")
                    .commit(Actor::A),
                Verdict::RangeGrows {
                    first: "a1",
                    second: "a2",
                },
            ),
            Anomaly::LostUpdate => (
                Schedule::new()
                    .read(Actor::A, key, "a1")
                    .read(Actor::B, key, "b1")
                    .write_offset(Actor::A, key, "a1", params.lost_update_first_delta)
                    .commit(Actor::A)
                    .write_offset(Actor::B, key, "b1", params.lost_update_second_delta)
                    .commit(Actor::B),
                Verdict::Completes,
            ),
            Anomaly::WriteSkew => {
                let other = params.secondary.as_str();
                (
                    Schedule::new()
                        .read(Actor::A, key, "x")
                        .read(Actor::B, other, "y")
                        .write_offset(Actor::A, other, "x", params.write_skew_delta)
                        .commit(Actor::A)
                        .write_offset(Actor::B, key, "y", params.write_skew_delta)
                        .commit(Actor::B),
                    Verdict::Completes,
                )
            }
        };

        Self {
            anomaly,
            schedule,
            verdict,
        }
    }

    /// Anomaly this scenario provokes
    pub fn anomaly(&self) -> Anomaly {
        self.anomaly
    }

    /// The interleaving it runs
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// The rule it applies
    pub fn verdict(&self) -> &Verdict {
        &self.verdict
    }

    /// Run the schedule with `a` as transaction A and `b` as transaction B
    ///
    /// Returns whether the anomaly was observed. Both handles are terminated
    /// when this returns, whatever the outcome.
    pub fn run<T: Transaction>(&self, a: T, b: T, cx: &CancelToken) -> ScenarioResult<bool> {
        let isolation = a.isolation();
        let _span = tracing::debug_span!("scenario", anomaly = %self.anomaly, %isolation).entered();

        let mut a = TxnGuard::new(a, Actor::A);
        let mut b = TxnGuard::new(b, Actor::B);
        let observations = self.schedule.execute(&mut a, &mut b, cx)?;
        let observed = self.verdict.evaluate(&observations)?;

        tracing::debug!(observed, "scenario finished");
        Ok(observed)
    }
}

/// Whether `tx2` can read `tx1`'s uncommitted write
///
/// Neither transaction is committed; both are rolled back before returning.
pub fn dirty_read<T: Transaction>(
    tx1: T,
    tx2: T,
    cx: &CancelToken,
    params: &ScenarioParams,
) -> ScenarioResult<bool> {
    Scenario::new(Anomaly::DirtyRead, params).run(tx1, tx2, cx)
}

/// Whether `tx1` reads two different committed values of one row
pub fn non_repeatable_read<T: Transaction>(
    tx1: T,
    tx2: T,
    cx: &CancelToken,
    params: &ScenarioParams,
) -> ScenarioResult<bool> {
    Scenario::new(Anomaly::NonRepeatableRead, params).run(tx1, tx2, cx)
}

/// Whether a row committed by `tx2` appears in `tx1`'s second range read
pub fn phantom_read<T: Transaction>(
    tx1: T,
    tx2: T,
    cx: &CancelToken,
    params: &ScenarioParams,
) -> ScenarioResult<bool> {
    Scenario::new(Anomaly::PhantomRead, params).run(tx1, tx2, cx)
}

/// Whether `tx2` can overwrite `tx1`'s committed update from a stale read
///
/// # Errors
///
/// [`ScenarioError::Conflict`](crate::ScenarioError::Conflict) when the store rejects `tx2`'s write or
/// commit, with the store's error unchanged.
pub fn lost_update<T: Transaction>(
    tx1: T,
    tx2: T,
    cx: &CancelToken,
    params: &ScenarioParams,
) -> ScenarioResult<bool> {
    Scenario::new(Anomaly::LostUpdate, params).run(tx1, tx2, cx)
}

/// Whether both transactions can commit writes based on each other's stale reads
///
/// # Errors
///
/// [`ScenarioError::Conflict`](crate::ScenarioError::Conflict) when the store rejects either transaction.
pub fn write_skew<T: Transaction>(
    tx1: T,
    tx2: T,
    cx: &CancelToken,
    params: &ScenarioParams,
) -> ScenarioResult<bool> {
    Scenario::new(Anomaly::WriteSkew, params).run(tx1, tx2, cx)
}

/// Run `anomaly`'s scenario
pub fn run_scenario<T: Transaction>(
    anomaly: Anomaly,
    tx1: T,
    tx2: T,
    cx: &CancelToken,
    params: &ScenarioParams,
) -> ScenarioResult<bool> {
    match anomaly {
        Anomaly::DirtyRead => dirty_read(tx1, tx2, cx, params),
        Anomaly::NonRepeatableRead => non_repeatable_read(tx1, tx2, cx, params),
        Anomaly::PhantomRead => phantom_read(tx1, tx2, cx, params),
        Anomaly::LostUpdate => lost_update(tx1, tx2, cx, params),
        Anomaly::WriteSkew => write_skew(tx1, tx2, cx, params),
    }
}

impl From<Anomaly> for Scenario {
    fn from(anomaly: Anomaly) -> Self {
        Scenario::new(anomaly, &ScenarioParams::default())
    }
}
