//! Schedules: anomalies as ordered lists of tagged steps
//!
//! A [`Schedule`] interleaves the statements of two transactions, A and B,
//! in a fixed order. [`Schedule::execute`] runs the steps one after another
//! in a single control flow, so the interleaving is deterministic and the
//! happens-before edges an anomaly needs are exactly the list order.
//!
//! Reads record what they saw under a named slot. Writes take their value
//! from a [`ValueExpr`]: either a literal or an earlier observation plus a
//! delta. Verdicts are computed over the recorded [`Observations`].
//!
//! ```text
//! A read Alice -> a1
//! B read Alice -> b1
//! A write Alice = a1 + 50
//! A commit
//! B write Alice = b1 + 100
//! B commit
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use harness_core::{CancelToken, Entity, Predicate, Transaction};
use serde::{Deserialize, Serialize};

use crate::access::{balances_matching, get_balance, set_balance};
use crate::error::{ScenarioError, ScenarioResult};
use crate::guard::TxnGuard;

/// Name under which a read records its observation
pub type Slot = &'static str;

/// One of the two interleaved transactions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Actor {
    /// First transaction
    A,
    /// Second transaction
    B,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::A => f.write_str("A"),
            Actor::B => f.write_str("B"),
        }
    }
}

/// Value written by a write step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueExpr {
    /// A fixed value
    Literal(i64),
    /// The value observed in `slot`, plus `delta`
    Offset {
        /// Slot of an earlier point read
        slot: Slot,
        /// Amount added to the observed value
        delta: i64,
    },
}

impl ValueExpr {
    fn resolve(&self, observations: &Observations) -> ScenarioResult<i64> {
        match self {
            ValueExpr::Literal(v) => Ok(*v),
            ValueExpr::Offset { slot, delta } => {
                let base = observations.row(slot)?.value;
                base.checked_add(*delta).ok_or_else(|| {
                    ScenarioError::Schedule(format!("{} + {} overflows", slot, delta))
                })
            }
        }
    }
}

impl fmt::Display for ValueExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueExpr::Literal(v) => write!(f, "{}", v),
            ValueExpr::Offset { slot, delta } if *delta < 0 => {
                write!(f, "{} - {}", slot, delta.unsigned_abs())
            }
            ValueExpr::Offset { slot, delta } => write!(f, "{} + {}", slot, delta),
        }
    }
}

/// Operation performed by one step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Point read of an entity by name
    Read {
        /// Entity name
        name: String,
        /// Where the row is recorded
        slot: Slot,
    },
    /// Range read through a value predicate
    ReadRange {
        /// Predicate the rows must satisfy
        predicate: Predicate,
        /// Where the rows are recorded
        slot: Slot,
    },
    /// Point update of an entity by name
    Write {
        /// Entity name
        name: String,
        /// Value to write
        value: ValueExpr,
    },
    /// Commit the actor's transaction
    Commit,
}

/// One step of a schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Transaction that performs the step
    pub actor: Actor,
    /// What it does
    pub op: Op,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.op {
            Op::Read { name, slot } => write!(f, "{} read {} -> {}", self.actor, name, slot),
            Op::ReadRange { predicate, slot } => {
                write!(f, "{} read-range {} -> {}", self.actor, predicate, slot)
            }
            Op::Write { name, value } => write!(f, "{} write {} = {}", self.actor, name, value),
            Op::Commit => write!(f, "{} commit", self.actor),
        }
    }
}

/// What a read step saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Observation {
    /// Result of a point read
    Row(Entity),
    /// Result of a range read
    Rows(Vec<Entity>),
}

/// Observations recorded while a schedule runs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Observations {
    slots: BTreeMap<Slot, Observation>,
    committed: BTreeSet<Actor>,
}

impl Observations {
    /// Row recorded by the point read into `slot`
    pub fn row(&self, slot: &str) -> ScenarioResult<&Entity> {
        match self.slots.get(slot) {
            Some(Observation::Row(entity)) => Ok(entity),
            Some(Observation::Rows(_)) => Err(ScenarioError::Schedule(format!(
                "slot '{}' holds a range read",
                slot
            ))),
            None => Err(ScenarioError::Schedule(format!(
                "slot '{}' was never recorded",
                slot
            ))),
        }
    }

    /// Rows recorded by the range read into `slot`
    pub fn rows(&self, slot: &str) -> ScenarioResult<&[Entity]> {
        match self.slots.get(slot) {
            Some(Observation::Rows(rows)) => Ok(rows),
            Some(Observation::Row(_)) => Err(ScenarioError::Schedule(format!(
                "slot '{}' holds a point read",
                slot
            ))),
            None => Err(ScenarioError::Schedule(format!(
                "slot '{}' was never recorded",
                slot
            ))),
        }
    }

    /// Whether `actor` committed successfully
    pub fn committed(&self, actor: Actor) -> bool {
        self.committed.contains(&actor)
    }

    /// Number of recorded slots
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// True if nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// An ordered interleaving of two transactions' steps
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Schedule {
    steps: Vec<Step>,
}

impl Schedule {
    /// Empty schedule
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step
    pub fn step(mut self, actor: Actor, op: Op) -> Self {
        self.steps.push(Step { actor, op });
        self
    }

    /// Append a point read
    pub fn read(self, actor: Actor, name: impl Into<String>, slot: Slot) -> Self {
        self.step(
            actor,
            Op::Read {
                name: name.into(),
                slot,
            },
        )
    }

    /// Append a range read
    pub fn read_range(self, actor: Actor, predicate: Predicate, slot: Slot) -> Self {
        self.step(actor, Op::ReadRange { predicate, slot })
    }

    /// Append a write of a literal value
    pub fn write(self, actor: Actor, name: impl Into<String>, value: i64) -> Self {
        self.step(
            actor,
            Op::Write {
                name: name.into(),
                value: ValueExpr::Literal(value),
            },
        )
    }

    /// Append a write of an earlier observation plus `delta`
    pub fn write_offset(self, actor: Actor, name: impl Into<String>, slot: Slot, delta: i64) -> Self {
        self.step(
            actor,
            Op::Write {
                name: name.into(),
                value: ValueExpr::Offset { slot, delta },
            },
        )
    }

    /// Append a commit
    pub fn commit(self, actor: Actor) -> Self {
        self.step(actor, Op::Commit)
    }

    /// Steps in execution order
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Number of steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// True if the schedule has no steps
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Check the schedule can run without referring to missing data
    ///
    /// Rejects a slot recorded twice, an offset over a slot that is not an
    /// earlier point read, and any step by an actor that already committed.
    pub fn validate(&self) -> ScenarioResult<()> {
        let mut point_slots = BTreeSet::new();
        let mut all_slots = BTreeSet::new();
        let mut committed = BTreeSet::new();

        for (index, step) in self.steps.iter().enumerate() {
            if committed.contains(&step.actor) {
                return Err(ScenarioError::Schedule(format!(
                    "step {} ({}) runs after {} committed",
                    index, step, step.actor
                )));
            }
            match &step.op {
                Op::Read { slot, .. } | Op::ReadRange { slot, .. } => {
                    if !all_slots.insert(*slot) {
                        return Err(ScenarioError::Schedule(format!(
                            "step {} records slot '{}' twice",
                            index, slot
                        )));
                    }
                    if matches!(step.op, Op::Read { .. }) {
                        point_slots.insert(*slot);
                    }
                }
                Op::Write {
                    value: ValueExpr::Offset { slot, .. },
                    ..
                } if !point_slots.contains(slot) => {
                    return Err(ScenarioError::Schedule(format!(
                        "step {} ({}) uses slot '{}' before a point read records it",
                        index, step, slot
                    )));
                }
                Op::Write { .. } => {}
                Op::Commit => {
                    committed.insert(step.actor);
                }
            }
        }
        Ok(())
    }

    /// Run every step in order against the two guarded handles
    ///
    /// Stops at the first failing step and returns its error; the guards
    /// roll back whatever is still open when they drop.
    pub fn execute<T: Transaction>(
        &self,
        a: &mut TxnGuard<T>,
        b: &mut TxnGuard<T>,
        cx: &CancelToken,
    ) -> ScenarioResult<Observations> {
        self.validate()?;
        let mut observations = Observations::default();

        for (index, step) in self.steps.iter().enumerate() {
            let guard = match step.actor {
                Actor::A => &mut *a,
                Actor::B => &mut *b,
            };
            tracing::debug!(step = index, %step, "executing step");
            if let Err(e) = Self::run_step(step, guard, cx, &mut observations) {
                tracing::debug!(step = index, %step, error = %e, "step failed");
                return Err(e);
            }
        }
        Ok(observations)
    }

    fn run_step<T: Transaction>(
        step: &Step,
        guard: &mut TxnGuard<T>,
        cx: &CancelToken,
        observations: &mut Observations,
    ) -> ScenarioResult<()> {
        cx.check()?;
        match &step.op {
            Op::Read { name, slot } => {
                let row = get_balance(guard.txn(), cx, name)?;
                observations.slots.insert(*slot, Observation::Row(row));
            }
            Op::ReadRange { predicate, slot } => {
                let rows = balances_matching(guard.txn(), cx, *predicate)?;
                observations.slots.insert(*slot, Observation::Rows(rows));
            }
            Op::Write { name, value } => {
                let value = value.resolve(observations)?;
                set_balance(guard.txn(), cx, name, value)?;
            }
            Op::Commit => {
                guard.commit(cx)?;
                observations.committed.insert(step.actor);
            }
        }
        Ok(())
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harness_core::{IsolationLevel, Statement, Store};
    use harness_mvcc::MvccStore;

    fn seeded() -> (MvccStore, CancelToken) {
        let store = MvccStore::new();
        let cx = CancelToken::new();
        let mut seed = store.begin(&cx, IsolationLevel::ReadCommitted).unwrap();
        seed.exec(&cx, &Statement::Insert(Entity::new("Alice", 100)))
            .unwrap();
        seed.exec(&cx, &Statement::Insert(Entity::new("Bob", 100)))
            .unwrap();
        seed.commit(&cx).unwrap();
        (store, cx)
    }

    fn guards(
        store: &MvccStore,
        cx: &CancelToken,
        level: IsolationLevel,
    ) -> (
        TxnGuard<harness_mvcc::MvccTransaction>,
        TxnGuard<harness_mvcc::MvccTransaction>,
    ) {
        (
            TxnGuard::new(store.begin(cx, level).unwrap(), Actor::A),
            TxnGuard::new(store.begin(cx, level).unwrap(), Actor::B),
        )
    }

    #[test]
    fn test_display_lists_steps() {
        let schedule = Schedule::new()
            .read(Actor::A, "Alice", "a1")
            .write_offset(Actor::A, "Alice", "a1", -25)
            .read_range(Actor::B, Predicate::LessThan(0), "b1")
            .commit(Actor::A);
        assert_eq!(
            schedule.to_string(),
            "A read Alice -> a1\nA write Alice = a1 - 25\nB read-range value < 0 -> b1\nA commit"
        );
    }

    #[test]
    fn test_validate_rejects_unknown_slot() {
        let schedule = Schedule::new().write_offset(Actor::A, "Alice", "a1", 1);
        assert!(matches!(
            schedule.validate(),
            Err(ScenarioError::Schedule(_))
        ));
    }

    #[test]
    fn test_validate_rejects_offset_over_range_slot() {
        let schedule = Schedule::new()
            .read_range(Actor::A, Predicate::LessThan(0), "a1")
            .write_offset(Actor::A, "Alice", "a1", 1);
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_step_after_commit() {
        let schedule = Schedule::new()
            .commit(Actor::B)
            .read(Actor::B, "Alice", "b1");
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicate_slot() {
        let schedule = Schedule::new()
            .read(Actor::A, "Alice", "x")
            .read(Actor::B, "Bob", "x");
        assert!(schedule.validate().is_err());
    }

    #[test]
    fn test_execute_records_observations() {
        let (store, cx) = seeded();
        let (mut a, mut b) = guards(&store, &cx, IsolationLevel::ReadCommitted);
        let schedule = Schedule::new()
            .read(Actor::A, "Alice", "a1")
            .write_offset(Actor::B, "Bob", "a1", 7)
            .commit(Actor::B)
            .read_range(Actor::A, Predicate::AtLeast(107), "a2");

        let obs = schedule.execute(&mut a, &mut b, &cx).unwrap();
        assert_eq!(obs.row("a1").unwrap().value, 100);
        assert_eq!(obs.rows("a2").unwrap(), &[Entity::new("Bob", 107)]);
        assert!(obs.committed(Actor::B));
        assert!(!obs.committed(Actor::A));
        assert!(b.is_terminated());
        assert!(!a.is_terminated());
    }

    #[test]
    fn test_execute_stops_at_first_error() {
        let (store, cx) = seeded();
        let (mut a, mut b) = guards(&store, &cx, IsolationLevel::ReadCommitted);
        let schedule = Schedule::new()
            .read(Actor::A, "Carol", "a1")
            .commit(Actor::A);

        let err = schedule.execute(&mut a, &mut b, &cx).unwrap_err();
        assert!(matches!(err, ScenarioError::Setup(_)));
        assert!(!a.is_terminated());
        drop(a);
        drop(b);
        assert_eq!(store.active_transactions(), 0);
    }

    #[test]
    fn test_execute_honours_cancellation() {
        let (store, cx) = seeded();
        let (mut a, mut b) = guards(&store, &cx, IsolationLevel::Serializable);
        cx.cancel();
        let schedule = Schedule::new().read(Actor::A, "Alice", "a1");
        assert_eq!(
            schedule.execute(&mut a, &mut b, &cx).unwrap_err(),
            ScenarioError::Cancelled
        );
    }

    #[test]
    fn test_observation_kind_mismatch() {
        let mut obs = Observations::default();
        obs.slots
            .insert("a1", Observation::Rows(vec![Entity::new("Alice", 1)]));
        assert!(obs.row("a1").is_err());
        assert_eq!(obs.rows("a1").unwrap().len(), 1);
        assert!(obs.rows("missing").is_err());
    }
}
