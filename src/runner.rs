//! Matrix runner: every configured anomaly at every configured level
//!
//! [`Harness::run_matrix`] walks the level × anomaly grid. Every run resets
//! the fixture, opens two fresh handles at the level under test, runs the
//! scenario and classifies the result. Each cell is run `repetitions`
//! times; a cell is clean when all runs agree and the agreed outcome is the
//! one the level documents.

use std::fmt;

use harness_core::{CancelToken, ConflictError, IsolationLevel, Store, Transaction};
use serde::Serialize;
use uuid::Uuid;

use crate::classify::{documented_guarantee, Outcome};
use crate::config::HarnessConfig;
use crate::error::{ScenarioError, ScenarioResult};
use crate::fixture::balance;
use crate::scenarios::{Anomaly, Scenario};

/// Result of a single scenario run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunRecord {
    /// Level the handles were opened at
    pub level: IsolationLevel,
    /// Anomaly provoked
    pub anomaly: Anomaly,
    /// Classified outcome, None on a fault
    pub outcome: Option<Outcome>,
    /// Conflict error exactly as the store raised it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conflict: Option<ConflictError>,
    /// Fault description when the run could not be classified
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fault: Option<String>,
    /// Committed value of the primary row after a write scenario
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_value: Option<i64>,
}

/// All runs of one level × anomaly pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Cell {
    /// Isolation level
    pub level: IsolationLevel,
    /// Anomaly
    pub anomaly: Anomaly,
    /// What the level documents
    pub expected: Outcome,
    /// Outcome of every classified run, in order
    pub outcomes: Vec<Outcome>,
    /// Faults, one entry per failed run
    pub faults: Vec<String>,
    /// Every run produced the same outcome and none faulted
    pub consistent: bool,
    /// Consistent and equal to `expected`
    pub matches_guarantee: bool,
}

impl Cell {
    fn from_records(level: IsolationLevel, anomaly: Anomaly, records: &[RunRecord]) -> Self {
        let outcomes: Vec<Outcome> = records.iter().filter_map(|r| r.outcome).collect();
        let faults: Vec<String> = records.iter().filter_map(|r| r.fault.clone()).collect();
        let expected = documented_guarantee(anomaly, level);

        let consistent = faults.is_empty()
            && !outcomes.is_empty()
            && outcomes.iter().all(|o| *o == outcomes[0]);
        let matches_guarantee = consistent && outcomes[0] == expected;

        Self {
            level,
            anomaly,
            expected,
            outcomes,
            faults,
            consistent,
            matches_guarantee,
        }
    }

    /// Outcome every run agreed on
    pub fn agreed(&self) -> Option<Outcome> {
        if self.consistent {
            self.outcomes.first().copied()
        } else {
            None
        }
    }

    fn status(&self) -> &'static str {
        if !self.faults.is_empty() {
            "FAULT"
        } else if !self.consistent {
            "INCONSISTENT"
        } else if !self.matches_guarantee {
            "MISMATCH"
        } else {
            "ok"
        }
    }

    fn observed(&self) -> String {
        match self.agreed() {
            Some(outcome) => outcome.to_string(),
            None if self.outcomes.is_empty() => "-".to_string(),
            None => self
                .outcomes
                .iter()
                .map(Outcome::to_string)
                .collect::<Vec<_>>()
                .join(" / "),
        }
    }
}

/// Result of a full matrix run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatrixReport {
    /// Identifier of this run, also attached to its tracing span
    pub run_id: Uuid,
    /// Runs per cell
    pub repetitions: u32,
    /// The run was cancelled before every cell finished
    pub cancelled: bool,
    /// One entry per level × anomaly, levels outermost
    pub cells: Vec<Cell>,
}

impl MatrixReport {
    /// Whether every cell is consistent and matches its documented guarantee
    pub fn is_clean(&self) -> bool {
        !self.cancelled && self.cells.iter().all(|c| c.matches_guarantee)
    }

    /// Cells that are not clean
    pub fn mismatches(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter().filter(|c| !c.matches_guarantee)
    }

    /// Cell for `level` × `anomaly`
    pub fn cell(&self, level: IsolationLevel, anomaly: Anomaly) -> Option<&Cell> {
        self.cells
            .iter()
            .find(|c| c.level == level && c.anomaly == anomaly)
    }
}

impl fmt::Display for MatrixReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "isolation matrix {} ({} repetitions per cell)",
            self.run_id, self.repetitions
        )?;
        writeln!(
            f,
            "{:<16} {:<20} {:<24} {:<24} status",
            "level", "anomaly", "expected", "observed"
        )?;
        for cell in &self.cells {
            writeln!(
                f,
                "{:<16} {:<20} {:<24} {:<24} {}",
                cell.level.as_str(),
                cell.anomaly.as_str(),
                cell.expected.to_string(),
                cell.observed(),
                cell.status()
            )?;
            for fault in &cell.faults {
                writeln!(f, "    fault: {}", fault)?;
            }
        }
        if self.cancelled {
            writeln!(f, "run cancelled before completion")?;
        }
        let bad = self.mismatches().count();
        write!(
            f,
            "{} of {} cells match their documented guarantee",
            self.cells.len() - bad,
            self.cells.len()
        )
    }
}

/// Runs scenarios against one store
pub struct Harness<S: Store> {
    store: S,
    config: HarnessConfig,
    cx: CancelToken,
}

impl<S: Store> Harness<S> {
    /// Harness over `store` with `config`
    pub fn new(store: S, config: HarnessConfig) -> Self {
        Self {
            store,
            config,
            cx: CancelToken::new(),
        }
    }

    /// Use `cx` for every store call
    pub fn with_cancel_token(mut self, cx: CancelToken) -> Self {
        self.cx = cx;
        self
    }

    /// Token that cancels in-flight and remaining runs
    pub fn cancel_token(&self) -> CancelToken {
        self.cx.clone()
    }

    /// Store under test
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Active configuration
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Reset the fixture and run one scenario, returning its raw result
    ///
    /// If the second handle cannot be opened the first is rolled back
    /// before the error is returned.
    pub fn execute(&self, level: IsolationLevel, anomaly: Anomaly) -> ScenarioResult<bool> {
        self.config.fixture.reset(&self.store, &self.cx)?;

        let mut tx1 = self.store.begin(&self.cx, level)?;
        let tx2 = match self.store.begin(&self.cx, level) {
            Ok(tx) => tx,
            Err(e) => {
                if let Err(rollback) = tx1.rollback() {
                    tracing::warn!(error = %rollback, "rollback of first handle failed");
                }
                return Err(e.into());
            }
        };

        Scenario::new(anomaly, &self.config.scenario).run(tx1, tx2, &self.cx)
    }

    /// Run one scenario and classify it
    pub fn run_once(&self, level: IsolationLevel, anomaly: Anomaly) -> RunRecord {
        let result = self.execute(level, anomaly);
        let conflict = result
            .as_ref()
            .err()
            .and_then(ScenarioError::as_conflict)
            .cloned();

        let (outcome, fault) = match Outcome::classify(&result) {
            Ok(outcome) => (Some(outcome), None),
            Err(fault) => (None, Some(fault.to_string())),
        };

        let final_value = if anomaly.writes_concurrently() && outcome.is_some() {
            balance(&self.store, &self.cx, &self.config.scenario.primary).ok()
        } else {
            None
        };

        match (&outcome, &fault) {
            (Some(o), _) => tracing::info!(%level, %anomaly, outcome = %o, "scenario classified"),
            (None, Some(f)) => tracing::warn!(%level, %anomaly, fault = %f, "scenario faulted"),
            (None, None) => {}
        }

        RunRecord {
            level,
            anomaly,
            outcome,
            conflict,
            fault,
            final_value,
        }
    }

    /// Run every configured cell `repetitions` times
    pub fn run_matrix(&self) -> MatrixReport {
        let run_id = Uuid::new_v4();
        let _span = tracing::info_span!("matrix", %run_id).entered();
        let mut cells = Vec::new();
        let mut cancelled = false;

        'levels: for &level in &self.config.levels {
            for &anomaly in &self.config.anomalies {
                let mut records = Vec::new();
                for _ in 0..self.config.repetitions {
                    if self.cx.is_cancelled() {
                        cancelled = true;
                        break 'levels;
                    }
                    records.push(self.run_once(level, anomaly));
                }

                let cell = Cell::from_records(level, anomaly, &records);
                if !cell.matches_guarantee {
                    tracing::warn!(
                        %level,
                        %anomaly,
                        expected = %cell.expected,
                        observed = %cell.observed(),
                        "cell does not match documented guarantee"
                    );
                }
                cells.push(cell);
            }
        }

        MatrixReport {
            run_id,
            repetitions: self.config.repetitions,
            cancelled,
            cells,
        }
    }
}

impl<S: Store + fmt::Debug> fmt::Debug for Harness<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Harness")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish()
    }
}
