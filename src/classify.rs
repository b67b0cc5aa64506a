//! Classifying scenario results
//!
//! A scenario result is one of three outcomes: the anomaly was observed,
//! it was silently prevented (verdict `false`), or the store prevented it
//! by raising a conflict. Anything else is a fault and is not classified.
//!
//! [`documented_guarantee`] encodes what each isolation level promises:
//!
//! | level           | dirty    | non-repeatable | phantom  | lost update | write skew |
//! |-----------------|----------|----------------|----------|-------------|------------|
//! | read-committed  | prevented| observed       | observed | observed    | observed   |
//! | repeatable-read | prevented| prevented      | prevented| write-write | observed   |
//! | serializable    | prevented| prevented      | prevented| write-write | read-write |

use std::fmt;

use harness_core::{ConflictKind, IsolationLevel};
use serde::{Deserialize, Serialize};

use crate::error::{ScenarioError, ScenarioResult};
use crate::scenarios::Anomaly;

/// Observable result of one scenario run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "conflict", rename_all = "kebab-case")]
pub enum Outcome {
    /// The anomaly happened
    Observed,
    /// The anomaly did not happen and nothing failed
    Prevented,
    /// The store rejected a statement or commit with a conflict
    PreventedWithError(ConflictKind),
}

impl Outcome {
    /// Classify a scenario result
    ///
    /// # Errors
    ///
    /// Returns the error back when it is a fault (setup, store, cancelled)
    /// rather than a conflict.
    pub fn classify(result: &ScenarioResult<bool>) -> ScenarioResult<Outcome> {
        match result {
            Ok(true) => Ok(Outcome::Observed),
            Ok(false) => Ok(Outcome::Prevented),
            Err(ScenarioError::Conflict(conflict)) => {
                Ok(Outcome::PreventedWithError(conflict.kind()))
            }
            Err(fault) => Err(fault.clone()),
        }
    }

    /// Whether the anomaly was kept from happening
    pub fn is_prevention(&self) -> bool {
        !matches!(self, Outcome::Observed)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Observed => f.write_str("observed"),
            Outcome::Prevented => f.write_str("prevented"),
            Outcome::PreventedWithError(kind) => write!(f, "prevented ({})", kind.as_str()),
        }
    }
}

/// Outcome `level` guarantees for `anomaly` against a conforming store
pub fn documented_guarantee(anomaly: Anomaly, level: IsolationLevel) -> Outcome {
    use Anomaly::*;
    use IsolationLevel::*;

    match (level, anomaly) {
        (_, DirtyRead) => Outcome::Prevented,
        (ReadCommitted, _) => Outcome::Observed,
        (RepeatableRead | Serializable, NonRepeatableRead | PhantomRead) => Outcome::Prevented,
        (RepeatableRead | Serializable, LostUpdate) => {
            Outcome::PreventedWithError(ConflictKind::WriteWrite)
        }
        (RepeatableRead, WriteSkew) => Outcome::Observed,
        (Serializable, WriteSkew) => Outcome::PreventedWithError(ConflictKind::ReadWrite),
    }
}
