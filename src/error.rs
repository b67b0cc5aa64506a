//! Error types for scenario runs and harness configuration
//!
//! A scenario either returns its verdict or one of four failures:
//! - [`ScenarioError::Conflict`]: the store prevented the anomaly by
//!   rejecting a statement or commit. Carried unchanged so callers can read
//!   the SQLSTATE code and message.
//! - [`ScenarioError::Setup`] / [`ScenarioError::Schedule`]: the run could
//!   not mean anything (missing seed, malformed schedule)
//! - [`ScenarioError::Store`]: any other store failure
//! - [`ScenarioError::Cancelled`]: the cancel token fired

use harness_core::{ConflictError, ConflictKind, StoreError};
use thiserror::Error;

/// Result type for scenario operations
pub type ScenarioResult<T> = std::result::Result<T, ScenarioError>;

/// Failure of a scenario run
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScenarioError {
    /// Fixture missing or an entity the schedule needs does not exist
    #[error("setup fault: {0}")]
    Setup(String),

    /// Schedule is malformed (slot used before it is recorded, step after commit)
    #[error("invalid schedule: {0}")]
    Schedule(String),

    /// Serialization failure raised by the store
    #[error(transparent)]
    Conflict(ConflictError),

    /// Non-conflict store failure
    #[error("store fault: {0}")]
    Store(StoreError),

    /// The cancel token fired mid-scenario
    #[error("scenario cancelled")]
    Cancelled,
}

impl ScenarioError {
    /// The conflict, if this error is one
    pub fn as_conflict(&self) -> Option<&ConflictError> {
        match self {
            ScenarioError::Conflict(c) => Some(c),
            _ => None,
        }
    }

    /// Conflict kind, if this error is a conflict
    pub fn conflict_kind(&self) -> Option<ConflictKind> {
        self.as_conflict().map(ConflictError::kind)
    }

    /// Whether this error is a fault rather than a prevention
    ///
    /// Everything except a conflict is fatal to the run.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ScenarioError::Conflict(_))
    }
}

impl From<StoreError> for ScenarioError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(c) => ScenarioError::Conflict(c),
            StoreError::Cancelled => ScenarioError::Cancelled,
            other => ScenarioError::Store(other),
        }
    }
}

/// Failure loading or validating a harness configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file could not be read or written
    #[error("failed to access config file '{path}': {source}")]
    Io {
        /// File that was being accessed
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Config file is not valid TOML for [`crate::HarnessConfig`]
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config could not be serialized
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Config parsed but holds values the harness cannot run with
    #[error("invalid config: {0}")]
    Invalid(String),
}
