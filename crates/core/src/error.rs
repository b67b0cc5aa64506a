//! Error types for the Store Client boundary
//!
//! Stores report failures through [`StoreError`]. Failures raised by the
//! store's own concurrency control are carried as [`ConflictError`], which
//! keeps the store-specific code and message untouched so callers can
//! assert on them.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// SQLSTATE reported for serialization failures
pub const SERIALIZATION_FAILURE: &str = "40001";

/// SQLSTATE reported when a row lock cannot be acquired without waiting
pub const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Category of a concurrency-control rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictKind {
    /// A row was updated by a transaction that committed after our snapshot
    WriteWrite,
    /// A read/write dependency cycle between concurrent transactions
    ReadWrite,
    /// A row is locked by another open transaction
    LockNotAvailable,
}

impl ConflictKind {
    /// Stable name used in reports
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictKind::WriteWrite => "write-write",
            ConflictKind::ReadWrite => "read-write",
            ConflictKind::LockNotAvailable => "lock-not-available",
        }
    }
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A rejection raised by the store's concurrency control
///
/// `code` and `message` are whatever the store reported; the harness
/// propagates them without rewriting.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message} (SQLSTATE {code})")]
pub struct ConflictError {
    kind: ConflictKind,
    code: String,
    message: String,
}

impl ConflictError {
    /// Create a conflict error with an explicit code and message
    pub fn new(kind: ConflictKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Write-write conflict ("concurrent update")
    pub fn concurrent_update() -> Self {
        Self::new(
            ConflictKind::WriteWrite,
            SERIALIZATION_FAILURE,
            "could not serialize access due to concurrent update",
        )
    }

    /// Read-write dependency cycle ("serialization failure")
    pub fn read_write_dependency() -> Self {
        Self::new(
            ConflictKind::ReadWrite,
            SERIALIZATION_FAILURE,
            "could not serialize access due to read/write dependencies among transactions",
        )
    }

    /// Row lock held by another transaction
    pub fn lock_not_available(name: &str) -> Self {
        Self::new(
            ConflictKind::LockNotAvailable,
            LOCK_NOT_AVAILABLE,
            format!("could not obtain lock on row '{}'", name),
        )
    }

    /// Conflict category
    pub fn kind(&self) -> ConflictKind {
        self.kind
    }

    /// Store-specific error code
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Store-specific message
    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors reported by a store through the Store Client boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Rejected by the store's concurrency control
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// A previous statement failed; the transaction only accepts rollback
    #[error("current transaction is aborted, commands ignored until end of transaction block")]
    TransactionAborted,

    /// The handle was already committed or rolled back
    #[error("transaction is already closed")]
    TransactionClosed,

    /// Insert of a name that already exists
    #[error("duplicate key value violates unique constraint: name '{0}' already exists")]
    UniqueViolation(String),

    /// The caller's cancellation token fired before the call ran
    #[error("operation cancelled")]
    Cancelled,

    /// Statement not supported by this call (e.g. SELECT through exec)
    #[error("unsupported statement: {0}")]
    Unsupported(String),

    /// Any other store failure
    #[error("store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// The conflict error, if this is a concurrency-control rejection
    pub fn as_conflict(&self) -> Option<&ConflictError> {
        match self {
            StoreError::Conflict(c) => Some(c),
            _ => None,
        }
    }

    /// True for concurrency-control rejections
    pub fn is_conflict(&self) -> bool {
        self.as_conflict().is_some()
    }
}
