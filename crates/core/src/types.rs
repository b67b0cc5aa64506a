//! Core types for the isolation harness
//!
//! This module defines the foundational types:
//! - IsolationLevel: Opaque isolation setting passed to `Store::begin`
//! - Entity: Named record with an integer value
//! - Predicate: Comparison against an entity value (range reads)
//! - Filter: Row selection for statements
//! - Statement: Typed statement executed through a transaction handle

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Isolation level requested when a transaction begins
///
/// The harness never interprets the level itself. It is handed to the store
/// as configuration and only used again to look up the documented guarantee
/// when classifying results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationLevel {
    /// Every statement sees data committed before the statement began
    ReadCommitted,
    /// Every statement sees the snapshot taken at the first statement
    #[serde(alias = "snapshot")]
    RepeatableRead,
    /// Snapshot reads plus detection of read/write dependency cycles
    Serializable,
}

impl IsolationLevel {
    /// All recognised levels, weakest first
    pub const ALL: [IsolationLevel; 3] = [
        IsolationLevel::ReadCommitted,
        IsolationLevel::RepeatableRead,
        IsolationLevel::Serializable,
    ];

    /// Stable kebab-case name used in config files and reports
    pub fn as_str(&self) -> &'static str {
        match self {
            IsolationLevel::ReadCommitted => "read-committed",
            IsolationLevel::RepeatableRead => "repeatable-read",
            IsolationLevel::Serializable => "serializable",
        }
    }

    /// True for levels that read from a transaction-wide snapshot
    pub fn uses_snapshot(&self) -> bool {
        !matches!(self, IsolationLevel::ReadCommitted)
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['_', ' '], "-").as_str() {
            "read-committed" => Ok(IsolationLevel::ReadCommitted),
            "repeatable-read" | "snapshot" => Ok(IsolationLevel::RepeatableRead),
            "serializable" => Ok(IsolationLevel::Serializable),
            other => Err(format!(
                "unknown isolation level '{}', expected read-committed, repeatable-read or serializable",
                other
            )),
        }
    }
}

/// A named record with an integer value
///
/// Names are unique within a store. Values carry no domain constraint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entity {
    /// Unique name (primary key)
    pub name: String,
    /// Current value
    pub value: i64,
}

impl Entity {
    /// Create a new entity
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Comparison of an entity value against a constant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "op", content = "bound", rename_all = "snake_case")]
pub enum Predicate {
    /// `value < bound`
    LessThan(i64),
    /// `value <= bound`
    AtMost(i64),
    /// `value > bound`
    GreaterThan(i64),
    /// `value >= bound`
    AtLeast(i64),
    /// `value = bound`
    Equals(i64),
}

impl Predicate {
    /// Evaluate the predicate against a value
    pub fn matches(&self, value: i64) -> bool {
        match *self {
            Predicate::LessThan(bound) => value < bound,
            Predicate::AtMost(bound) => value <= bound,
            Predicate::GreaterThan(bound) => value > bound,
            Predicate::AtLeast(bound) => value >= bound,
            Predicate::Equals(bound) => value == bound,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::LessThan(b) => write!(f, "value < {}", b),
            Predicate::AtMost(b) => write!(f, "value <= {}", b),
            Predicate::GreaterThan(b) => write!(f, "value > {}", b),
            Predicate::AtLeast(b) => write!(f, "value >= {}", b),
            Predicate::Equals(b) => write!(f, "value = {}", b),
        }
    }
}

/// Row selection used by statements
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Filter {
    /// Every row
    All,
    /// The row with this name
    Name(String),
    /// Rows whose value satisfies the predicate
    Value(Predicate),
}

impl Filter {
    /// Filter selecting a single row by name
    pub fn name(name: impl Into<String>) -> Self {
        Filter::Name(name.into())
    }

    /// Check whether an entity is selected by this filter
    pub fn selects(&self, name: &str, value: i64) -> bool {
        match self {
            Filter::All => true,
            Filter::Name(n) => n == name,
            Filter::Value(p) => p.matches(value),
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => Ok(()),
            Filter::Name(n) => write!(f, " WHERE name = '{}'", n),
            Filter::Value(p) => write!(f, " WHERE {}", p),
        }
    }
}

/// A statement executed through a transaction handle
///
/// `Select` goes through `Transaction::query`; the others go through
/// `Transaction::exec` and report the number of rows affected.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Statement {
    /// Read the selected rows
    Select(Filter),
    /// Set the value of the selected rows
    Update {
        /// Rows to update
        filter: Filter,
        /// New value
        value: i64,
    },
    /// Insert a new row; the name must not already exist
    Insert(Entity),
    /// Delete the selected rows
    Delete(Filter),
}

impl Statement {
    /// `SELECT ... WHERE name = <name>`
    pub fn select_by_name(name: impl Into<String>) -> Self {
        Statement::Select(Filter::name(name))
    }

    /// `SELECT ... WHERE <predicate>`
    pub fn select_where(predicate: Predicate) -> Self {
        Statement::Select(Filter::Value(predicate))
    }

    /// `UPDATE ... SET value = <value> WHERE name = <name>`
    pub fn update_by_name(name: impl Into<String>, value: i64) -> Self {
        Statement::Update {
            filter: Filter::name(name),
            value,
        }
    }

    /// True if the statement only reads
    pub fn is_read_only(&self) -> bool {
        matches!(self, Statement::Select(_))
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Statement::Select(filter) => write!(f, "SELECT name, value FROM balances{}", filter),
            Statement::Update { filter, value } => {
                write!(f, "UPDATE balances SET value = {}{}", value, filter)
            }
            Statement::Insert(e) => write!(
                f,
                "INSERT INTO balances VALUES ('{}', {})",
                e.name, e.value
            ),
            Statement::Delete(filter) => write!(f, "DELETE FROM balances{}", filter),
        }
    }
}
