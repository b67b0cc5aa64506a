//! Core types and traits for the isolation harness
//!
//! This crate defines the Store Client boundary shared by the anomaly
//! engine and the stores it runs against:
//! - IsolationLevel, Entity, Predicate, Filter, Statement
//! - StoreError, ConflictError, ConflictKind
//! - CancelToken: cooperative cancellation threaded through store calls
//! - Traits: Store and Transaction

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cancel;
pub mod error;
pub mod traits;
pub mod types;

pub use cancel::CancelToken;
pub use error::{
    ConflictError, ConflictKind, StoreError, StoreResult, LOCK_NOT_AVAILABLE,
    SERIALIZATION_FAILURE,
};
pub use traits::{Store, Transaction};
pub use types::{Entity, Filter, IsolationLevel, Predicate, Statement};
