//! Cooperative cancellation for store calls
//!
//! A [`CancelToken`] is threaded through every store call. Stores check it
//! before doing any work and return [`StoreError::Cancelled`] once it fires.
//! Rollback never takes a token, so pending rollbacks still run after
//! cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{StoreError, StoreResult};

/// Shared cancellation flag
///
/// Clones share the same flag; cancelling any clone cancels all of them.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that has not fired
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the token
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether the token has fired
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(StoreError::Cancelled)` if the token has fired
    pub fn check(&self) -> StoreResult<()> {
        if self.is_cancelled() {
            Err(StoreError::Cancelled)
        } else {
            Ok(())
        }
    }
}
