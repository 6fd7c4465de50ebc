// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Store-level error kinds.

use martingalian_core::StepId;
use thiserror::Error;

/// Errors the transactional store can report back to the engine.
///
/// The `retriable` distinction matters to callers: retriable kinds
/// retry the current tick operation with bounded attempts, non-retriable
/// kinds abort the tick and release the lock.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("step {0} not found")]
    StepNotFound(StepId),

    #[error("step {0} was modified concurrently (stale row version)")]
    Conflict(StepId),

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "postgres")]
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Whether the tick that produced this error may retry the same
    /// operation.
    pub fn is_retriable(&self) -> bool {
        match self {
            StoreError::StepNotFound(_) | StoreError::Conflict(_) => false,
            #[cfg(feature = "postgres")]
            StoreError::Database(err) => matches!(
                err,
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed
            ),
            #[cfg(feature = "postgres")]
            StoreError::Migration(_) => false,
        }
    }
}
