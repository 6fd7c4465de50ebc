// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Engine-level error kinds, one variant per named error kind.

use martingalian_core::StepId;
use martingalian_store::StoreError;
use thiserror::Error;

/// Errors the engine can surface while running a tick or a job.
///
/// `StoreError` converts in via `#[from]` so store failures propagate
/// without manual wrapping at every call site.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A transition guard rejected the move. Recovered locally by callers —
    /// the candidate is simply not advanced this tick.
    #[error("guard denied transition for step {step}: {reason}")]
    GuardDenied { step: StepId, reason: String },

    /// The optimistic check failed because the step changed since selection.
    /// Recovered locally by callers — the step is simply skipped.
    #[error("step {0} changed state since it was selected")]
    StaleState(StepId),

    /// Job construction failed: a required constructor argument was absent
    /// from `arguments` and the parameter has no default.
    #[error("missing argument `{argument}` constructing job `{class}`")]
    MissingArgument { class: String, argument: String },

    /// `class` names no registered job.
    #[error("no job registered for class `{0}`")]
    UnknownJobClass(String),

    /// The job body raised.
    #[error("job failed: {0}")]
    JobFailed(String),

    /// The transactional store reported a failure.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Whether the tick that produced this error may retry the current
    /// operation, mirroring `StoreError::is_retriable` for the subset of
    /// errors that wrap a store failure.
    pub fn is_retriable(&self) -> bool {
        matches!(self, EngineError::Store(err) if err.is_retriable())
    }
}
