// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `RetryPolicy`: bounded exponential backoff for a failed job.

use crate::error::EngineError;
use crate::transition::TransitionExecutor;
use chrono::{DateTime, Duration, Utc};
use martingalian_core::{Step, StepState};
use martingalian_store::{StepPatch, StepRepository};

/// Default bound on `retries` before a step is given up on.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default backoff ceiling: 5 minutes.
pub const DEFAULT_BACKOFF_CEILING_MS: i64 = 5 * 60 * 1000;

/// How `dispatch_after` is computed on a retried step.
#[derive(Debug, Clone, Copy)]
pub enum BackoffStrategy {
    /// Doubles per retry, capped at `ceiling_ms` (the default).
    Exponential { base_ms: i64, ceiling_ms: i64 },
    /// A constant delay regardless of retry count.
    Fixed { interval_ms: i64 },
}

impl Default for BackoffStrategy {
    fn default() -> Self {
        BackoffStrategy::Exponential {
            base_ms: 1_000,
            ceiling_ms: DEFAULT_BACKOFF_CEILING_MS,
        }
    }
}

impl BackoffStrategy {
    /// The delay to apply before the `retries`-th retry (1-indexed: the
    /// delay computed ahead of the first retry uses `retries = 1`).
    pub fn delay(&self, retries: u32) -> Duration {
        match *self {
            BackoffStrategy::Exponential { base_ms, ceiling_ms } => {
                let doubled = base_ms.saturating_mul(1i64 << retries.min(32));
                Duration::milliseconds(doubled.min(ceiling_ms))
            }
            BackoffStrategy::Fixed { interval_ms } => Duration::milliseconds(interval_ms),
        }
    }
}

/// Retries a failed job under a bounded backoff, or gives up past the bound
/// of configured attempts.
pub struct RetryPolicy<'a> {
    repo: &'a dyn StepRepository,
    max_retries: u32,
    backoff: BackoffStrategy,
}

impl<'a> RetryPolicy<'a> {
    pub fn new(repo: &'a dyn StepRepository) -> Self {
        Self {
            repo,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: BackoffStrategy::default(),
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Handle a job failure: retry with backoff, or transition to Failed
    /// once `max_retries` is exhausted.
    pub async fn handle_failure(
        &self,
        step: &Step,
        now: DateTime<Utc>,
        error_message: impl Into<String>,
    ) -> Result<Step, EngineError> {
        let executor = TransitionExecutor::new(self.repo);
        let error_message = error_message.into();

        if step.retries < self.max_retries {
            let next_retry = step.retries + 1;
            let dispatch_after = now + self.backoff.delay(next_retry);
            let extra = StepPatch::default()
                .error_message(error_message)
                .dispatch_after(dispatch_after);
            executor.transition(step.id, StepState::Pending, now, extra).await
        } else {
            let extra = StepPatch::default().error_message(error_message);
            executor.transition(step.id, StepState::Failed, now, extra).await
        }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
