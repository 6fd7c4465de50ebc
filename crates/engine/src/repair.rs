// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Manual stale-dispatch repair.
//!
//! The state machine itself defends against duplicate dispatch by re-reading
//! and re-checking state inside the dispatch path, but nothing auto-resets a
//! step stuck in Dispatched or Running — that decision is deliberately left
//! to an operator. This is the one sanctioned escape hatch: it writes
//! straight through [`StepRepository::update_step`], bypassing
//! [`crate::transition::TransitionExecutor`]'s guard re-check entirely,
//! because `Dispatched -> Pending` is not a legal edge in the ordinary state
//! machine and never should be for anything but an explicit admin
//! command.

use crate::error::EngineError;
use martingalian_core::{Step, StepId, StepState};
use martingalian_store::{StepPatch, StepRepository, StoreError};

/// Force `step_id` back to Pending from Dispatched or Running, under the
/// store's row lock. Refuses any other current state — forcing a terminal
/// step back to Pending is not a repair, it's data corruption.
pub async fn force_retry(repo: &dyn StepRepository, step_id: StepId) -> Result<Step, EngineError> {
    let current = repo.get_step(step_id).await?.ok_or(StoreError::StepNotFound(step_id))?;

    if !matches!(current.state, StepState::Dispatched | StepState::Running) {
        return Err(EngineError::GuardDenied {
            step: step_id,
            reason: format!("cannot force-retry a step in state {}", current.state),
        });
    }

    let patch = StepPatch::to_state(StepState::Pending)
        .clear_started_at()
        .clear_completed_at()
        .clear_duration_ms()
        .clear_dispatch_after()
        .clear_hostname();
    match repo.update_step(step_id, current.state, patch).await {
        Ok(step) => Ok(step),
        Err(StoreError::Conflict(id)) => Err(EngineError::StaleState(id)),
        Err(other) => Err(EngineError::Store(other)),
    }
}

#[cfg(test)]
#[path = "repair_tests.rs"]
mod tests;
