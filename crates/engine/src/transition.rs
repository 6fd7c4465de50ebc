// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `TransitionExecutor`: applies one state transition atomically,
//! re-checking the guard against the freshest row and stamping the
//! side-effect fields the state machine itself defines.

use crate::error::EngineError;
use crate::state_machine::{allowed_shape, can_complete, can_dispatch};
use chrono::{DateTime, Utc};
use martingalian_core::{Step, StepId, StepState};
use martingalian_store::{StepPatch, StepRepository, StoreError};

/// Applies guarded transitions against a [`StepRepository`].
pub struct TransitionExecutor<'a> {
    repo: &'a dyn StepRepository,
}

impl<'a> TransitionExecutor<'a> {
    pub fn new(repo: &'a dyn StepRepository) -> Self {
        Self { repo }
    }

    /// Move `step_id` to `target`, re-reading the row, re-checking the
    /// guard, and writing the new state plus its side-effect fields in one
    /// patch. `extra` carries caller-supplied fields (e.g. `error_message`
    /// on a failure, `response` on success) layered on top of the
    /// transition's own computed fields.
    ///
    /// Fails with [`EngineError::GuardDenied`] if the edge is illegal or the
    /// guard rejects it, or with a wrapped [`StoreError::StepNotFound`] if
    /// the step no longer exists.
    pub async fn transition(
        &self,
        step_id: StepId,
        target: StepState,
        now: DateTime<Utc>,
        extra: StepPatch,
    ) -> Result<Step, EngineError> {
        let current = self
            .repo
            .get_step(step_id)
            .await?
            .ok_or(StoreError::StepNotFound(step_id))?;

        self.check_guard(&current, target).await?;

        let computed = side_effects(&current, target, now);
        let patch = computed.merge(extra);
        match self.repo.update_step(step_id, current.state, patch).await {
            Ok(step) => Ok(step),
            Err(StoreError::Conflict(id)) => Err(EngineError::StaleState(id)),
            Err(other) => Err(EngineError::Store(other)),
        }
    }

    /// Re-check that `current.state -> target` is both a legal edge shape
    /// and (for the two guarded edges) currently permitted — the
    /// defense-in-depth re-check this performs, since the step may have
    /// changed since a candidate list was built.
    async fn check_guard(&self, current: &Step, target: StepState) -> Result<(), EngineError> {
        if !allowed_shape(current.state, target) {
            return Err(EngineError::GuardDenied {
                step: current.id,
                reason: format!("{} -> {} is not a legal transition", current.state, target),
            });
        }
        let permitted = match (current.state, target) {
            (StepState::Pending, StepState::Dispatched) => can_dispatch(self.repo, current).await?,
            (StepState::Running, StepState::Completed) => can_complete(self.repo, current).await?,
            _ => true,
        };
        if !permitted {
            return Err(EngineError::GuardDenied {
                step: current.id,
                reason: format!("guard rejected {} -> {}", current.state, target),
            });
        }
        Ok(())
    }
}

/// The timestamp/retry side effects the state machine itself prescribes for
/// specific edges, independent of anything a caller asks for.
fn side_effects(current: &Step, target: StepState, now: DateTime<Utc>) -> StepPatch {
    let mut patch = StepPatch::to_state(target);

    match (current.state, target) {
        (StepState::Dispatched, StepState::Running) => {
            patch = patch.started_at(now).hostname(local_hostname());
        }
        (StepState::Running, StepState::Pending) => {
            patch = patch
                .retries(current.retries + 1)
                .clear_started_at()
                .clear_completed_at()
                .clear_duration_ms();
        }
        _ => {}
    }

    if target.is_terminal() {
        patch = patch.completed_at(now);
        if let Some(started) = current.started_at {
            patch = patch.duration_ms((now - started).num_milliseconds().max(0));
        }
    }

    patch
}

/// Best-effort local hostname, stamped on `Dispatched -> Running`.
fn local_hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

#[cfg(test)]
#[path = "transition_tests.rs"]
mod tests;
