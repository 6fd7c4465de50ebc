// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The step state machine: the transition-shape table and the
//! guard predicates that gate the two non-trivial edges.
//!
//! The shape table only answers "is this edge legal at all" — a pure
//! function of the two states. The guards answer "is this edge legal for
//! *this* step *right now*", which for `Pending → Dispatched` and
//! `Running → Completed` requires reading sibling/parent state through the
//! [`StepRepository`], so they live here rather than in `martingalian-core`.

use martingalian_core::{BlockUuid, Step, StepState, StepType};
use martingalian_store::{StepRepository, StoreError};

/// Whether `from → to` is a legal edge in the state diagram, ignoring
/// guards. `TransitionExecutor` checks this first as a cheap rejection
/// before evaluating the (potentially query-heavy) guard.
pub const fn allowed_shape(from: StepState, to: StepState) -> bool {
    use StepState::*;
    matches!(
        (from, to),
        (Pending, Dispatched)
            | (Pending, Skipped)
            | (Pending, Cancelled)
            | (Pending, NotRunnable)
            | (NotRunnable, Pending)
            | (Dispatched, Running)
            | (Dispatched, Failed)
            | (Dispatched, Cancelled)
            | (Dispatched, Skipped)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Skipped)
            | (Running, Stopped)
            | (Running, Pending)
            | (Running, Running)
    )
}

/// A step's relationship to its sibling block. `Child` carries the parent step since its guard
/// needs the parent's current state.
#[derive(Debug, Clone)]
pub enum Lineage {
    Orphan,
    Child(Box<Step>),
    Parent,
}

/// Classify `step` by lineage. A block with a parent always
/// classifies its members as `Child` first (the parent-state requirement is
/// the more restrictive one); only a step with no parent block falls
/// through to `Parent`/`Orphan` based on whether it spawns its own child
/// block.
pub async fn classify(
    repo: &dyn StepRepository,
    step: &Step,
) -> Result<Lineage, StoreError> {
    if let Some(parent) = repo.parent_of_block(step.block_uuid).await? {
        return Ok(Lineage::Child(Box::new(parent)));
    }
    if step.is_parent() {
        return Ok(Lineage::Parent);
    }
    Ok(Lineage::Orphan)
}

/// The "previous index concluded" guard shared by the Orphan/Child/Parent
/// branches.
///
/// `index <= 1` (and `index = null`, the no-predecessor case) is
/// vacuously true. Otherwise the predecessor set `PS` is every step at
/// `index - 1` in the block, narrowed to `resolve-exception` steps if any
/// such step in the block is currently Pending, else narrowed to `default`
/// steps.
pub async fn previous_index_concluded(
    repo: &dyn StepRepository,
    block: BlockUuid,
    index: Option<i32>,
) -> Result<bool, StoreError> {
    let Some(index) = index else {
        return Ok(true);
    };
    if index <= 1 {
        return Ok(true);
    }
    let prev = index - 1;
    let siblings = repo.steps_in_block(block).await?;
    let any_pending_resolver = siblings
        .iter()
        .any(|s| s.step_type == StepType::ResolveException && s.state == StepState::Pending);
    let restrict_to = if any_pending_resolver {
        StepType::ResolveException
    } else {
        StepType::Default
    };
    let ps: Vec<&Step> = siblings
        .iter()
        .filter(|s| s.index == Some(prev) && s.step_type == restrict_to)
        .collect();
    Ok(!ps.is_empty() && ps.iter().all(|s| s.state.is_concluded()))
}

/// The resolve-exception special case of the `Pending → Dispatched` guard
///: chains only through other `resolve-exception` steps, ignoring
/// `default` siblings entirely.
async fn resolve_exception_guard(
    repo: &dyn StepRepository,
    block: BlockUuid,
    index: Option<i32>,
) -> Result<bool, StoreError> {
    let Some(index) = index else {
        return Ok(true);
    };
    if index <= 1 {
        return Ok(true);
    }
    let predecessors = repo.steps_at_index(block, index - 1, StepType::ResolveException).await?;
    Ok(!predecessors.is_empty() && predecessors.iter().all(|s| s.state.is_concluded()))
}

/// The `Pending → Dispatched` guard — the hardest one in the
/// machine. Returns `Ok(true)` iff `step` may move to `Dispatched` right
/// now.
pub async fn can_dispatch(repo: &dyn StepRepository, step: &Step) -> Result<bool, StoreError> {
    if step.step_type == StepType::ResolveException {
        return resolve_exception_guard(repo, step.block_uuid, step.index).await;
    }

    match classify(repo, step).await? {
        Lineage::Orphan => {
            if step.index.is_none() {
                Ok(true)
            } else {
                previous_index_concluded(repo, step.block_uuid, step.index).await
            }
        }
        Lineage::Child(parent) => {
            let parent_ready = matches!(parent.state, StepState::Running | StepState::Completed);
            Ok(parent_ready && previous_index_concluded(repo, step.block_uuid, step.index).await?)
        }
        Lineage::Parent => previous_index_concluded(repo, step.block_uuid, step.index).await,
    }
}

/// The `Running → Completed` guard: a parent may only complete once
/// its child block is fully concluded (every member terminal).
pub async fn can_complete(repo: &dyn StepRepository, step: &Step) -> Result<bool, StoreError> {
    let Some(child_block) = step.child_block_uuid else {
        return Ok(true);
    };
    let non_terminal = repo.non_terminal_steps_in_block(child_block).await?;
    Ok(non_terminal.is_empty())
}

#[cfg(test)]
#[path = "state_machine_tests.rs"]
mod tests;
