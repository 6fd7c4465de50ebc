// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `CascadeEngine`: the six ordered cascade passes that propagate
//! terminal outcomes up and down the block tree.
//!
//! Each pass, if it mutates anything, short-circuits the tick:
//! `run_passes` returns as soon as one pass changes state, reporting which
//! one, so `DispatcherTick` can tear down and let the next group's turn
//! proceed. This keeps every tick to "one kind of work" and makes the
//! ordering guarantees easy to reason about.

use crate::error::EngineError;
use crate::state_machine::can_complete;
use crate::transition::TransitionExecutor;
use chrono::{DateTime, Utc};
use martingalian_core::{BlockUuid, StepId, StepState, TickProgress};
use martingalian_store::{StepPatch, StepRepository};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

/// The result of a cascade sweep: either some pass mutated state (and the
/// tick must short-circuit at that pass), or all six ran clean and the tick
/// may proceed to selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadeOutcome {
    Mutated(TickProgress),
    Clean,
}

/// Applies the six cascade passes against one group's slice of the block
/// tree.
pub struct CascadeEngine<'a> {
    repo: &'a dyn StepRepository,
}

impl<'a> CascadeEngine<'a> {
    pub fn new(repo: &'a dyn StepRepository) -> Self {
        Self { repo }
    }

    /// Run passes 1 through 6 in order, stopping at the first one that
    /// mutates state.
    pub async fn run_passes(
        &self,
        group: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<CascadeOutcome, EngineError> {
        if self.skip_descendants(group, now).await? {
            return Ok(CascadeOutcome::Mutated(TickProgress::SkipDescendants));
        }
        if self.cancel_downstream(group, now).await? {
            return Ok(CascadeOutcome::Mutated(TickProgress::CancelDownstream));
        }
        if self.promote_resolve_exception(group, now).await? {
            return Ok(CascadeOutcome::Mutated(TickProgress::PromoteResolveException));
        }
        if self.fail_parents(group, now).await? {
            return Ok(CascadeOutcome::Mutated(TickProgress::FailParents));
        }
        if self.cascade_failure_to_children(group, now).await? {
            return Ok(CascadeOutcome::Mutated(TickProgress::CascadeFailureToChildren));
        }
        if self.complete_parents(group, now).await? {
            return Ok(CascadeOutcome::Mutated(TickProgress::CompleteParents));
        }
        Ok(CascadeOutcome::Clean)
    }

    /// Pass 1: every Skipped parent's transitive child blocks are fully
    /// Skipped.
    async fn skip_descendants(
        &self,
        group: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let mut mutated = false;
        for parent in self.repo.skipped_parents(group).await? {
            let Some(root) = parent.child_block_uuid else {
                continue;
            };
            for block in self.collect_nested_blocks(root).await? {
                for step in self.repo.steps_in_block(block).await? {
                    if self.try_transition(step.id, StepState::Skipped, now).await? {
                        mutated = true;
                    }
                }
            }
        }
        Ok(mutated)
    }

    /// Pass 2: every `default` step downstream of a failed index is
    /// Cancelled; cancelling a parent also cancels its Pending children
    /// in the same sweep.
    async fn cancel_downstream(
        &self,
        group: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let mut mutated = false;
        for failed in self.repo.failed_steps_with_index(group).await? {
            let Some(after_index) = failed.index else {
                continue;
            };
            for candidate in self.repo.cancellable_after_index(failed.block_uuid, after_index).await? {
                let is_parent = candidate.is_parent();
                let child_block = candidate.child_block_uuid;
                if self.try_transition(candidate.id, StepState::Cancelled, now).await? {
                    mutated = true;
                    if is_parent {
                        if let Some(child_block) = child_block {
                            for pending in self.repo.pending_steps_in_block(child_block).await? {
                                if self.try_transition(pending.id, StepState::Cancelled, now).await? {
                                    mutated = true;
                                }
                            }
                        }
                    }
                }
            }
        }
        Ok(mutated)
    }

    /// Pass 3: the first block with a promotable `resolve-exception` slot
    /// has its NotRunnable resolvers promoted to Pending.
    async fn promote_resolve_exception(
        &self,
        group: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let blocks = self.repo.blocks_with_promotable_resolve_exception(group).await?;
        let Some(block) = blocks.into_iter().next() else {
            return Ok(false);
        };
        let mut mutated = false;
        for resolver in self.repo.not_runnable_resolve_exception_steps(block).await? {
            if self.try_transition(resolver.id, StepState::Pending, now).await? {
                mutated = true;
            }
        }
        Ok(mutated)
    }

    /// Pass 4: a Running parent whose immediate child block has any failed
    /// step is itself marked Failed.
    async fn fail_parents(&self, group: Option<&str>, now: DateTime<Utc>) -> Result<bool, EngineError> {
        let mut mutated = false;
        for parent in self.repo.running_parents(group).await? {
            let Some(child_block) = parent.child_block_uuid else {
                continue;
            };
            let steps = self.repo.steps_in_block(child_block).await?;
            if steps.iter().any(|s| s.state.is_failed()) {
                if self.try_transition(parent.id, StepState::Failed, now).await? {
                    mutated = true;
                }
            }
        }
        Ok(mutated)
    }

    /// Pass 5: every non-terminal step in a Failed/Stopped parent's child
    /// block is itself failed.
    async fn cascade_failure_to_children(
        &self,
        group: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let mut mutated = false;
        for parent in self.repo.failed_or_stopped_parents(group).await? {
            let Some(child_block) = parent.child_block_uuid else {
                continue;
            };
            for step in self.repo.non_terminal_steps_in_block(child_block).await? {
                if self.try_transition(step.id, StepState::Failed, now).await? {
                    mutated = true;
                }
            }
        }
        Ok(mutated)
    }

    /// Pass 6: a Running parent whose immediate child block is fully
    /// terminal completes.
    ///
    /// Checking the *immediate* child block suffices to cover the entire
    /// nested subtree: a grandchild parent could only itself be terminal if
    /// its own child subtree already satisfied this same guard, so the
    /// immediate check is sound by induction.
    async fn complete_parents(&self, group: Option<&str>, now: DateTime<Utc>) -> Result<bool, EngineError> {
        let mut mutated = false;
        for parent in self.repo.running_parents(group).await? {
            if can_complete(self.repo, &parent).await? {
                if self.try_transition(parent.id, StepState::Completed, now).await? {
                    mutated = true;
                }
            }
        }
        Ok(mutated)
    }

    /// Attempt a transition, swallowing `GuardDenied`/stale-row rejections
    /// and propagating everything else.
    async fn try_transition(
        &self,
        step_id: StepId,
        target: StepState,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let executor = TransitionExecutor::new(self.repo);
        match executor.transition(step_id, target, now, StepPatch::default()).await {
            Ok(_) => Ok(true),
            Err(EngineError::GuardDenied { .. }) => Ok(false),
            Err(EngineError::Store(martingalian_store::StoreError::StepNotFound(_))) => Ok(false),
            Err(EngineError::StaleState(_)) => Ok(false),
            Err(other) => Err(other),
        }
    }

    /// BFS over the block graph starting at `start`, following each step's
    /// `child_block_uuid`.
    /// Cycles are a schema invariant violation but are tolerated by the
    /// visited set rather than looping forever.
    async fn collect_nested_blocks(&self, start: BlockUuid) -> Result<Vec<BlockUuid>, EngineError> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        let mut order = Vec::new();
        visited.insert(start);
        queue.push_back(start);
        while let Some(block) = queue.pop_front() {
            order.push(block);
            for child in self.repo.child_blocks_of(block).await? {
                if !visited.insert(child) {
                    warn!(?block, ?child, "cycle detected in block tree; skipping revisit");
                    continue;
                }
                queue.push_back(child);
            }
        }
        debug!(?start, blocks = order.len(), "collected nested blocks");
        Ok(order)
    }
}

#[cfg(test)]
#[path = "cascade_tests.rs"]
mod tests;
