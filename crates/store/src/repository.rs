// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `StepRepository` contract.
//!
//! One trait, two adapters: [`crate::postgres::PgStepRepository`] backs
//! production; [`crate::memory::MemoryStepRepository`] backs the engine's
//! own test suite, mirroring the multi-adapter pattern used elsewhere in
//! this codebase (one trait, swappable backends, no reflection).

use crate::error::StoreError;
use crate::patch::StepPatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use martingalian_core::{BlockUuid, Step, StepId, StepState, StepType, TickId, TickProgress};

/// Transactional queries and mutations over the `steps`, `steps_dispatcher`,
/// and `steps_dispatcher_ticks` tables.
#[async_trait]
pub trait StepRepository: Send + Sync {
    /// Atomically flips `can_dispatch` from false to true for `group` and
    /// opens a new [`Tick`](martingalian_core::Tick) row. Returns the new
    /// tick's id, or `None` if the group was already locked
    /// (*AlreadyDispatching*).
    async fn acquire_group_lock(
        &self,
        group: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<TickId>, StoreError>;

    /// Completes the tick record and flips `can_dispatch` back to false.
    /// A release without a prior successful acquire is a no-op.
    async fn release_group_lock(
        &self,
        group: Option<&str>,
        tick_id: TickId,
        progress: TickProgress,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// All distinct groups known to `steps_dispatcher`, plus the null-group
    /// sentinel if any ungrouped step exists.
    async fn distinct_groups(&self) -> Result<Vec<Option<String>>, StoreError>;

    /// The group with the oldest `last_selected_at` (nulls first), tie-broken
    /// lexically. `None` if there are no groups to pick from.
    async fn oldest_selected_group(&self) -> Result<Option<Option<String>>, StoreError>;

    /// Stamp `last_selected_at = now` for `group`.
    async fn mark_group_selected(
        &self,
        group: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn is_cooling_down(&self) -> Result<bool, StoreError>;

    async fn set_cooling_down(&self, value: bool) -> Result<(), StoreError>;

    async fn get_step(&self, id: StepId) -> Result<Option<Step>, StoreError>;

    /// Pending steps ready to dispatch: `dispatch_after` null or past, scoped
    /// by group when given.
    async fn select_dispatch_candidates(
        &self,
        group: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Step>, StoreError>;

    /// Apply a patch under the row's lock and return the fresh state.
    ///
    /// `expected_state` is the state the caller observed when it decided
    /// this write was legal (the row read `TransitionExecutor` guarded
    /// against). The write only takes effect if the row's current state
    /// still matches it; otherwise the row changed concurrently and this
    /// fails with [`StoreError::Conflict`] rather than silently applying a
    /// stale decision over whatever won the race.
    async fn update_step(
        &self,
        id: StepId,
        expected_state: StepState,
        patch: StepPatch,
    ) -> Result<Step, StoreError>;

    // ---- Cascade-support queries --------------------------------

    /// Steps in a Skipped state that are parents, scoped by group
    /// (pass 1, SkipDescendants).
    async fn skipped_parents(&self, group: Option<&str>) -> Result<Vec<Step>, StoreError>;

    /// Steps in a failed state with a non-null index, scoped by group
    /// (pass 2, CancelDownstream).
    async fn failed_steps_with_index(&self, group: Option<&str>) -> Result<Vec<Step>, StoreError>;

    /// `default`-type steps in `block` with `index > after_index`, not
    /// already terminal or NotRunnable (pass 2).
    async fn cancellable_after_index(
        &self,
        block: BlockUuid,
        after_index: i32,
    ) -> Result<Vec<Step>, StoreError>;

    /// Pending steps in `block` — used to also cancel a cancelled parent's
    /// child block (pass 2).
    async fn pending_steps_in_block(&self, block: BlockUuid) -> Result<Vec<Step>, StoreError>;

    /// Blocks where a NotRunnable resolve-exception step coexists with a
    /// failed-state non-resolve-exception step, ordered for "pick the
    /// first" (pass 3, PromoteResolveException).
    async fn blocks_with_promotable_resolve_exception(
        &self,
        group: Option<&str>,
    ) -> Result<Vec<BlockUuid>, StoreError>;

    async fn not_runnable_resolve_exception_steps(
        &self,
        block: BlockUuid,
    ) -> Result<Vec<Step>, StoreError>;

    /// Running parent steps, scoped by group (passes 4 and 6 start here).
    async fn running_parents(&self, group: Option<&str>) -> Result<Vec<Step>, StoreError>;

    /// Failed or Stopped parent steps, scoped by group (pass 5).
    async fn failed_or_stopped_parents(&self, group: Option<&str>) -> Result<Vec<Step>, StoreError>;

    /// Non-terminal steps within `block` (pass 5's kill set).
    async fn non_terminal_steps_in_block(&self, block: BlockUuid) -> Result<Vec<Step>, StoreError>;

    /// All steps within `block` (used by nested BFS and by guard
    /// evaluation for "previous index concluded").
    async fn steps_in_block(&self, block: BlockUuid) -> Result<Vec<Step>, StoreError>;

    /// `child_block_uuid` values named by steps within `block` — the BFS
    /// expansion step for nested collection.
    async fn child_blocks_of(&self, block: BlockUuid) -> Result<Vec<BlockUuid>, StoreError>;

    /// The step `P` with `P.child_block_uuid = block`, if any (Invariant 3:
    /// at most one such step exists).
    async fn parent_of_block(&self, block: BlockUuid) -> Result<Option<Step>, StoreError>;

    /// Steps at `index` within `block` restricted to `step_type` — the "PS"
    /// set in the "previous index concluded" guard.
    async fn steps_at_index(
        &self,
        block: BlockUuid,
        index: i32,
        step_type: StepType,
    ) -> Result<Vec<Step>, StoreError>;
}
