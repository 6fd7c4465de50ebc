// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! An in-process [`StepRepository`] used by the engine's own test suite.
//!
//! Exercises exactly the same guard and cascade logic as
//! [`crate::postgres::PgStepRepository`] without needing a live Postgres
//! instance, following this codebase's pattern of keeping a fast in-memory
//! adapter alongside the production one (`martingalian-core`'s
//! `test-support` feature does the same for [`martingalian_core::Step`]
//! fixtures).

use crate::error::StoreError;
use crate::patch::{Field, StepPatch};
use crate::repository::StepRepository;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use martingalian_core::{BlockUuid, Step, StepId, StepState, StepType, Tick, TickId, TickProgress};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

#[derive(Debug, Clone)]
struct GroupRow {
    can_dispatch: bool,
    current_tick_id: Option<TickId>,
    last_tick_completed: Option<DateTime<Utc>>,
    last_selected_at: Option<DateTime<Utc>>,
}

impl Default for GroupRow {
    fn default() -> Self {
        Self {
            can_dispatch: false,
            current_tick_id: None,
            last_tick_completed: None,
            last_selected_at: None,
        }
    }
}

/// Turns the `Option<&str>`/`Option<String>` group key into the map key used
/// internally; the empty string represents the null-group sentinel.
fn group_key(group: Option<&str>) -> String {
    group.unwrap_or("").to_string()
}

fn group_matches(filter: Option<&str>, step_group: &Option<String>) -> bool {
    filter == step_group.as_deref()
}

pub struct MemoryStepRepository {
    steps: Mutex<HashMap<StepId, Step>>,
    groups: Mutex<HashMap<String, GroupRow>>,
    ticks: Mutex<HashMap<TickId, Tick>>,
    cooling_down: AtomicBool,
    next_id: AtomicI64,
}

impl Default for MemoryStepRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStepRepository {
    pub fn new() -> Self {
        Self {
            steps: Mutex::new(HashMap::new()),
            groups: Mutex::new(HashMap::new()),
            ticks: Mutex::new(HashMap::new()),
            cooling_down: AtomicBool::new(false),
            next_id: AtomicI64::new(1),
        }
    }

    /// Seed a fixture step, assigning a fresh id if it doesn't already have
    /// one. Test-only; not part of the [`StepRepository`] contract.
    pub fn insert_step(&self, mut step: Step) -> Step {
        if step.id.get() == 0 {
            step.id = StepId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        }
        self.steps.lock().insert(step.id, step.clone());
        step
    }

    /// Snapshot every step currently held, for assertions in tests.
    pub fn all_steps(&self) -> Vec<Step> {
        self.steps.lock().values().cloned().collect()
    }
}

#[async_trait]
impl StepRepository for MemoryStepRepository {
    async fn acquire_group_lock(
        &self,
        group: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<TickId>, StoreError> {
        let mut groups = self.groups.lock();
        let row = groups.entry(group_key(group)).or_default();
        if row.can_dispatch {
            return Ok(None);
        }
        let tick = Tick::new(group.map(str::to_string), now);
        let tick_id = tick.id;
        self.ticks.lock().insert(tick_id, tick);
        row.can_dispatch = true;
        row.current_tick_id = Some(tick_id);
        Ok(Some(tick_id))
    }

    async fn release_group_lock(
        &self,
        group: Option<&str>,
        tick_id: TickId,
        progress: TickProgress,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut groups = self.groups.lock();
        let Some(row) = groups.get_mut(&group_key(group)) else {
            return Ok(());
        };
        if row.current_tick_id != Some(tick_id) {
            // release without a matching prior acquire is a no-op.
            return Ok(());
        }
        if let Some(tick) = self.ticks.lock().get_mut(&tick_id) {
            tick.complete(now, progress);
        }
        row.can_dispatch = false;
        row.current_tick_id = None;
        row.last_tick_completed = Some(now);
        Ok(())
    }

    async fn distinct_groups(&self) -> Result<Vec<Option<String>>, StoreError> {
        let steps = self.steps.lock();
        let mut seen = std::collections::BTreeSet::new();
        for step in steps.values() {
            if step.state.is_active() {
                seen.insert(step.group.clone().unwrap_or_default());
            }
        }
        drop(steps);
        Ok(seen
            .into_iter()
            .map(|g| if g.is_empty() { None } else { Some(g) })
            .collect())
    }

    async fn oldest_selected_group(&self) -> Result<Option<Option<String>>, StoreError> {
        let candidates = self.distinct_groups().await?;
        if candidates.is_empty() {
            return Ok(None);
        }
        let groups = self.groups.lock();
        let mut best: Option<(Option<String>, Option<DateTime<Utc>>)> = None;
        for candidate in candidates {
            let key = group_key(candidate.as_deref());
            let last_selected_at = groups.get(&key).and_then(|r| r.last_selected_at);
            let better = match &best {
                None => true,
                Some((best_group, best_at)) => match (last_selected_at, best_at) {
                    (None, Some(_)) => true,
                    (Some(_), None) => false,
                    (a, b) if a == *b => candidate.clone().unwrap_or_default()
                        < best_group.clone().unwrap_or_default(),
                    (a, b) => a < *b,
                },
            };
            if better {
                best = Some((candidate, last_selected_at));
            }
        }
        Ok(best.map(|(group, _)| group))
    }

    async fn mark_group_selected(
        &self,
        group: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut groups = self.groups.lock();
        groups.entry(group_key(group)).or_default().last_selected_at = Some(now);
        Ok(())
    }

    async fn is_cooling_down(&self) -> Result<bool, StoreError> {
        Ok(self.cooling_down.load(Ordering::SeqCst))
    }

    async fn set_cooling_down(&self, value: bool) -> Result<(), StoreError> {
        self.cooling_down.store(value, Ordering::SeqCst);
        Ok(())
    }

    async fn get_step(&self, id: StepId) -> Result<Option<Step>, StoreError> {
        Ok(self.steps.lock().get(&id).cloned())
    }

    async fn select_dispatch_candidates(
        &self,
        group: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Vec<Step>, StoreError> {
        let steps = self.steps.lock();
        let mut out: Vec<Step> = steps
            .values()
            .filter(|s| {
                s.state == martingalian_core::StepState::Pending
                    && group_matches(group, &s.group)
                    && s.dispatch_after.map_or(true, |at| at <= now)
            })
            .cloned()
            .collect();
        out.sort_by_key(|s| s.id);
        Ok(out)
    }

    async fn update_step(
        &self,
        id: StepId,
        expected_state: StepState,
        patch: StepPatch,
    ) -> Result<Step, StoreError> {
        let mut steps = self.steps.lock();
        let step = steps.get_mut(&id).ok_or(StoreError::StepNotFound(id))?;
        if step.state != expected_state {
            return Err(StoreError::Conflict(id));
        }
        if let Some(state) = patch.state {
            step.state = state;
        }
        apply_field(&mut step.dispatch_after, patch.dispatch_after);
        apply_field(&mut step.started_at, patch.started_at);
        apply_field(&mut step.completed_at, patch.completed_at);
        apply_field(&mut step.duration_ms, patch.duration_ms);
        if let Some(retries) = patch.retries {
            step.retries = retries;
        }
        apply_field(&mut step.tick_id, patch.tick_id);
        apply_field(&mut step.hostname, patch.hostname);
        apply_field(&mut step.response, patch.response);
        apply_field(&mut step.error_message, patch.error_message);
        apply_field(&mut step.error_stack_trace, patch.error_stack_trace);
        apply_field(&mut step.step_log, patch.step_log);
        Ok(step.clone())
    }

    async fn skipped_parents(&self, group: Option<&str>) -> Result<Vec<Step>, StoreError> {
        let steps = self.steps.lock();
        Ok(steps
            .values()
            .filter(|s| {
                s.state == martingalian_core::StepState::Skipped
                    && s.is_parent()
                    && group_matches(group, &s.group)
            })
            .cloned()
            .collect())
    }

    async fn failed_steps_with_index(&self, group: Option<&str>) -> Result<Vec<Step>, StoreError> {
        let steps = self.steps.lock();
        Ok(steps
            .values()
            .filter(|s| s.state.is_failed() && s.index.is_some() && group_matches(group, &s.group))
            .cloned()
            .collect())
    }

    async fn cancellable_after_index(
        &self,
        block: BlockUuid,
        after_index: i32,
    ) -> Result<Vec<Step>, StoreError> {
        let steps = self.steps.lock();
        Ok(steps
            .values()
            .filter(|s| {
                s.block_uuid == block
                    && s.step_type == StepType::Default
                    && s.index.is_some_and(|i| i > after_index)
                    && !s.state.is_terminal()
                    && s.state != martingalian_core::StepState::NotRunnable
            })
            .cloned()
            .collect())
    }

    async fn pending_steps_in_block(&self, block: BlockUuid) -> Result<Vec<Step>, StoreError> {
        let steps = self.steps.lock();
        Ok(steps
            .values()
            .filter(|s| s.block_uuid == block && s.state == martingalian_core::StepState::Pending)
            .cloned()
            .collect())
    }

    async fn blocks_with_promotable_resolve_exception(
        &self,
        group: Option<&str>,
    ) -> Result<Vec<BlockUuid>, StoreError> {
        let steps = self.steps.lock();
        let mut candidate_blocks: Vec<BlockUuid> = steps
            .values()
            .filter(|s| group_matches(group, &s.group))
            .map(|s| s.block_uuid)
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();
        candidate_blocks.retain(|block| {
            let in_block: Vec<&Step> = steps.values().filter(|s| s.block_uuid == *block).collect();
            let has_not_runnable_resolver = in_block.iter().any(|s| {
                s.step_type == StepType::ResolveException
                    && s.state == martingalian_core::StepState::NotRunnable
            });
            let has_failed_peer = in_block
                .iter()
                .any(|s| s.step_type != StepType::ResolveException && s.state.is_failed());
            has_not_runnable_resolver && has_failed_peer
        });
        Ok(candidate_blocks)
    }

    async fn not_runnable_resolve_exception_steps(
        &self,
        block: BlockUuid,
    ) -> Result<Vec<Step>, StoreError> {
        let steps = self.steps.lock();
        Ok(steps
            .values()
            .filter(|s| {
                s.block_uuid == block
                    && s.step_type == StepType::ResolveException
                    && s.state == martingalian_core::StepState::NotRunnable
            })
            .cloned()
            .collect())
    }

    async fn running_parents(&self, group: Option<&str>) -> Result<Vec<Step>, StoreError> {
        let steps = self.steps.lock();
        Ok(steps
            .values()
            .filter(|s| {
                s.state == martingalian_core::StepState::Running
                    && s.is_parent()
                    && group_matches(group, &s.group)
            })
            .cloned()
            .collect())
    }

    async fn failed_or_stopped_parents(&self, group: Option<&str>) -> Result<Vec<Step>, StoreError> {
        let steps = self.steps.lock();
        Ok(steps
            .values()
            .filter(|s| {
                matches!(
                    s.state,
                    martingalian_core::StepState::Failed | martingalian_core::StepState::Stopped
                ) && s.is_parent()
                    && group_matches(group, &s.group)
            })
            .cloned()
            .collect())
    }

    async fn non_terminal_steps_in_block(&self, block: BlockUuid) -> Result<Vec<Step>, StoreError> {
        let steps = self.steps.lock();
        Ok(steps
            .values()
            .filter(|s| s.block_uuid == block && !s.state.is_terminal())
            .cloned()
            .collect())
    }

    async fn steps_in_block(&self, block: BlockUuid) -> Result<Vec<Step>, StoreError> {
        let steps = self.steps.lock();
        Ok(steps.values().filter(|s| s.block_uuid == block).cloned().collect())
    }

    async fn child_blocks_of(&self, block: BlockUuid) -> Result<Vec<BlockUuid>, StoreError> {
        let steps = self.steps.lock();
        Ok(steps
            .values()
            .filter(|s| s.block_uuid == block)
            .filter_map(|s| s.child_block_uuid)
            .collect())
    }

    async fn parent_of_block(&self, block: BlockUuid) -> Result<Option<Step>, StoreError> {
        let steps = self.steps.lock();
        Ok(steps.values().find(|s| s.child_block_uuid == Some(block)).cloned())
    }

    async fn steps_at_index(
        &self,
        block: BlockUuid,
        index: i32,
        step_type: StepType,
    ) -> Result<Vec<Step>, StoreError> {
        let steps = self.steps.lock();
        Ok(steps
            .values()
            .filter(|s| s.block_uuid == block && s.index == Some(index) && s.step_type == step_type)
            .cloned()
            .collect())
    }
}

fn apply_field<T: Clone>(slot: &mut Option<T>, field: Field<T>) {
    match field {
        Field::Unchanged => {}
        Field::Set(value) => *slot = Some(value),
        Field::Clear => *slot = None,
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
